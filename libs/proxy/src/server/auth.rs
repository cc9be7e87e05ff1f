//! Request authentication
//!
//! Only loopback hostnames are accepted, and the caller must present the
//! shared secret.

use hearth_types::protocol::{headers, ALLOWED_HOSTNAMES};
use hyper::header::HOST;
use hyper::{HeaderMap, StatusCode};

/// Check the `Host` header and the secret. Returns the status to reject
/// with, or `None` when the request may proceed.
pub fn authenticate(request_headers: &HeaderMap, secret: &[u8]) -> Option<StatusCode> {
    let Some(host) = request_headers.get(HOST) else {
        return Some(StatusCode::BAD_REQUEST);
    };
    let Some(hostname) = host.to_str().ok().and_then(hostname) else {
        return Some(StatusCode::BAD_REQUEST);
    };
    if !ALLOWED_HOSTNAMES
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(hostname))
    {
        return Some(StatusCode::UNAUTHORIZED);
    }

    let presented = request_headers
        .get(headers::OP_SECRET)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| hex::decode(v).ok());
    match presented {
        Some(presented) if constant_time_eq(&presented, secret) => None,
        _ => Some(StatusCode::UNAUTHORIZED),
    }
}

/// Hostname part of a `Host` header value, IPv6 literals keep their brackets
fn hostname(host: &str) -> Option<&str> {
    let host = host.trim();
    if host.is_empty() {
        return None;
    }
    if host.starts_with('[') {
        let end = host.find(']')?;
        let rest = &host[end + 1..];
        if !rest.is_empty() && !valid_port(rest.strip_prefix(':')?) {
            return None;
        }
        return Some(&host[..=end]);
    }
    match host.split_once(':') {
        Some((name, port)) if valid_port(port) && !name.is_empty() => Some(name),
        Some(_) => None,
        None => Some(host),
    }
}

fn valid_port(port: &str) -> bool {
    port.is_empty() || port.parse::<u16>().is_ok()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
