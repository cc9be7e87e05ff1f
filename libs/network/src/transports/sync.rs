//! Synchronous transport
//!
//! The request runs on the helper runtime while the caller waits on a
//! channel. The caller's own scheduler is never entered, so this works from
//! plain threads and from inside async code alike. Calling it from a helper
//! runtime thread would deadlock.

use bytes::Bytes;
use hearth_types::protocol::{headers, result_type};
use hearth_types::ByteStream;
use hyper::header::HeaderMap;
use hyper::{Body, Request, StatusCode};
use std::sync::Arc;

use super::{body_stream, send};
use crate::{HttpWorker, Result, TransportError};

/// Fully received response
pub struct SyncResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ResponseBody,
}

pub enum ResponseBody {
    Buffered(Bytes),
    /// Left unread because the response announced a stream result
    Streaming(ByteStream),
}

impl SyncResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Buffered body, or empty bytes for a streaming one
    pub fn bytes(&self) -> Bytes {
        match &self.body {
            ResponseBody::Buffered(bytes) => bytes.clone(),
            ResponseBody::Streaming(_) => Bytes::new(),
        }
    }
}

pub struct SyncTransport {
    worker: Arc<HttpWorker>,
}

impl SyncTransport {
    pub fn new(worker: Arc<HttpWorker>) -> Self {
        Self { worker }
    }

    /// Perform `request` and block until status, headers and body are known
    pub fn request(&self, request: Request<Body>) -> Result<SyncResponse> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let client = self.worker.client().clone();
        let uri = request.uri().clone();

        self.worker.spawn(async move {
            let result = receive(client, request).await;
            // The caller may have given up; nothing to report then
            let _ = tx.send(result);
        })?;

        rx.recv().map_err(|_| {
            TransportError::closed(format!("helper runtime stopped before {uri} completed"))
        })?
    }
}

async fn receive(
    client: hyper::Client<hyper::client::HttpConnector, Body>,
    request: Request<Body>,
) -> Result<SyncResponse> {
    let response = send(client, request).await?;
    let (parts, body) = response.into_parts();

    let streaming = parts
        .headers
        .get(headers::OP_RESULT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains(result_type::READABLE_STREAM))
        .unwrap_or(false);

    let body = if streaming {
        ResponseBody::Streaming(body_stream(body))
    } else {
        let bytes = hyper::body::to_bytes(body)
            .await
            .map_err(|e| TransportError::network_with_source("failed to read response body", e))?;
        ResponseBody::Buffered(bytes)
    };

    Ok(SyncResponse {
        status: parts.status,
        headers: parts.headers,
        body,
    })
}
