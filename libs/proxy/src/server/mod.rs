//! Sandbox-side dispatcher
//!
//! One [`Dispatcher`] lives for the whole sandbox process. It owns the heap
//! of objects handed out to the host and answers proxy requests against it.
//!
//! ## Request flow
//!
//! 1. Authenticate the `Host` header and the shared secret
//! 2. `FREE` releases the listed addresses and answers 204
//! 3. Resolve the target against the heap
//! 4. Run the operation, turning sandbox throws into status 500
//! 5. Shape the response: raw streams, awaited promises, or an encoded value
//!    with at most one stream appended after the text

pub mod auth;
pub mod heap;
pub mod object;
pub mod service;

use bytes::Bytes;
use futures::StreamExt;
use hearth_codec::{prefix_stream, read_prefix, Codec, CodecError, StreamMode};
use hearth_network::body_stream;
use hearth_types::protocol::{headers, result_type, CALL_KEY};
use hearth_types::{
    ByteStream, CallPolicy, ErrorValue, PropertyDescriptor, ProxyError, ProxyOp, StreamHandle,
    Value,
};
use hyper::header::{HeaderValue, CONTENT_LENGTH};
use hyper::{Body, Request, Response, StatusCode, Uri};
use std::sync::Arc;
use tracing::{debug, warn};

pub use heap::{Heap, HeapRegistry};
pub use object::{as_live, live, LiveObject, Property, RemoteObject};
pub use service::{serve, ServeError};

/// Result of running an operation, before response shaping
struct Completion {
    status: StatusCode,
    value: Value,
    unused_body: Option<ByteStream>,
}

impl Completion {
    fn ok(value: Value) -> Self {
        Self {
            status: StatusCode::OK,
            value,
            unused_body: None,
        }
    }

    fn settle(result: Result<Value, ProxyError>) -> Self {
        match result {
            Ok(value) => Self::ok(value),
            Err(error) => Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                value: error.into_thrown_value(),
                unused_body: None,
            },
        }
    }
}

enum Handled {
    Done(Response<Body>),
    Completed(Completion),
}

pub struct Dispatcher {
    heap: Heap,
    codec: Codec,
    policy: CallPolicy,
    secret: Vec<u8>,
}

impl Dispatcher {
    pub fn new(
        secret: impl Into<Vec<u8>>,
        global: Arc<dyn RemoteObject>,
        env: Arc<dyn RemoteObject>,
    ) -> Self {
        Self {
            heap: Heap::new(global, env),
            codec: Codec::new(),
            policy: CallPolicy::default(),
            secret: secret.into(),
        }
    }

    pub fn with_policy(mut self, policy: CallPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub async fn handle(&self, request: Request<Body>) -> Response<Body> {
        let allow_async = !request.headers().contains_key(headers::OP_SYNC);
        let response = match self.dispatch(request).await {
            Ok(Handled::Done(response)) => Ok(response),
            Ok(Handled::Completed(completion)) => self.respond(completion, allow_async).await,
            Err(error) => Err(error),
        };
        match response {
            Ok(response) => response,
            Err(error) => self.error_response(error).await,
        }
    }

    async fn dispatch(&self, request: Request<Body>) -> Result<Handled, ProxyError> {
        if let Some(status) = auth::authenticate(request.headers(), &self.secret) {
            debug!(%status, "Rejected proxy request");
            return Ok(Handled::Done(empty(status)));
        }

        let Some(target_header) = header(&request, headers::OP_TARGET) else {
            return Ok(Handled::Done(empty(StatusCode::BAD_REQUEST)));
        };
        let Some(op) = header(&request, headers::OP).and_then(|op| op.parse::<ProxyOp>().ok())
        else {
            return Ok(Handled::Done(empty(StatusCode::NOT_FOUND)));
        };
        let key = header(&request, headers::OP_KEY);
        debug!(%op, key = key.as_deref(), "Proxy request");

        if op == ProxyOp::Free {
            return Ok(Handled::Done(self.free(&target_header)));
        }

        let registry = HeapRegistry::new(&self.heap);
        let target = self
            .codec
            .decode(&target_header, None, &registry)
            .map_err(target_error)?;

        let completion = match op {
            ProxyOp::Get => {
                let Some(key) = key else {
                    return Ok(Handled::Completed(Completion::ok(target)));
                };
                match live_object(&target)?.get(&key) {
                    Property::Missing => Completion::ok(Value::Undefined),
                    Property::Value(value) => Completion::ok(value),
                    Property::Method => return Ok(Handled::Done(function_response())),
                    Property::Deferred(pending) => Completion::settle(pending.await),
                }
            }
            ProxyOp::GetOwnDescriptor => {
                let Some(key) = key else {
                    return Ok(Handled::Done(empty(StatusCode::BAD_REQUEST)));
                };
                let descriptor = live_object(&target)?.own_descriptor(&key);
                Completion::ok(descriptor.map_or(Value::Undefined, descriptor_value))
            }
            ProxyOp::GetOwnKeys => {
                let keys = live_object(&target)?.own_keys();
                Completion::ok(Value::Array(keys.into_iter().map(Value::String).collect()))
            }
            ProxyOp::Call => {
                let Some(key) = key else {
                    return Ok(Handled::Done(empty(StatusCode::BAD_REQUEST)));
                };
                let object = live_object(&target)?.clone();
                let type_name = object.type_name().to_string();

                if self.policy.is_fetch_passthrough(&type_name, Some(&key)) {
                    let response = object.fetch(passthrough_request(request)).await?;
                    return Ok(Handled::Done(response));
                }

                let (args, unused_body) = self.read_args(request).await?;
                let first = args.first().cloned();
                let result = if key == CALL_KEY {
                    object.invoke(args)
                } else {
                    object.call(&key, args)
                };
                let result = match result {
                    Ok(_) if self.policy.is_mutating_argument(&type_name, Some(&key)) => {
                        Ok(first.unwrap_or(Value::Undefined))
                    }
                    other => other,
                };
                Completion {
                    unused_body,
                    ..Completion::settle(result)
                }
            }
            ProxyOp::Free => return Ok(Handled::Done(self.free(&target_header))),
        };
        Ok(Handled::Completed(completion))
    }

    fn free(&self, target_header: &str) -> Response<Body> {
        let addresses: Result<Vec<u64>, _> = target_header
            .split(',')
            .map(|a| a.trim().parse::<u64>())
            .collect();
        match addresses {
            Ok(addresses) => {
                debug!(count = addresses.len(), "Freeing heap addresses");
                self.heap.free(&addresses);
                empty(StatusCode::NO_CONTENT)
            }
            Err(_) => empty(StatusCode::BAD_REQUEST),
        }
    }

    async fn read_args(
        &self,
        request: Request<Body>,
    ) -> Result<(Vec<Value>, Option<ByteStream>), ProxyError> {
        let size = match header(&request, headers::OP_STRINGIFIED_SIZE) {
            Some(size) => Some(
                size.parse::<usize>()
                    .map_err(|_| ProxyError::codec(format!("invalid stringified size {size}")))?,
            ),
            None => None,
        };
        let content_length = header(&request, CONTENT_LENGTH.as_str())
            .and_then(|length| length.parse::<usize>().ok());
        let body = request.into_body();

        let (text, rest) = match size {
            Some(size) if Some(size) != content_length => {
                let (prefix, rest) = read_prefix(body_stream(body), size)
                    .await
                    .map_err(CodecError::from)?;
                (prefix, Some(rest))
            }
            _ => {
                let bytes = hyper::body::to_bytes(body)
                    .await
                    .map_err(|e| ProxyError::transport(format!("failed to read arguments: {e}")))?;
                (bytes, None)
            }
        };
        let text = std::str::from_utf8(&text)
            .map_err(|_| ProxyError::codec("arguments are not valid UTF-8"))?;

        let registry = HeapRegistry::new(&self.heap);
        let (args, unused) = self
            .codec
            .decode_with_rest(text, rest, &registry)
            .map_err(target_error)?;
        match args {
            Value::Array(args) => Ok((args, unused)),
            other => Err(ProxyError::codec(format!(
                "call arguments must be an array, got {}",
                other.type_label()
            ))),
        }
    }

    async fn respond(
        &self,
        completion: Completion,
        allow_async: bool,
    ) -> Result<Response<Body>, ProxyError> {
        let Completion {
            mut status,
            mut value,
            unused_body,
        } = completion;
        let mut result_types = Vec::new();

        if allow_async {
            if let Value::Promise(pending) = value {
                value = match pending.await {
                    Ok(resolved) => resolved,
                    Err(error) => {
                        status = StatusCode::INTERNAL_SERVER_ERROR;
                        error.into_thrown_value()
                    }
                };
                result_types.push(result_type::PROMISE);
            }
        }

        if let Some(rest) = unused_body {
            drain(rest).await;
        }

        if let Value::Stream(handle) = &value {
            let stream = handle
                .take()
                .ok_or_else(|| ProxyError::type_error("ReadableStream has already been consumed"))?;
            result_types.push(result_type::READABLE_STREAM);
            return Ok(build(status, &result_types, None, Body::wrap_stream(stream)));
        }

        let mode = if allow_async {
            StreamMode::Unbuffered
        } else {
            StreamMode::Forbid
        };
        let registry = HeapRegistry::new(&self.heap);
        let encoded = self.codec.encode_buffered(&value, mode, &registry).await?;

        Ok(match encoded.unbuffered_stream {
            None => build(status, &result_types, None, Body::from(encoded.text)),
            Some(stream) => {
                let text = Bytes::from(encoded.text);
                let size = text.len();
                build(
                    status,
                    &result_types,
                    Some(size),
                    Body::wrap_stream(prefix_stream(text, stream)),
                )
            }
        })
    }

    async fn error_response(&self, error: ProxyError) -> Response<Body> {
        debug!(error = %error, "Proxy request failed");
        let value = error.into_thrown_value();
        let registry = HeapRegistry::new(&self.heap);
        let text = match self
            .codec
            .encode_buffered(&value, StreamMode::Forbid, &registry)
            .await
        {
            Ok(encoded) => encoded.text,
            Err(e) => {
                warn!(error = %e, "Failed to encode thrown value");
                let fallback = Value::Error(ErrorValue::new("Error", e.to_string()));
                self.codec
                    .encode(&fallback, StreamMode::Forbid, &registry)
                    .map(|encoded| encoded.text)
                    .unwrap_or_default()
            }
        };
        build(StatusCode::INTERNAL_SERVER_ERROR, &[], None, Body::from(text))
    }
}

/// Wrap a value in a stream handle so it can be returned as a raw body
pub fn stream_value(bytes: impl Into<Bytes>) -> Value {
    Value::Stream(StreamHandle::from_bytes(bytes))
}

fn header(request: &Request<Body>, name: &str) -> Option<String> {
    request
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

fn live_object(target: &Value) -> Result<&Arc<dyn RemoteObject>, ProxyError> {
    as_live(target).ok_or_else(|| {
        ProxyError::type_error(format!(
            "cannot operate on a {} target",
            target.type_label()
        ))
    })
}

/// A reference to a freed address surfaces as a `ReferenceError`
fn target_error(error: CodecError) -> ProxyError {
    match error {
        CodecError::Native { message } => ProxyError::throw("ReferenceError", message),
        other => other.into(),
    }
}

fn descriptor_value(descriptor: PropertyDescriptor) -> Value {
    Value::object([
        ("configurable", Value::Bool(descriptor.configurable)),
        ("enumerable", Value::Bool(descriptor.enumerable)),
        ("writable", Value::Bool(descriptor.writable)),
    ])
}

fn passthrough_request(request: Request<Body>) -> Request<Body> {
    let (mut parts, body) = request.into_parts();
    let original = parts
        .headers
        .get(headers::ORIGINAL_URL)
        .and_then(|v| v.to_str().ok())
        .and_then(|url| url.parse::<Uri>().ok());
    for name in headers::CONTROL {
        parts.headers.remove(name);
    }
    if let Some(uri) = original {
        parts.uri = uri;
    }
    Request::from_parts(parts, body)
}

async fn drain(mut stream: ByteStream) {
    while let Some(chunk) = stream.next().await {
        if chunk.is_err() {
            break;
        }
    }
}

fn empty(status: StatusCode) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}

fn function_response() -> Response<Body> {
    build(StatusCode::NO_CONTENT, &[result_type::FUNCTION], None, Body::empty())
}

fn build(
    status: StatusCode,
    result_types: &[&str],
    stringified_size: Option<usize>,
    body: Body,
) -> Response<Body> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    let response_headers = response.headers_mut();
    if !result_types.is_empty() {
        if let Ok(value) = HeaderValue::from_str(&result_types.join(", ")) {
            response_headers.insert(headers::OP_RESULT_TYPE, value);
        }
    }
    if let Some(size) = stringified_size {
        response_headers.insert(headers::OP_STRINGIFIED_SIZE, HeaderValue::from(size));
    }
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        response_headers.insert(headers::ERROR_STACK, HeaderValue::from_static("true"));
    }
    response
}
