//! Host-side proxy bridge
//!
//! [`ProxyClient`] hands out [`Stub`]s for the sandbox's global scope and
//! environment. Every stub shares one [`Bridge`], which owns the transports,
//! the codec and the current epoch.
//!
//! ## Epochs
//!
//! Each stub remembers the epoch it was created under. [`ProxyClient::poison`]
//! bumps the epoch, after which older stubs fail with
//! [`ProxyError::Poisoned`] without touching the network.

mod gc;
mod registry;
pub mod stub;

use bytes::Bytes;
use hearth_codec::{read_prefix, Codec, CodecError};
use hearth_network::{
    body_stream, AsyncTransport, HttpWorker, HttpWorkerConfig, ResponseBody, SyncResponse,
    SyncTransport,
};
use hearth_types::protocol::{headers, result_type};
use hearth_types::{
    CallPolicy, NativeTarget, Pending, ProxyError, ProxyOp, StreamHandle, Value, ADDRESS_ENV,
    ADDRESS_GLOBAL,
};
use hyper::http::request::Builder;
use hyper::{Body, HeaderMap, Method, Request, Response, StatusCode, Uri};
use parking_lot::{Mutex, RwLock};
use std::panic::Location;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use gc::{FreeQueue, PendingFree};
use registry::HostRegistry;
pub use stub::{MethodStub, Stub, StubKind};

/// Type names reported for the two root objects
pub const GLOBAL_TYPE_NAME: &str = "ServiceWorkerGlobalScope";
pub const ENV_TYPE_NAME: &str = "Object";

#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Quiet period after the last dropped stub before a `FREE` is sent
    pub free_debounce: Duration,
    pub policy: CallPolicy,
    pub worker: HttpWorkerConfig,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            free_debounce: Duration::from_millis(100),
            policy: CallPolicy::default(),
            worker: HttpWorkerConfig::default(),
        }
    }
}

/// State shared by every stub of one client
pub struct Bridge {
    url: RwLock<Uri>,
    secret_hex: String,
    epoch: AtomicU64,
    worker: Arc<HttpWorker>,
    sync: SyncTransport,
    transport: AsyncTransport,
    codec: Codec,
    policy: CallPolicy,
    frees: FreeQueue,
}

impl Bridge {
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub fn url(&self) -> Uri {
        self.url.read().clone()
    }

    pub(crate) fn policy(&self) -> &CallPolicy {
        &self.policy
    }

    pub(crate) fn codec(&self) -> &Codec {
        &self.codec
    }

    pub(crate) fn worker(&self) -> &Arc<HttpWorker> {
        &self.worker
    }

    pub(crate) fn queue_free(&self, address: u64, epoch: u64) {
        self.frees.push(PendingFree { address, epoch });
    }

    pub(crate) fn registry(self: &Arc<Self>, caller: &'static Location<'static>) -> HostRegistry {
        HostRegistry {
            bridge: self.clone(),
            caller,
        }
    }

    /// Request carrying the secret and operation headers
    pub(crate) fn builder(
        &self,
        op: ProxyOp,
        target: &str,
        key: Option<&str>,
        sync: bool,
    ) -> Builder {
        let method = if op == ProxyOp::Free {
            Method::DELETE
        } else {
            Method::POST
        };
        let mut builder = Request::builder()
            .method(method)
            .uri(self.url())
            .header(headers::OP_SECRET, self.secret_hex.as_str())
            .header(headers::OP, op.as_str())
            .header(headers::OP_TARGET, target);
        if let Some(key) = key {
            builder = builder.header(headers::OP_KEY, key);
        }
        if sync {
            builder = builder.header(headers::OP_SYNC, "true");
        }
        builder
    }

    pub(crate) fn send_sync(&self, request: Request<Body>) -> Result<SyncResponse, ProxyError> {
        Ok(self.sync.request(request)?)
    }

    pub(crate) async fn send_async(
        &self,
        request: Request<Body>,
    ) -> Result<Response<Body>, ProxyError> {
        Ok(self.transport.request(request).await?)
    }

    /// Send the follow-up request that resolves a promise parked on the
    /// sandbox heap. The request goes out immediately.
    pub(crate) fn resolve_pending(
        self: &Arc<Self>,
        target: NativeTarget,
        caller: &'static Location<'static>,
    ) -> Pending {
        let epoch = self.epoch();
        let request = self
            .builder(ProxyOp::Get, &self.codec.encode_target(&target), None, false)
            .body(Body::empty())
            .map_err(invalid_request);
        let response = request.map(|request| self.transport.request(request));
        let bridge = self.clone();

        Pending::new(async move {
            let response = response?.await?;
            if bridge.epoch() != epoch {
                return Err(ProxyError::Poisoned);
            }
            bridge.parse_async(response, caller).await
        })
    }

    pub(crate) fn parse_sync(
        self: &Arc<Self>,
        response: SyncResponse,
        caller: &'static Location<'static>,
    ) -> Result<Value, ProxyError> {
        check_status(response.status, || response.bytes())?;
        if response.headers.contains_key(headers::OP_STRINGIFIED_SIZE) {
            return Err(ProxyError::codec(
                "unexpected unbuffered stream in synchronous response",
            ));
        }
        if response.status == StatusCode::NO_CONTENT {
            return Ok(Value::Undefined);
        }

        let status = response.status;
        let text = match response.body {
            ResponseBody::Streaming(stream) => {
                return Ok(Value::Stream(StreamHandle::new(stream)));
            }
            ResponseBody::Buffered(bytes) => bytes,
        };
        let value = self.codec.decode(utf8(&text)?, None, &self.registry(caller))?;
        finish(status, value, caller)
    }

    pub(crate) async fn parse_async(
        self: &Arc<Self>,
        response: Response<Body>,
        caller: &'static Location<'static>,
    ) -> Result<Value, ProxyError> {
        let (parts, body) = response.into_parts();
        if parts.status.is_client_error() {
            let bytes = hyper::body::to_bytes(body).await.unwrap_or_default();
            return Err(rejection(parts.status, &bytes));
        }
        if parts.status == StatusCode::NO_CONTENT {
            return Ok(Value::Undefined);
        }
        if result_types(&parts.headers).any(|t| t == result_type::READABLE_STREAM) {
            return Ok(Value::Stream(StreamHandle::new(body_stream(body))));
        }

        let (text, rest) = match stringified_size(&parts.headers)? {
            Some(size) => {
                let (prefix, rest) = read_prefix(body_stream(body), size)
                    .await
                    .map_err(CodecError::from)?;
                (prefix, Some(rest))
            }
            None => {
                let bytes = hyper::body::to_bytes(body)
                    .await
                    .map_err(|e| ProxyError::transport(format!("failed to read response: {e}")))?;
                (bytes, None)
            }
        };
        let value = self
            .codec
            .decode(utf8(&text)?, rest, &self.registry(caller))?;
        finish(parts.status, value, caller)
    }

    /// Release heap addresses in one request
    pub(crate) async fn free(&self, addresses: &[u64]) -> Result<(), ProxyError> {
        let list = addresses
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        debug!(count = addresses.len(), "Freeing sandbox heap addresses");
        let request = self
            .builder(ProxyOp::Free, &list, None, false)
            .body(Body::empty())
            .map_err(invalid_request)?;
        let response = self.send_async(request).await?;
        check_status(response.status(), Bytes::new)
    }
}

pub(crate) fn invalid_request(error: hyper::http::Error) -> ProxyError {
    ProxyError::codec(format!("invalid proxy request: {error}"))
}

fn utf8(bytes: &Bytes) -> Result<&str, ProxyError> {
    std::str::from_utf8(bytes).map_err(|_| ProxyError::codec("response is not valid UTF-8"))
}

fn result_types(headers: &HeaderMap) -> impl Iterator<Item = &str> {
    headers
        .get(headers::OP_RESULT_TYPE)
        .and_then(|v| v.to_str().ok())
        .into_iter()
        .flat_map(|v| v.split(','))
        .map(str::trim)
}

pub(crate) fn is_function_result(headers: &HeaderMap) -> bool {
    result_types(headers).any(|t| t == result_type::FUNCTION)
}

fn stringified_size(headers: &HeaderMap) -> Result<Option<usize>, ProxyError> {
    match headers
        .get(headers::OP_STRINGIFIED_SIZE)
        .and_then(|v| v.to_str().ok())
    {
        Some(size) => size
            .parse()
            .map(Some)
            .map_err(|_| ProxyError::codec(format!("invalid stringified size {size}"))),
        None => Ok(None),
    }
}

/// Bare rejections from the dispatcher carry no structured body
fn check_status(status: StatusCode, body: impl FnOnce() -> Bytes) -> Result<(), ProxyError> {
    if status.is_client_error() {
        return Err(rejection(status, &body()));
    }
    Ok(())
}

fn rejection(status: StatusCode, body: &Bytes) -> ProxyError {
    let message = String::from_utf8_lossy(body);
    let message = if message.is_empty() {
        status.canonical_reason().unwrap_or("rejected").to_string()
    } else {
        message.into_owned()
    };
    ProxyError::protocol(status.as_u16(), message)
}

fn finish(
    status: StatusCode,
    value: Value,
    caller: &'static Location<'static>,
) -> Result<Value, ProxyError> {
    match status {
        StatusCode::OK => Ok(value),
        StatusCode::INTERNAL_SERVER_ERROR => Err(ProxyError::thrown(rebase_stack(value, caller))),
        other => Err(ProxyError::protocol(
            other.as_u16(),
            "unexpected status from dispatcher",
        )),
    }
}

/// Point the stack of a thrown error at the host call site, keeping the
/// sandbox frames underneath
fn rebase_stack(value: Value, caller: &'static Location<'static>) -> Value {
    let Value::Error(mut error) = value else {
        return value;
    };
    let mut stack = format!(
        "{}: {}\n    at {}:{}:{}",
        error.name,
        error.message,
        caller.file(),
        caller.line(),
        caller.column()
    );
    if let Some(remote) = &error.stack {
        for frame in remote.lines().filter(|l| l.trim_start().starts_with("at ")) {
            stack.push_str("\n    ");
            stack.push_str(frame.trim_start());
        }
    }
    error.stack = Some(stack);
    Value::Error(error)
}

#[derive(Default)]
struct Roots {
    global: Option<Arc<Stub>>,
    env: Option<Arc<Stub>>,
}

/// Entry point to the sandbox's objects
pub struct ProxyClient {
    bridge: Arc<Bridge>,
    roots: Mutex<Roots>,
}

impl ProxyClient {
    pub fn new(entry_url: Uri, secret: &[u8], options: ClientOptions) -> Result<Self, ProxyError> {
        let worker = Arc::new(HttpWorker::new(&options.worker)?);
        let (frees, rx) = FreeQueue::new();
        let bridge = Arc::new(Bridge {
            url: RwLock::new(entry_url),
            secret_hex: hex::encode(secret),
            epoch: AtomicU64::new(0),
            sync: SyncTransport::new(worker.clone()),
            transport: AsyncTransport::new(worker.clone()),
            worker: worker.clone(),
            codec: Codec::new(),
            policy: options.policy,
            frees,
        });
        worker.spawn(gc::flush_loop(
            Arc::downgrade(&bridge),
            rx,
            options.free_debounce,
        ))?;
        info!(url = %bridge.url(), "Proxy client ready");

        Ok(Self {
            bridge,
            roots: Mutex::new(Roots::default()),
        })
    }

    /// Stub for the sandbox global scope
    pub fn global(&self) -> Arc<Stub> {
        let mut roots = self.roots.lock();
        roots
            .global
            .get_or_insert_with(|| {
                Stub::new(
                    self.bridge.clone(),
                    NativeTarget::new(ADDRESS_GLOBAL, GLOBAL_TYPE_NAME, false),
                )
            })
            .clone()
    }

    /// Stub for the sandbox environment bindings
    pub fn env(&self) -> Arc<Stub> {
        let mut roots = self.roots.lock();
        roots
            .env
            .get_or_insert_with(|| {
                Stub::new(
                    self.bridge.clone(),
                    NativeTarget::new(ADDRESS_ENV, ENV_TYPE_NAME, false),
                )
            })
            .clone()
    }

    pub fn epoch(&self) -> u64 {
        self.bridge.epoch()
    }

    /// Invalidate every stub handed out so far
    pub fn poison(&self) {
        let epoch = self.bridge.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        *self.roots.lock() = Roots::default();
        debug!(epoch, "Poisoned proxy stubs");
    }

    /// Point the client at a restarted sandbox
    pub fn set_runtime_entry_url(&self, url: Uri) {
        debug!(%url, "Updated proxy entry URL");
        *self.bridge.url.write() = url;
    }

    pub fn entry_url(&self) -> Uri {
        self.bridge.url()
    }

    /// Poison every stub and stop the helper runtime. Roots stay poisoned.
    pub fn dispose(&self) {
        self.bridge.epoch.fetch_add(1, Ordering::AcqRel);
        self.bridge.worker.shutdown();
    }
}

impl Drop for ProxyClient {
    fn drop(&mut self) {
        self.bridge.worker.shutdown();
    }
}
