//! Proxy stubs
//!
//! A [`Stub`] stands in for one live object on the sandbox heap. Property
//! reads, method calls and key listings become proxy requests; results that
//! cannot change (methods, nested references, streams, descriptors, key
//! lists) are cached on the stub.

use bytes::Bytes;
use hearth_codec::{collect_streams, prefix_stream, StreamMode};
use hearth_network::SyncResponse;
use hearth_types::protocol::{headers, CALL_KEY};
use hearth_types::{
    NativeObject, NativeTarget, Pending, PropertyDescriptor, ProxyError, ProxyOp, Result, Value,
};
use hyper::header::{HeaderValue, CONTENT_LENGTH, HOST};
use hyper::{Body, Request, Response};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::Location;
use std::sync::Arc;
use tracing::debug;

use super::{invalid_request, is_function_result, Bridge};

/// Whether the remote object can itself be called
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubKind {
    Callable,
    ObjectLike,
}

#[derive(Default)]
struct StubCache {
    values: HashMap<String, Value>,
    methods: HashSet<String>,
    known_async: HashSet<String>,
    descriptors: HashMap<String, Option<PropertyDescriptor>>,
    own_keys: Option<Vec<String>>,
}

pub struct Stub {
    bridge: Arc<Bridge>,
    target: NativeTarget,
    encoded_target: String,
    epoch: u64,
    cache: Mutex<StubCache>,
}

impl Stub {
    pub(crate) fn new(bridge: Arc<Bridge>, target: NativeTarget) -> Arc<Self> {
        let encoded_target = bridge.codec().encode_target(&target);
        Arc::new(Self {
            epoch: bridge.epoch(),
            bridge,
            target,
            encoded_target,
            cache: Mutex::new(StubCache::default()),
        })
    }

    pub fn target(&self) -> &NativeTarget {
        &self.target
    }

    pub fn type_name(&self) -> &str {
        &self.target.type_name
    }

    pub fn kind(&self) -> StubKind {
        if self.target.is_function {
            StubKind::Callable
        } else {
            StubKind::ObjectLike
        }
    }

    pub fn is_poisoned(&self) -> bool {
        self.epoch != self.bridge.epoch()
    }

    fn check_epoch(&self) -> Result<()> {
        if self.is_poisoned() {
            return Err(ProxyError::Poisoned);
        }
        Ok(())
    }

    /// Read property `key`. Methods come back as [`MethodStub`] values.
    #[track_caller]
    pub fn get(self: &Arc<Self>, key: &str) -> Result<Value> {
        let caller = Location::caller();
        self.check_epoch()?;
        {
            let cache = self.cache.lock();
            if let Some(value) = cache.values.get(key) {
                return Ok(value.clone());
            }
            if cache.methods.contains(key) {
                return Ok(self.method(key));
            }
        }

        let response = self.sync_request(ProxyOp::Get, Some(key))?;
        if is_function_result(&response.headers) {
            self.cache.lock().methods.insert(key.to_string());
            return Ok(self.method(key));
        }
        let value = self.bridge.parse_sync(response, caller)?;
        if matches!(value, Value::Native(_) | Value::Stream(_)) {
            self.cache
                .lock()
                .values
                .insert(key.to_string(), value.clone());
        }
        Ok(value)
    }

    /// True when property `key` reads as anything but `undefined`
    #[track_caller]
    pub fn has(self: &Arc<Self>, key: &str) -> Result<bool> {
        Ok(!self.get(key)?.is_undefined())
    }

    #[track_caller]
    pub fn own_keys(self: &Arc<Self>) -> Result<Vec<String>> {
        let caller = Location::caller();
        self.check_epoch()?;
        if let Some(keys) = &self.cache.lock().own_keys {
            return Ok(keys.clone());
        }

        let response = self.sync_request(ProxyOp::GetOwnKeys, None)?;
        let keys = match self.bridge.parse_sync(response, caller)? {
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(key) => Ok(key),
                    other => Err(ProxyError::codec(format!(
                        "own key must be a string, got {}",
                        other.type_label()
                    ))),
                })
                .collect::<Result<Vec<_>>>()?,
            other => {
                return Err(ProxyError::codec(format!(
                    "own keys must be an array, got {}",
                    other.type_label()
                )))
            }
        };
        self.cache.lock().own_keys = Some(keys.clone());
        Ok(keys)
    }

    #[track_caller]
    pub fn own_descriptor(self: &Arc<Self>, key: &str) -> Result<Option<PropertyDescriptor>> {
        let caller = Location::caller();
        self.check_epoch()?;
        if let Some(descriptor) = self.cache.lock().descriptors.get(key) {
            return Ok(*descriptor);
        }

        let response = self.sync_request(ProxyOp::GetOwnDescriptor, Some(key))?;
        let descriptor = match self.bridge.parse_sync(response, caller)? {
            Value::Undefined => None,
            value @ Value::Object(_) => {
                let flag = |name| value.get(name).and_then(Value::as_bool).unwrap_or(false);
                Some(PropertyDescriptor {
                    configurable: flag("configurable"),
                    enumerable: flag("enumerable"),
                    writable: flag("writable"),
                })
            }
            other => {
                return Err(ProxyError::codec(format!(
                    "descriptor must be an object, got {}",
                    other.type_label()
                )))
            }
        };
        self.cache
            .lock()
            .descriptors
            .insert(key.to_string(), descriptor);
        Ok(descriptor)
    }

    /// Call method `key`. Asynchronous results come back as
    /// [`Value::Promise`].
    #[track_caller]
    pub fn call_method(self: &Arc<Self>, key: &str, args: Vec<Value>) -> Result<Value> {
        let caller = Location::caller();
        self.check_epoch()?;
        self.invoke_key(key, args, caller)
    }

    /// Call the remote object itself
    #[track_caller]
    pub fn call(self: &Arc<Self>, args: Vec<Value>) -> Result<Value> {
        let caller = Location::caller();
        self.check_epoch()?;
        if self.kind() != StubKind::Callable {
            return Err(ProxyError::type_error(format!(
                "{} is not a function",
                self.type_name()
            )));
        }
        self.invoke_key(CALL_KEY, args, caller)
    }

    /// Forward a raw HTTP request to a fetch-capable object and return its
    /// raw response
    pub async fn fetch(&self, request: Request<Body>) -> Result<Response<Body>> {
        self.check_epoch()?;
        let fetch_key = self.bridge.policy().fetch_key.clone();
        if !self
            .bridge
            .policy()
            .is_fetch_passthrough(self.type_name(), Some(&fetch_key))
        {
            return Err(ProxyError::unsupported(format!(
                "{} does not accept raw requests",
                self.type_name()
            )));
        }

        let (mut parts, body) = request.into_parts();
        let original_url = HeaderValue::from_str(&parts.uri.to_string())
            .map_err(|e| ProxyError::codec(format!("invalid request URL: {e}")))?;
        let (proxy_parts, ()) = self
            .bridge
            .builder(ProxyOp::Call, &self.encoded_target, Some(&fetch_key), false)
            .body(())
            .map_err(invalid_request)?
            .into_parts();

        parts.headers.remove(HOST);
        for (name, value) in &proxy_parts.headers {
            parts.headers.insert(name.clone(), value.clone());
        }
        parts.headers.insert(headers::ORIGINAL_URL, original_url);
        parts.uri = proxy_parts.uri;
        debug!(target = %self.type_name(), method = %parts.method, "Forwarding fetch");

        self.bridge
            .send_async(Request::from_parts(parts, body))
            .await
    }

    fn method(self: &Arc<Self>, key: &str) -> Value {
        Value::native(MethodStub {
            parent: self.clone(),
            key: key.to_string(),
        })
    }

    fn sync_request(&self, op: ProxyOp, key: Option<&str>) -> Result<SyncResponse> {
        let request = self
            .bridge
            .builder(op, &self.encoded_target, key, true)
            .body(Body::empty())
            .map_err(invalid_request)?;
        self.bridge.send_sync(request)
    }

    fn invoke_key(
        self: &Arc<Self>,
        key: &str,
        args: Vec<Value>,
        caller: &'static Location<'static>,
    ) -> Result<Value> {
        let policy = self.bridge.policy();
        if policy.is_fetch_passthrough(self.type_name(), Some(key)) {
            return Err(ProxyError::unsupported(format!(
                "{}.{key} takes a raw request; use Stub::fetch",
                self.type_name()
            )));
        }

        let args = Value::Array(args);
        let go_async = !collect_streams(&args).is_empty()
            || policy.is_always_async(self.type_name())
            || self.cache.lock().known_async.contains(key);
        if go_async {
            return Ok(Value::Promise(self.call_async(key, args, caller)));
        }
        self.call_sync(key, args, caller)
    }

    fn call_sync(
        self: &Arc<Self>,
        key: &str,
        args: Value,
        caller: &'static Location<'static>,
    ) -> Result<Value> {
        let encoded =
            self.bridge
                .codec()
                .encode(&args, StreamMode::Forbid, &self.bridge.registry(caller))?;
        let size = encoded.text.len();
        let request = self
            .bridge
            .builder(ProxyOp::Call, &self.encoded_target, Some(key), true)
            .header(headers::OP_STRINGIFIED_SIZE, size)
            .header(CONTENT_LENGTH, size)
            .body(Body::from(encoded.text))
            .map_err(invalid_request)?;

        let value = self
            .bridge
            .parse_sync(self.bridge.send_sync(request)?, caller)?;
        if matches!(value, Value::Promise(_)) {
            debug!(target = %self.type_name(), key, "Method is asynchronous");
            self.cache.lock().known_async.insert(key.to_string());
        }

        if self
            .bridge
            .policy()
            .is_mutating_argument(self.type_name(), Some(key))
        {
            if let (Some(Value::Headers(original)), Value::Headers(written)) =
                (args.as_array().and_then(|args| args.first()), &value)
            {
                for (name, value) in written.entries() {
                    original.set(&name, value);
                }
            }
            return Ok(Value::Undefined);
        }
        Ok(value)
    }

    /// Send the call on the helper runtime right away; the returned value
    /// only waits for the outcome
    fn call_async(
        self: &Arc<Self>,
        key: &str,
        args: Value,
        caller: &'static Location<'static>,
    ) -> Pending {
        let stub = self.clone();
        let key = key.to_string();
        let task = self.bridge.worker().spawn(async move {
            let bridge = &stub.bridge;
            let encoded = bridge
                .codec()
                .encode_buffered(&args, StreamMode::Unbuffered, &bridge.registry(caller))
                .await?;
            let text = Bytes::from(encoded.text);
            let size = text.len();

            let builder = bridge
                .builder(ProxyOp::Call, &stub.encoded_target, Some(&key), false)
                .header(headers::OP_STRINGIFIED_SIZE, size);
            let request = match encoded.unbuffered_stream {
                Some(stream) => builder.body(Body::wrap_stream(prefix_stream(text, stream))),
                None => builder.header(CONTENT_LENGTH, size).body(Body::from(text)),
            }
            .map_err(invalid_request)?;

            let response = bridge.send_async(request).await?;
            if stub.is_poisoned() {
                return Err(ProxyError::Poisoned);
            }
            bridge.parse_async(response, caller).await
        });

        Pending::new(async move {
            task?
                .await
                .map_err(|e| ProxyError::transport(format!("call task did not complete: {e}")))?
        })
    }
}

impl NativeObject for Stub {
    fn type_name(&self) -> &str {
        &self.target.type_name
    }

    fn is_function(&self) -> bool {
        self.target.is_function
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl fmt::Debug for Stub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyStub")
            .field("name", &self.target.type_name)
            .field("poisoned", &self.is_poisoned())
            .finish()
    }
}

impl Drop for Stub {
    fn drop(&mut self) {
        // Roots live as long as the dispatcher; stale addresses may already
        // belong to a new sandbox
        if self.target.is_root() || self.is_poisoned() {
            return;
        }
        self.bridge.queue_free(self.target.address, self.epoch);
    }
}

/// A method read off a stub, bound to its receiver
pub struct MethodStub {
    parent: Arc<Stub>,
    key: String,
}

impl MethodStub {
    pub fn name(&self) -> &str {
        &self.key
    }

    pub fn receiver(&self) -> &Arc<Stub> {
        &self.parent
    }

    #[track_caller]
    pub fn call(&self, args: Vec<Value>) -> Result<Value> {
        let caller = Location::caller();
        self.parent.check_epoch()?;
        self.parent.invoke_key(&self.key, args, caller)
    }
}

impl NativeObject for MethodStub {
    fn type_name(&self) -> &str {
        "Function"
    }

    fn is_function(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl fmt::Debug for MethodStub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyStub")
            .field("name", &format_args!("{}.{}", self.parent.type_name(), self.key))
            .field("poisoned", &self.parent.is_poisoned())
            .finish()
    }
}
