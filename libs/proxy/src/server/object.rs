//! Objects the dispatcher can expose to the host

use async_trait::async_trait;
use hearth_types::{NativeObject, Pending, PropertyDescriptor, ProxyError, Value};
use hyper::{Body, Request, Response};
use std::any::Any;
use std::sync::Arc;

/// Outcome of reading one property
pub enum Property {
    Missing,
    Value(Value),
    /// The property is a callable method on the object
    Method,
    /// The property must be resolved before it can be reported, even on the
    /// synchronous path
    Deferred(Pending),
}

/// A live sandbox object reachable through the heap
#[async_trait]
pub trait RemoteObject: Send + Sync + 'static {
    /// Constructor name reported to the host
    fn type_name(&self) -> &str;

    /// Whether the host should treat the object itself as callable
    fn is_function(&self) -> bool {
        false
    }

    fn get(&self, key: &str) -> Property;

    fn own_keys(&self) -> Vec<String> {
        Vec::new()
    }

    fn own_descriptor(&self, key: &str) -> Option<PropertyDescriptor> {
        self.own_keys()
            .iter()
            .any(|k| k == key)
            .then(PropertyDescriptor::data)
    }

    /// Call `method`. Asynchronous methods return [`Value::Promise`].
    fn call(&self, method: &str, _args: Vec<Value>) -> Result<Value, ProxyError> {
        Err(ProxyError::type_error(format!(
            "{}.{method} is not a function",
            self.type_name()
        )))
    }

    /// Call the object itself
    fn invoke(&self, _args: Vec<Value>) -> Result<Value, ProxyError> {
        Err(ProxyError::type_error(format!(
            "{} is not a function",
            self.type_name()
        )))
    }

    /// Handle a forwarded HTTP request
    async fn fetch(&self, _request: Request<Body>) -> Result<Response<Body>, ProxyError> {
        Err(ProxyError::type_error(format!(
            "{} does not handle fetch",
            self.type_name()
        )))
    }
}

/// Adapter that lets a [`RemoteObject`] travel inside a [`Value`]
#[derive(Clone)]
pub struct LiveObject(Arc<dyn RemoteObject>);

impl LiveObject {
    pub fn new(object: Arc<dyn RemoteObject>) -> Self {
        Self(object)
    }

    pub fn object(&self) -> &Arc<dyn RemoteObject> {
        &self.0
    }
}

impl NativeObject for LiveObject {
    fn type_name(&self) -> &str {
        self.0.type_name()
    }

    fn is_function(&self) -> bool {
        self.0.is_function()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Wrap `object` as a value the dispatcher will hand out by reference
pub fn live<T: RemoteObject>(object: T) -> Value {
    Value::native(LiveObject(Arc::new(object)))
}

/// The live object behind `value`, if it is one
pub fn as_live(value: &Value) -> Option<&Arc<dyn RemoteObject>> {
    value.native_as::<LiveObject>().map(LiveObject::object)
}
