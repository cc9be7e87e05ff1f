//! Structured value model
//!
//! [`Value`] is everything the codec can carry: plain data, binary buffers,
//! header lists, errors, one-shot byte streams, live object references and
//! pending results.

pub mod headers;
pub mod pending;
pub mod stream;

use bytes::Bytes;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

use headers::Headers;
use pending::Pending;
use stream::StreamHandle;

/// Error constructor names that survive a trip across the boundary. Anything
/// else revives as a plain `Error`.
pub const ALLOWED_ERROR_NAMES: [&str; 7] = [
    "Error",
    "EvalError",
    "RangeError",
    "ReferenceError",
    "SyntaxError",
    "TypeError",
    "URIError",
];

/// A live object that can be referenced from a [`Value`]
pub trait NativeObject: Send + Sync + 'static {
    fn type_name(&self) -> &str;

    fn is_function(&self) -> bool {
        false
    }

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

pub type NativeRef = Arc<dyn NativeObject>;

#[derive(Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    /// Decimal digits, optionally signed
    BigInt(String),
    String(String),
    Array(Vec<Value>),
    /// Plain object with insertion-ordered keys
    Object(Vec<(String, Value)>),
    /// Milliseconds since the Unix epoch; NaN is an invalid date
    Date(f64),
    RegExp {
        source: String,
        flags: String,
    },
    Map(Vec<(Value, Value)>),
    Set(Vec<Value>),
    Bytes(Bytes),
    Headers(Headers),
    Error(ErrorValue),
    Stream(StreamHandle),
    Native(NativeRef),
    Promise(Pending),
}

/// A thrown or transported error object
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorValue {
    pub name: String,
    pub message: String,
    pub stack: Option<String>,
    pub cause: Option<Box<Value>>,
}

impl ErrorValue {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
            cause: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn with_cause(mut self, cause: Value) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Name restricted to the standard error constructors
    pub fn normalized_name(&self) -> &str {
        if ALLOWED_ERROR_NAMES.contains(&self.name.as_str()) {
            &self.name
        } else {
            "Error"
        }
    }
}

impl Value {
    pub fn object<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn native<T: NativeObject>(object: T) -> Self {
        Value::Native(Arc::new(object))
    }

    pub fn stream(stream: stream::ByteStream) -> Self {
        Value::Stream(StreamHandle::new(stream))
    }

    /// Property of a plain object
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Object(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Downcast a native reference to a concrete type
    pub fn native_as<T: 'static>(&self) -> Option<&T> {
        match self {
            Value::Native(native) => native.as_any().downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Downcast a native reference into an owned handle
    pub fn into_native<T: Send + Sync + 'static>(self) -> Option<Arc<T>> {
        match self {
            Value::Native(native) => native.into_any().downcast::<T>().ok(),
            _ => None,
        }
    }

    /// Await the value if it is pending, otherwise return it unchanged
    pub async fn settle(self) -> crate::Result<Value> {
        match self {
            Value::Promise(pending) => pending.await,
            other => Ok(other),
        }
    }

    /// Short label used in diagnostics
    pub fn type_label(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::BigInt(_) => "bigint",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Date(_) => "Date",
            Value::RegExp { .. } => "RegExp",
            Value::Map(_) => "Map",
            Value::Set(_) => "Set",
            Value::Bytes(_) => "ArrayBuffer",
            Value::Headers(_) => "Headers",
            Value::Error(_) => "Error",
            Value::Stream(_) => "ReadableStream",
            Value::Native(_) => "native",
            Value::Promise(_) => "Promise",
        }
    }

    /// Convert plain JSON into a value
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from_json(v))).collect())
            }
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::BigInt(a), Value::BigInt(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b || (a.is_nan() && b.is_nan()),
            (
                Value::RegExp { source, flags },
                Value::RegExp {
                    source: other_source,
                    flags: other_flags,
                },
            ) => source == other_source && flags == other_flags,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Set(a), Value::Set(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Headers(a), Value::Headers(b)) => a == b,
            (Value::Error(a), Value::Error(b)) => a == b,
            (Value::Stream(a), Value::Stream(b)) => a.ptr_eq(b),
            (Value::Native(a), Value::Native(b)) => {
                std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
            }
            (Value::Promise(a), Value::Promise(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("Undefined"),
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Value::Number(n) => f.debug_tuple("Number").field(n).finish(),
            Value::BigInt(n) => write!(f, "BigInt({n}n)"),
            Value::String(s) => f.debug_tuple("String").field(s).finish(),
            Value::Array(items) => f.debug_list().entries(items).finish(),
            Value::Object(entries) => f
                .debug_map()
                .entries(entries.iter().map(|(k, v)| (k, v)))
                .finish(),
            Value::Date(ms) => f.debug_tuple("Date").field(ms).finish(),
            Value::RegExp { source, flags } => write!(f, "RegExp(/{source}/{flags})"),
            Value::Map(entries) => f
                .debug_tuple("Map")
                .field(&entries.iter().map(|(k, v)| (k, v)).collect::<Vec<_>>())
                .finish(),
            Value::Set(items) => f.debug_tuple("Set").field(items).finish(),
            Value::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            Value::Headers(headers) => f.debug_tuple("Headers").field(&headers.entries()).finish(),
            Value::Error(error) => f.debug_tuple("Error").field(error).finish(),
            Value::Stream(stream) => f.debug_tuple("Stream").field(stream).finish(),
            Value::Native(native) => write!(f, "Native({})", native.type_name()),
            Value::Promise(_) => f.write_str("Promise"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Number(value.into())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value as f64)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::Number(value as f64)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<Bytes> for Value {
    fn from(value: Bytes) -> Self {
        Value::Bytes(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::Array(value)
    }
}

impl From<ErrorValue> for Value {
    fn from(value: ErrorValue) -> Self {
        Value::Error(value)
    }
}
