//! Proxy error taxonomy
//!
//! Every failure a host caller can observe while talking to sandbox objects.
//! The type is `Clone` because pending results are shared between every
//! awaiter of the same remote promise.

use crate::value::{ErrorValue, Value};
use thiserror::Error;

/// Errors surfaced by proxy stubs and the dispatcher
#[derive(Debug, Clone, Error)]
pub enum ProxyError {
    /// The stub was created under an older epoch
    #[error(
        "Attempted to use poisoned stub. Stubs to runtime objects must be re-created after \
         calling `set_options()` or `dispose()`."
    )]
    Poisoned,

    /// The sandbox could not be reached
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// Sandbox code threw; carries the thrown value
    #[error("{}", describe_thrown(.0))]
    Thrown(Box<Value>),

    /// The dispatcher rejected the request without a structured error
    #[error("Protocol error: status {status}: {message}")]
    Protocol { status: u16, message: String },

    /// A payload could not be encoded or decoded
    #[error("Codec error: {message}")]
    Codec { message: String },

    /// The operation is not available for this kind of object
    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },
}

/// Result type alias for proxy operations
pub type Result<T> = std::result::Result<T, ProxyError>;

impl ProxyError {
    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a protocol error
    pub fn protocol(status: u16, message: impl Into<String>) -> Self {
        Self::Protocol {
            status,
            message: message.into(),
        }
    }

    /// Create a codec error
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Create an unsupported-operation error
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    /// Wrap a thrown value
    pub fn thrown(value: Value) -> Self {
        Self::Thrown(Box::new(value))
    }

    /// Throw an error object with the given constructor name
    pub fn throw(name: &str, message: impl Into<String>) -> Self {
        Self::thrown(Value::Error(ErrorValue::new(name, message)))
    }

    /// Shorthand for throwing a `TypeError`
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::throw("TypeError", message)
    }

    /// The thrown value, if this is a remote throw
    pub fn thrown_value(&self) -> Option<&Value> {
        match self {
            Self::Thrown(value) => Some(value),
            _ => None,
        }
    }

    /// The thrown error object, if the sandbox threw an `Error`
    pub fn thrown_error(&self) -> Option<&ErrorValue> {
        match self.thrown_value() {
            Some(Value::Error(error)) => Some(error),
            _ => None,
        }
    }

    /// Convert any error into the value the sandbox would have thrown
    pub fn into_thrown_value(self) -> Value {
        match self {
            Self::Thrown(value) => *value,
            Self::Poisoned => Value::Error(ErrorValue::new("Error", self.to_string())),
            Self::Codec { .. } | Self::Unsupported { .. } => {
                Value::Error(ErrorValue::new("TypeError", self.to_string()))
            }
            Self::Transport { .. } | Self::Protocol { .. } => {
                Value::Error(ErrorValue::new("Error", self.to_string()))
            }
        }
    }
}

fn describe_thrown(value: &Value) -> String {
    match value {
        Value::Error(error) => format!("{}: {}", error.name, error.message),
        other => format!("Uncaught {}", other.type_label()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thrown_errors_display_name_and_message() {
        let error = ProxyError::type_error("bad input");
        assert_eq!(error.to_string(), "TypeError: bad input");
        assert_eq!(error.thrown_error().map(|e| e.name.as_str()), Some("TypeError"));
    }

    #[test]
    fn non_error_throws_describe_their_type() {
        let error = ProxyError::thrown(Value::from("oops"));
        assert_eq!(error.to_string(), "Uncaught string");
        assert!(error.thrown_error().is_none());
    }

    #[test]
    fn local_failures_become_error_values() {
        let value = ProxyError::codec("truncated").into_thrown_value();
        match value {
            Value::Error(error) => {
                assert_eq!(error.name, "TypeError");
                assert!(error.message.contains("truncated"));
            }
            other => panic!("unexpected value {other:?}"),
        }
    }
}
