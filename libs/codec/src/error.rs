//! Codec errors
//!
//! Each variant carries enough context to locate the offending node in a
//! flattened payload.

use hearth_types::ProxyError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    /// Payload text does not follow the flattened format
    #[error("Malformed payload: {message} (node: {node:?})")]
    Malformed {
        message: String,
        node: Option<usize>,
    },

    /// Typed node uses a tag no extension handles
    #[error("Unknown tag {tag:?} at node {node}")]
    UnknownTag { tag: String, node: usize },

    /// A live stream cannot travel on this path
    #[error("Value requires buffering: {reason}")]
    RequiresBuffering { reason: String },

    /// No encoding exists for the value
    #[error("Cannot serialize value of type {type_label}")]
    Unserializable { type_label: String },

    /// Nesting exceeds the decoder limit
    #[error("Nesting exceeds {limit} levels")]
    TooDeep { limit: usize },

    /// The side-specific registry refused a native reference
    #[error("Native reference error: {message}")]
    Native { message: String },

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Stream I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for codec operations
pub type Result<T> = std::result::Result<T, CodecError>;

impl CodecError {
    pub fn malformed(message: impl Into<String>, node: Option<usize>) -> Self {
        Self::Malformed {
            message: message.into(),
            node,
        }
    }

    pub fn requires_buffering(reason: impl Into<String>) -> Self {
        Self::RequiresBuffering {
            reason: reason.into(),
        }
    }

    pub fn native(message: impl Into<String>) -> Self {
        Self::Native {
            message: message.into(),
        }
    }

    /// True when a stream must be buffered before this value can be encoded
    pub fn is_requires_buffering(&self) -> bool {
        matches!(self, Self::RequiresBuffering { .. })
    }
}

impl From<CodecError> for ProxyError {
    fn from(error: CodecError) -> Self {
        ProxyError::codec(error.to_string())
    }
}
