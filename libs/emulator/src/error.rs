//! Emulator errors

use hearth_runtime::{RuntimeError, StartupFailureKind};
use hearth_types::ProxyError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmulatorError {
    #[error("Cannot use disposed instance")]
    Disposed,

    /// The sandbox did not come up with every socket it was asked for
    #[error(
        "The sandbox runtime failed to start ({kind}). There is likely additional logging \
         output above."
    )]
    RuntimeFailure { kind: StartupFailureKind },

    #[error("Failed to assemble sandbox configuration: {message}")]
    Config { message: String },

    #[error(transparent)]
    Runtime(RuntimeError),

    #[error(transparent)]
    Proxy(#[from] ProxyError),
}

impl From<RuntimeError> for EmulatorError {
    fn from(error: RuntimeError) -> Self {
        match error {
            RuntimeError::Startup { kind } => Self::RuntimeFailure { kind },
            other => Self::Runtime(other),
        }
    }
}

/// Result type alias for emulator operations
pub type Result<T> = std::result::Result<T, EmulatorError>;
