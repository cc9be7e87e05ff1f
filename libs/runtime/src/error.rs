//! Runtime supervisor errors

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The sandbox exited or closed its control channel before reporting
    /// every required socket
    #[error("The sandbox runtime failed to start: {kind}")]
    Startup { kind: StartupFailureKind },

    #[error("Failed to spawn sandbox executable {executable:?}: {source}")]
    Spawn {
        executable: PathBuf,
        source: std::io::Error,
    },

    #[error("Control channel error: {message}")]
    Control {
        message: String,
        source: Option<std::io::Error>,
    },
}

/// Result type alias for supervisor operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

impl RuntimeError {
    pub fn control(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Control {
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn startup_kind(&self) -> Option<&StartupFailureKind> {
        match self {
            Self::Startup { kind } => Some(kind),
            _ => None,
        }
    }
}

/// Why the sandbox failed to come up, as far as its stderr tells
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupFailureKind {
    AddressInUse { address: String },
    Unknown,
}

impl fmt::Display for StartupFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddressInUse { address } => write!(f, "address already in use ({address})"),
            Self::Unknown => f.write_str("exited before reporting its sockets"),
        }
    }
}
