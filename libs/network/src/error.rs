//! Transport errors
//!
//! Failures while reaching the sandbox over loopback HTTP. Callers above the
//! transport only ever see these flattened into [`ProxyError::Transport`].

use hearth_types::ProxyError;
use std::error::Error as StdError;
use std::net::SocketAddr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    /// The sandbox refused or dropped the connection
    #[error("Connection error: {message} (remote: {remote_addr:?})")]
    Connection {
        message: String,
        remote_addr: Option<SocketAddr>,
        #[source]
        source: hyper::Error,
    },

    /// The exchange started but could not be completed
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: hyper::Error,
    },

    /// Malformed HTTP on either side
    #[error("Protocol error: {message}")]
    Protocol {
        message: String,
        #[source]
        source: hyper::Error,
    },

    /// The helper execution context has been shut down
    #[error("Transport closed: {message}")]
    Closed { message: String },

    #[error("System error: {message}")]
    System {
        message: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, TransportError>;

impl TransportError {
    pub fn network_with_source(message: impl Into<String>, source: hyper::Error) -> Self {
        Self::Network {
            message: message.into(),
            source,
        }
    }

    pub fn closed(message: impl Into<String>) -> Self {
        Self::Closed {
            message: message.into(),
        }
    }

    pub fn system(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::System {
            message: message.into(),
            source,
        }
    }

    /// Map a hyper client failure onto the matching variant
    pub fn from_hyper(error: hyper::Error, remote_addr: Option<SocketAddr>) -> Self {
        if error.is_connect() {
            Self::Connection {
                message: "failed to connect to sandbox".into(),
                remote_addr,
                source: error,
            }
        } else if error.is_parse() || error.is_user() {
            Self::Protocol {
                message: "invalid HTTP exchange".into(),
                source: error,
            }
        } else {
            Self::network_with_source("request to sandbox failed", error)
        }
    }

    /// The error followed by its source chain
    pub fn describe(&self) -> String {
        let mut description = self.to_string();
        let mut source = self.source();
        while let Some(cause) = source {
            description.push_str(": ");
            description.push_str(&cause.to_string());
            source = cause.source();
        }
        description
    }
}

impl From<TransportError> for ProxyError {
    fn from(error: TransportError) -> Self {
        ProxyError::transport(error.describe())
    }
}
