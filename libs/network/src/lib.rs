//! Network Infrastructure
//!
//! Loopback HTTP plumbing between the host and the sandbox process. All
//! traffic runs on one helper runtime ([`HttpWorker`]) that is shared by the
//! blocking [`SyncTransport`] and the future-based [`AsyncTransport`].

pub mod error;
pub mod transports;
pub mod worker;

pub use error::{Result, TransportError};
pub use transports::{body_stream, AsyncTransport, ResponseBody, SyncResponse, SyncTransport};
pub use worker::{HttpWorker, HttpWorkerConfig};
