//! # Hearth Proxy
//!
//! Both ends of the object-proxy protocol.
//!
//! - [`client`]: host-side [`ProxyClient`] and the [`Stub`]s it hands out,
//!   with epoch poisoning and batched release of heap addresses
//! - [`server`]: the sandbox-side [`Dispatcher`] holding the heap of live
//!   objects, plus an HTTP front end
//!
//! ## Usage
//!
//! ```rust,no_run
//! use hearth_proxy::{ClientOptions, ProxyClient};
//! use hearth_types::Value;
//!
//! let client = ProxyClient::new(
//!     "http://127.0.0.1:8787".parse()?,
//!     b"shared-secret",
//!     ClientOptions::default(),
//! )?;
//! let encoded = client.global().call_method("btoa", vec![Value::from("hearth")])?;
//! assert_eq!(encoded.as_str(), Some("aGVhcnRo"));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod client;
pub mod server;

pub use client::{
    Bridge, ClientOptions, MethodStub, ProxyClient, Stub, StubKind, ENV_TYPE_NAME,
    GLOBAL_TYPE_NAME,
};
pub use server::{
    as_live, live, serve, stream_value, Dispatcher, Heap, LiveObject, Property, RemoteObject,
    ServeError,
};
