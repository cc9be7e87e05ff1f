//! # Hearth Shared Types
//!
//! Value model, wire protocol vocabulary and error taxonomy shared by both
//! sides of the Hearth object proxy: the host-side bridge and the
//! sandbox-side dispatcher.
//!
//! ## Design Philosophy
//!
//! - **One value model**: everything that crosses the process boundary is a
//!   [`Value`], whether it is plain data, a live reference or a stream
//! - **References are not data**: live objects travel as [`NativeTarget`]s,
//!   never as copies
//! - **Errors are values**: a remote throw carries the thrown [`Value`] so the
//!   host sees the same name, message and cause chain
//!
//! ## Quick Start
//!
//! ```rust
//! use hearth_types::{Headers, Value};
//!
//! let headers = Headers::new();
//! headers.append("set-cookie", "a=1");
//! headers.append("set-cookie", "b=2");
//! assert_eq!(headers.get_set_cookie(), vec!["a=1", "b=2"]);
//!
//! let value = Value::object([("status", Value::from(200)), ("headers", Value::Headers(headers))]);
//! assert_eq!(value.get("status"), Some(&Value::Number(200.0)));
//! ```

pub mod common;
pub mod protocol;
pub mod value;

pub use common::errors::{ProxyError, Result};
pub use protocol::policy::CallPolicy;
pub use protocol::{
    NativeTarget, PropertyDescriptor, ProxyOp, ADDRESS_ENV, ADDRESS_GLOBAL, ADDRESS_USER_START,
};
pub use value::headers::Headers;
pub use value::pending::Pending;
pub use value::stream::{ByteStream, StreamHandle};
pub use value::{ErrorValue, NativeObject, NativeRef, Value, ALLOWED_ERROR_NAMES};
