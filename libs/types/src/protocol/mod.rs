//! Wire protocol vocabulary
//!
//! Header names, operations and fixed heap addresses spoken between the host
//! bridge and the sandbox dispatcher over loopback HTTP.

pub mod policy;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Heap address of the sandbox global scope
pub const ADDRESS_GLOBAL: u64 = 0;
/// Heap address of the sandbox environment bindings
pub const ADDRESS_ENV: u64 = 1;
/// First address handed out for user objects
pub const ADDRESS_USER_START: u64 = 2;

/// Type name given to pending results stored on the heap
pub const PROMISE_TYPE_NAME: &str = "Promise";

/// Key a `CALL` carries when the target itself is the function
pub const CALL_KEY: &str = "__call";

/// Hostnames the dispatcher accepts in the `Host` header
pub const ALLOWED_HOSTNAMES: [&str; 3] = ["127.0.0.1", "[::1]", "localhost"];

/// Request and response header names, in canonical lowercase form
pub mod headers {
    pub const OP_SECRET: &str = "hearth-op-secret";
    pub const OP: &str = "hearth-op";
    pub const OP_TARGET: &str = "hearth-op-target";
    pub const OP_KEY: &str = "hearth-op-key";
    pub const OP_SYNC: &str = "hearth-op-sync";
    pub const OP_STRINGIFIED_SIZE: &str = "hearth-op-stringified-size";
    pub const OP_RESULT_TYPE: &str = "hearth-op-result-type";
    pub const ERROR_STACK: &str = "hearth-error-stack";
    pub const ORIGINAL_URL: &str = "hearth-original-url";

    /// Headers stripped from fetch-passthrough requests before they reach
    /// the target object
    pub const CONTROL: [&str; 7] = [
        OP_SECRET,
        OP,
        OP_TARGET,
        OP_KEY,
        OP_SYNC,
        OP_STRINGIFIED_SIZE,
        ORIGINAL_URL,
    ];
}

/// Values of the result-type response header
pub mod result_type {
    pub const PROMISE: &str = "Promise";
    pub const READABLE_STREAM: &str = "ReadableStream";
    pub const FUNCTION: &str = "Function";
}

/// Proxy operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyOp {
    Get,
    GetOwnDescriptor,
    GetOwnKeys,
    Call,
    Free,
}

impl ProxyOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyOp::Get => "GET",
            ProxyOp::GetOwnDescriptor => "GET_OWN_DESCRIPTOR",
            ProxyOp::GetOwnKeys => "GET_OWN_KEYS",
            ProxyOp::Call => "CALL",
            ProxyOp::Free => "FREE",
        }
    }
}

impl fmt::Display for ProxyOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProxyOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(ProxyOp::Get),
            "GET_OWN_DESCRIPTOR" => Ok(ProxyOp::GetOwnDescriptor),
            "GET_OWN_KEYS" => Ok(ProxyOp::GetOwnKeys),
            "CALL" => Ok(ProxyOp::Call),
            "FREE" => Ok(ProxyOp::Free),
            other => Err(format!("unknown proxy operation: {other}")),
        }
    }
}

/// Reference to a live object held in the sandbox heap
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NativeTarget {
    pub address: u64,
    pub type_name: String,
    pub is_function: bool,
}

impl NativeTarget {
    pub fn new(address: u64, type_name: impl Into<String>, is_function: bool) -> Self {
        Self {
            address,
            type_name: type_name.into(),
            is_function,
        }
    }

    /// Roots are never released through the batched free
    pub fn is_root(&self) -> bool {
        self.address < ADDRESS_USER_START
    }

    pub fn is_pending(&self) -> bool {
        self.type_name == PROMISE_TYPE_NAME
    }
}

/// Property descriptor flags reported by `GET_OWN_DESCRIPTOR`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    pub configurable: bool,
    pub enumerable: bool,
    pub writable: bool,
}

impl PropertyDescriptor {
    /// Descriptor of an ordinary data property
    pub fn data() -> Self {
        Self {
            configurable: true,
            enumerable: true,
            writable: true,
        }
    }
}
