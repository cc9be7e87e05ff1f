//! Sandbox configuration assembly
//!
//! The emulator knows which sockets it wants and the secret the dispatcher
//! must check; turning that into the sandbox's binary config is up to a
//! [`ConfigProvider`].

use async_trait::async_trait;
use hearth_runtime::SocketBinding;
use hearth_types::CallPolicy;

/// Everything the emulator contributes to a sandbox configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigRequest {
    /// Shared secret the dispatcher compares against `hearth-op-secret`
    pub proxy_secret: Vec<u8>,
    /// Sockets to listen on; the first one is the entry socket
    pub sockets: Vec<SocketBinding>,
    pub inspector_address: Option<String>,
    /// Call classification the host bridge uses; the dispatcher must agree
    pub policy: CallPolicy,
}

#[async_trait]
pub trait ConfigProvider: Send + Sync + 'static {
    /// Produce the bytes written to the sandbox's stdin
    async fn assemble(&self, request: &ConfigRequest) -> anyhow::Result<Vec<u8>>;
}
