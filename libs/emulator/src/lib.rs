//! # Hearth
//!
//! Local emulator for a sandboxed-worker runtime. An [`Emulator`] starts the
//! sandbox process, waits for its sockets and hands out proxy stubs for the
//! objects living inside it.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use hearth::{ConfigProvider, ConfigRequest, Emulator};
//! use hearth_config::EmulatorConfig;
//!
//! struct Blob(Vec<u8>);
//!
//! #[async_trait]
//! impl ConfigProvider for Blob {
//!     async fn assemble(&self, _request: &ConfigRequest) -> anyhow::Result<Vec<u8>> {
//!         Ok(self.0.clone())
//!     }
//! }
//!
//! # async fn run() -> hearth::Result<()> {
//! let emulator = Emulator::start(EmulatorConfig::default(), Blob(Vec::new())).await?;
//! let text = emulator.env().await?.get("TEXT")?;
//! println!("{text:?}");
//! emulator.dispose().await;
//! # Ok(())
//! # }
//! ```

pub mod emulator;
pub mod error;
pub mod provider;

pub use emulator::{Emulator, ENTRY_SOCKET};
pub use error::{EmulatorError, Result};
pub use provider::{ConfigProvider, ConfigRequest};

// Types callers need to work with stubs
pub use hearth_proxy::{MethodStub, Stub, StubKind};
pub use hearth_types::{ProxyError, Value};
