//! # Hearth Sandbox
//!
//! Reference sandbox process for the Hearth emulator. It accepts the
//! supervisor's command line, reads a bincode [`SandboxConfig`] from stdin,
//! binds the requested sockets, reports their ports on the control fd and
//! serves the proxy dispatcher on each of them.
//!
//! The global scope offers `atob`, `btoa` and `structuredClone`; the
//! environment holds text, JSON and echo-service bindings.
//!
//! Host side, [`SandboxProvider`] plugs into [`hearth::Emulator`]:
//!
//! ```rust,no_run
//! use hearth::Emulator;
//! use hearth_config::EmulatorConfig;
//! use hearth_sandbox::{Binding, SandboxProvider};
//!
//! # async fn run() -> hearth::Result<()> {
//! let mut config = EmulatorConfig::default();
//! config.runtime.binary = "hearth-sandbox".into();
//! let provider = SandboxProvider::new(vec![Binding::text("GREETING", "hi")]);
//! let emulator = Emulator::start(config, provider).await?;
//! println!("{:?}", emulator.env().await?.get("GREETING")?);
//! emulator.dispose().await;
//! # Ok(())
//! # }
//! ```

pub mod args;
pub mod config;
pub mod error;
pub mod scope;
pub mod server;

pub use args::{Cli, Command, NamedAddress, ServeArgs};
pub use config::{Binding, BindingValue, SandboxConfig, SandboxProvider};
pub use error::{Result, SandboxError};
pub use scope::{EchoService, Env, GlobalScope, Reflector};
pub use server::{run, ControlWriter};
