//! # Hearth Runtime
//!
//! Supervises the sandbox subprocess: spawns it with its configuration on
//! stdin, learns the ports of its listening sockets over a control pipe on
//! fd 3, forwards its output into tracing and tears it down again.
//!
//! ```rust,no_run
//! use hearth_runtime::{RuntimeOptions, StartOutcome, Supervisor};
//!
//! # async fn run() -> hearth_runtime::Result<()> {
//! let options = RuntimeOptions::new("hearth-sandbox").with_socket("entry", "127.0.0.1:0");
//! let mut supervisor = Supervisor::new();
//! if let StartOutcome::Ready(ports) = supervisor.start(b"config", &options, None).await? {
//!     println!("entry on {}", ports["entry"]);
//! }
//! supervisor.dispose().await;
//! # Ok(())
//! # }
//! ```

pub mod abort;
pub mod classify;
pub mod control;
pub mod error;
pub mod stdio;
pub mod supervisor;

pub use abort::{AbortController, AbortSignal};
pub use classify::{classify_line, classify_startup_failure, LineClass};
pub use control::{ControlMessage, CONTROL_FD, INSPECTOR_SOCKET_ID};
pub use error::{Result, RuntimeError, StartupFailureKind};
pub use stdio::{LogStdio, StdioHandler, StdioStream};
pub use supervisor::{RuntimeOptions, SocketBinding, SocketPorts, StartOutcome, Supervisor};
