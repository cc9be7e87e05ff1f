//! Control channel between the supervisor and the sandbox
//!
//! The sandbox writes newline-delimited JSON events to file descriptor 3 once
//! each of its sockets is listening. The supervisor creates the pipe, hands
//! the write end to the child as fd 3 and reads events from the other end.

use std::collections::{HashMap, HashSet};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
use nix::unistd::{dup2, pipe2};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::net::unix::pipe;
use tracing::{debug, trace};

use crate::abort::AbortSignal;
use crate::error::{Result, RuntimeError};

/// Descriptor number the sandbox writes control events to
pub const CONTROL_FD: RawFd = 3;

/// Socket id reported for the inspector listener
pub const INSPECTOR_SOCKET_ID: &str = "inspector";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ControlMessage {
    #[serde(rename = "listen")]
    Listen { socket: String, port: u16 },
    #[serde(rename = "listen-inspector")]
    ListenInspector { port: u16 },
}

impl ControlMessage {
    /// Parse one line. Lines that aren't a recognised event yield `None`.
    pub fn parse(line: &str) -> Option<Self> {
        serde_json::from_str(line.trim()).ok()
    }

    pub fn to_line(&self) -> String {
        // Serializing a plain tagged enum cannot fail
        let mut line = serde_json::to_string(self).unwrap_or_default();
        line.push('\n');
        line
    }

    fn socket_and_port(&self) -> (&str, u16) {
        match self {
            Self::Listen { socket, port } => (socket, *port),
            Self::ListenInspector { port } => (INSPECTOR_SOCKET_ID, *port),
        }
    }
}

/// Both ends of a freshly created control pipe
pub struct ControlPipe {
    read: OwnedFd,
    write: OwnedFd,
}

impl ControlPipe {
    pub fn new() -> Result<Self> {
        let (read, write) = pipe2(OFlag::O_CLOEXEC)
            .map_err(|e| RuntimeError::control("failed to create control pipe", e.into()))?;
        Ok(Self { read, write })
    }

    /// Arrange for the write end to appear as fd 3 in the spawned child
    pub fn attach(&self, command: &mut tokio::process::Command) {
        let raw = self.write.as_raw_fd();
        // SAFETY: only async-signal-safe calls (dup2, fcntl) run between
        // fork and exec
        unsafe {
            command.pre_exec(move || {
                if raw == CONTROL_FD {
                    fcntl(raw, FcntlArg::F_SETFD(FdFlag::empty()))
                        .map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
                } else {
                    dup2(raw, CONTROL_FD)
                        .map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
                }
                Ok(())
            });
        }
    }

    /// Drop the parent's write end and start reading events. Call after the
    /// child has been spawned so EOF tracks the child's copy only.
    pub fn into_reader(self) -> Result<ControlReader> {
        drop(self.write);
        let receiver = pipe::Receiver::from_owned_fd(self.read)
            .map_err(|e| RuntimeError::control("failed to open control pipe", e))?;
        Ok(ControlReader {
            lines: BufReader::new(receiver).lines(),
        })
    }
}

/// How waiting for the sandbox's sockets ended
#[derive(Debug, PartialEq, Eq)]
pub enum ControlOutcome {
    Complete(HashMap<String, u16>),
    /// The channel hit EOF first, usually because the sandbox exited
    Closed,
    Aborted,
}

pub struct ControlReader {
    lines: Lines<BufReader<pipe::Receiver>>,
}

impl ControlReader {
    /// Read events until every id in `required` has reported a port
    pub async fn wait_for_ports(
        &mut self,
        required: &HashSet<String>,
        abort: &mut AbortSignal,
    ) -> Result<ControlOutcome> {
        let mut ports = HashMap::new();
        if required.is_empty() {
            return Ok(ControlOutcome::Complete(ports));
        }

        loop {
            let line = tokio::select! {
                biased;
                _ = abort.aborted() => return Ok(ControlOutcome::Aborted),
                line = self.lines.next_line() => line,
            };

            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => return Ok(ControlOutcome::Closed),
                Err(e) => return Err(RuntimeError::control("failed to read control event", e)),
            };

            let Some(message) = ControlMessage::parse(&line) else {
                trace!(line = %line, "Ignoring control line");
                continue;
            };

            let (socket, port) = message.socket_and_port();
            debug!(socket, port, "Sandbox socket listening");
            ports.insert(socket.to_string(), port);

            if required.iter().all(|id| ports.contains_key(id)) {
                return Ok(ControlOutcome::Complete(ports));
            }
        }
    }
}
