//! Sandbox process supervisor

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::abort::AbortSignal;
use crate::classify::classify_startup_failure;
use crate::control::{ControlOutcome, ControlPipe, ControlReader, CONTROL_FD, INSPECTOR_SOCKET_ID};
use crate::error::{Result, RuntimeError};
use crate::stdio::{LogStdio, StdioCapture, StdioHandler, StdioStream};

/// A named socket the sandbox must listen on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketBinding {
    pub id: String,
    /// `host:port`, port 0 picks a free one
    pub address: String,
}

impl SocketBinding {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
        }
    }
}

#[derive(Clone)]
pub struct RuntimeOptions {
    pub executable: PathBuf,
    pub sockets: Vec<SocketBinding>,
    pub inspector_address: Option<String>,
    pub loopback_address: Option<String>,
    pub verbose: bool,
    pub force_color: bool,
    /// Replaces the default classified logging of sandbox output
    pub stdio: Option<Arc<dyn StdioHandler>>,
}

impl fmt::Debug for RuntimeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeOptions")
            .field("executable", &self.executable)
            .field("sockets", &self.sockets)
            .field("inspector_address", &self.inspector_address)
            .field("loopback_address", &self.loopback_address)
            .field("verbose", &self.verbose)
            .field("force_color", &self.force_color)
            .field("stdio", &self.stdio.is_some())
            .finish()
    }
}

impl RuntimeOptions {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            sockets: Vec::new(),
            inspector_address: None,
            loopback_address: None,
            verbose: false,
            force_color: false,
            stdio: None,
        }
    }

    pub fn with_socket(mut self, id: impl Into<String>, address: impl Into<String>) -> Self {
        self.sockets.push(SocketBinding::new(id, address));
        self
    }

    /// Socket ids that must report a port before start completes
    pub fn required_socket_ids(&self) -> HashSet<String> {
        let mut ids: HashSet<String> = self.sockets.iter().map(|s| s.id.clone()).collect();
        if self.inspector_address.is_some() {
            ids.insert(INSPECTOR_SOCKET_ID.to_string());
        }
        ids
    }

    pub fn command_args(&self) -> Vec<String> {
        let mut args = vec![
            "serve".to_string(),
            "--binary".to_string(),
            "--experimental".to_string(),
        ];
        for socket in &self.sockets {
            if socket.id == INSPECTOR_SOCKET_ID {
                continue;
            }
            args.push(format!("--socket-addr={}={}", socket.id, socket.address));
        }
        if let Some(loopback) = &self.loopback_address {
            args.push(format!("--external-addr=loopback={loopback}"));
        }
        args.push(format!("--control-fd={CONTROL_FD}"));
        args.push("-".to_string());
        if let Some(inspector) = &self.inspector_address {
            args.push(format!("--inspector-addr={inspector}"));
        }
        if self.verbose {
            args.push("--verbose".to_string());
        }
        args
    }
}

/// Ports reported by the sandbox, by socket id
pub type SocketPorts = HashMap<String, u16>;

#[derive(Debug, PartialEq, Eq)]
pub enum StartOutcome {
    Ready(SocketPorts),
    Aborted,
}

struct RunningProcess {
    child: Child,
    pumps: Vec<JoinHandle<()>>,
    // Kept open so late control writes don't hit a closed pipe
    _control: ControlReader,
}

/// Owns at most one sandbox process
#[derive(Default)]
pub struct Supervisor {
    process: Option<RunningProcess>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.process.is_some()
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(|p| p.child.id())
    }

    /// Start a new sandbox, replacing any running one, and wait until every
    /// required socket is listening
    pub async fn start(
        &mut self,
        config: &[u8],
        options: &RuntimeOptions,
        abort: Option<AbortSignal>,
    ) -> Result<StartOutcome> {
        self.dispose().await;

        let mut abort = abort.unwrap_or_else(AbortSignal::never);
        if abort.is_aborted() {
            return Ok(StartOutcome::Aborted);
        }

        let args = options.command_args();
        debug!(executable = ?options.executable, ?args, "Spawning sandbox");

        let pipe = ControlPipe::new()?;
        let mut command = Command::new(&options.executable);
        command
            .args(&args)
            .env("FORCE_COLOR", if options.force_color { "1" } else { "0" })
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        pipe.attach(&mut command);

        let mut child = command.spawn().map_err(|source| RuntimeError::Spawn {
            executable: options.executable.clone(),
            source,
        })?;
        let mut control = pipe.into_reader()?;

        let handler = options
            .stdio
            .clone()
            .unwrap_or_else(|| Arc::new(LogStdio) as Arc<dyn StdioHandler>);
        let capture = StdioCapture::new(handler);
        let mut pumps = Vec::with_capacity(2);
        let mut stderr_pump = None;
        if let Some(stdout) = child.stdout.take() {
            pumps.push(capture.pump(StdioStream::Stdout, stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            stderr_pump = Some(capture.pump(StdioStream::Stderr, stderr));
        }

        if let Some(mut stdin) = child.stdin.take() {
            // A sandbox that dies early closes stdin; the control channel
            // reports that failure
            if let Err(e) = stdin.write_all(config).await {
                debug!(error = %e, "Failed to write sandbox config");
            } else if let Err(e) = stdin.flush().await {
                debug!(error = %e, "Failed to flush sandbox config");
            }
        }

        let required = options.required_socket_ids();
        let outcome = control.wait_for_ports(&required, &mut abort).await;

        pumps.extend(stderr_pump.take());
        let mut process = RunningProcess {
            child,
            pumps,
            _control: control,
        };

        match outcome {
            Ok(ControlOutcome::Complete(ports)) => {
                capture.release();
                info!(pid = ?process.child.id(), ?ports, "Sandbox ready");
                self.process = Some(process);
                Ok(StartOutcome::Ready(ports))
            }
            Ok(ControlOutcome::Aborted) => {
                capture.release();
                debug!("Sandbox start aborted");
                terminate(&mut process).await;
                Ok(StartOutcome::Aborted)
            }
            Ok(ControlOutcome::Closed) => {
                // The child may outlive its control channel
                let exited = tokio::select! {
                    status = process.child.wait() => Some(status),
                    _ = abort.aborted() => None,
                };
                let Some(status) = exited else {
                    capture.release();
                    debug!("Sandbox start aborted after the control channel closed");
                    terminate(&mut process).await;
                    return Ok(StartOutcome::Aborted);
                };
                // Output pumps end once the child's pipes close
                for pump in process.pumps.drain(..) {
                    let _ = pump.await;
                }
                let kind = classify_startup_failure(&capture.recorded_stderr());
                capture.release();
                warn!(?status, %kind, "Sandbox exited during startup");
                terminate(&mut process).await;
                Err(RuntimeError::Startup { kind })
            }
            Err(e) => {
                capture.release();
                terminate(&mut process).await;
                Err(e)
            }
        }
    }

    /// Kill the running sandbox, if any, and wait for it to exit
    pub async fn dispose(&mut self) {
        if let Some(mut process) = self.process.take() {
            debug!(pid = ?process.child.id(), "Disposing sandbox");
            terminate(&mut process).await;
        }
    }
}

async fn terminate(process: &mut RunningProcess) {
    if let Err(e) = process.child.start_kill() {
        // Already exited
        debug!(error = %e, "Sandbox kill failed");
    }
    drop(process.child.stdin.take());
    drop(process.child.stdout.take());
    drop(process.child.stderr.take());
    for pump in process.pumps.drain(..) {
        pump.abort();
    }
    if let Err(e) = process.child.wait().await {
        warn!(error = %e, "Failed to wait for sandbox exit");
    }
}
