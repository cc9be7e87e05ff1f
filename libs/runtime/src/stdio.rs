//! Sandbox stdout/stderr forwarding

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::classify::{classify_line, LineClass};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdioStream {
    Stdout,
    Stderr,
}

/// Receives each line the sandbox writes, without its trailing newline
pub trait StdioHandler: Send + Sync {
    fn handle(&self, stream: StdioStream, line: &str);
}

/// Default handler: route lines into tracing by classification
#[derive(Debug, Default, Clone, Copy)]
pub struct LogStdio;

impl StdioHandler for LogStdio {
    fn handle(&self, stream: StdioStream, line: &str) {
        match classify_line(line) {
            LineClass::Noise => debug!(target: "hearth_runtime::stdio", "{line}"),
            LineClass::Warning => warn!(target: "hearth_runtime::stdio", "{line}"),
            LineClass::AddressInUse { address } => error!(
                target: "hearth_runtime::stdio",
                "Address already in use ({address}). Please check that you are not already \
                 running a server on this address or specify a different port."
            ),
            LineClass::AccessViolation => error!(
                target: "hearth_runtime::stdio",
                "{line}\nThe sandbox crashed with an access violation."
            ),
            LineClass::Plain => match stream {
                StdioStream::Stdout => info!(target: "hearth_runtime::stdio", "{line}"),
                StdioStream::Stderr => error!(target: "hearth_runtime::stdio", "{line}"),
            },
        }
    }
}

/// Forwards lines to a handler. Until [`StdioCapture::release`] lines are
/// held back, and stderr is recorded for startup failure classification.
#[derive(Clone)]
pub(crate) struct StdioCapture {
    handler: Arc<dyn StdioHandler>,
    state: Arc<Mutex<CaptureState>>,
}

#[derive(Default)]
struct CaptureState {
    released: bool,
    held: Vec<(StdioStream, String)>,
    stderr: String,
}

impl StdioCapture {
    pub fn new(handler: Arc<dyn StdioHandler>) -> Self {
        Self {
            handler,
            state: Arc::new(Mutex::new(CaptureState::default())),
        }
    }

    // The handler runs under the lock so held lines keep their order
    fn push(&self, stream: StdioStream, line: &str) {
        let mut state = self.state.lock();
        if state.released {
            self.handler.handle(stream, line);
            return;
        }
        if stream == StdioStream::Stderr {
            state.stderr.push_str(line);
            state.stderr.push('\n');
        }
        state.held.push((stream, line.to_string()));
    }

    /// Stderr recorded before release
    pub fn recorded_stderr(&self) -> String {
        self.state.lock().stderr.clone()
    }

    /// Flush held lines and pass everything else straight through
    pub fn release(&self) {
        let mut state = self.state.lock();
        if state.released {
            return;
        }
        state.released = true;
        for (stream, line) in std::mem::take(&mut state.held) {
            self.handler.handle(stream, &line);
        }
        state.stderr.clear();
    }

    pub fn pump<R>(&self, stream: StdioStream, reader: R) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let capture = self.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buf);
                        capture.push(stream, line.trim_end_matches(['\n', '\r']));
                    }
                    Err(e) => {
                        debug!(?stream, error = %e, "Sandbox output closed");
                        break;
                    }
                }
            }
        })
    }
}
