//! Emulator facade
//!
//! Ties the supervisor and the proxy client together. Every runtime change
//! runs under one async mutex, so a `set_options` queued behind another
//! sees the sockets the previous one left behind.

use hearth_config::{format_address, EmulatorConfig};
use hearth_network::HttpWorkerConfig;
use hearth_proxy::{ClientOptions, ProxyClient, Stub};
use hearth_runtime::{
    AbortController, RuntimeOptions, SocketPorts, StartOutcome, StartupFailureKind, StdioHandler,
    Supervisor,
};
use hyper::Uri;
use parking_lot::Mutex;
use rand::RngCore;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

use crate::error::{EmulatorError, Result};
use crate::provider::{ConfigProvider, ConfigRequest};

/// Socket id of the entry socket the proxy client talks to
pub const ENTRY_SOCKET: &str = "entry";

const SECRET_LEN: usize = 32;

struct RuntimeState {
    config: EmulatorConfig,
    previous: Option<EmulatorConfig>,
    supervisor: Supervisor,
    socket_ports: SocketPorts,
    entry_url: Option<Uri>,
}

pub struct Emulator {
    provider: Arc<dyn ConfigProvider>,
    stdio: Option<Arc<dyn StdioHandler>>,
    secret: Vec<u8>,
    runtime: AsyncMutex<RuntimeState>,
    client: Mutex<Option<ProxyClient>>,
    disposed: AbortController,
}

impl Emulator {
    /// Start the sandbox and wait until it is ready
    pub async fn start<P: ConfigProvider>(config: EmulatorConfig, provider: P) -> Result<Self> {
        Self::start_with_stdio(config, provider, None).await
    }

    /// Like [`Emulator::start`], with sandbox output going to `stdio`
    pub async fn start_with_stdio<P: ConfigProvider>(
        config: EmulatorConfig,
        provider: P,
        stdio: Option<Arc<dyn StdioHandler>>,
    ) -> Result<Self> {
        let mut secret = vec![0u8; SECRET_LEN];
        rand::thread_rng().fill_bytes(&mut secret);

        let emulator = Self {
            provider: Arc::new(provider),
            stdio,
            secret,
            runtime: AsyncMutex::new(RuntimeState {
                config,
                previous: None,
                supervisor: Supervisor::new(),
                socket_ports: SocketPorts::new(),
                entry_url: None,
            }),
            client: Mutex::new(None),
            disposed: AbortController::new(),
        };
        {
            let mut state = emulator.runtime.lock().await;
            emulator.update(&mut state).await?;
        }
        Ok(emulator)
    }

    /// Restart the sandbox with new settings. Stubs handed out so far are
    /// poisoned right away.
    pub async fn set_options(&self, config: EmulatorConfig) -> Result<()> {
        self.check_disposed()?;
        self.poison();
        let mut state = self.runtime.lock().await;
        self.check_disposed()?;
        let previous = std::mem::replace(&mut state.config, config);
        state.previous = Some(previous);
        self.update(&mut state).await
    }

    /// Entry URL once every queued update has been applied
    pub async fn ready_url(&self) -> Result<Uri> {
        let state = self.runtime.lock().await;
        self.check_disposed()?;
        state.entry_url.clone().ok_or(EmulatorError::Disposed)
    }

    /// Ports the sandbox reported, by socket id
    pub async fn socket_ports(&self) -> Result<SocketPorts> {
        let state = self.runtime.lock().await;
        self.check_disposed()?;
        Ok(state.socket_ports.clone())
    }

    /// Stub for the sandbox global scope
    pub async fn global(&self) -> Result<Arc<Stub>> {
        self.with_client(ProxyClient::global).await
    }

    /// Stub for the sandbox environment bindings
    pub async fn env(&self) -> Result<Arc<Stub>> {
        self.with_client(ProxyClient::env).await
    }

    /// Poison stubs, abort a pending start and stop the sandbox
    pub async fn dispose(&self) {
        self.disposed.abort();
        self.poison();
        let mut state = self.runtime.lock().await;
        if let Some(client) = self.client.lock().take() {
            client.dispose();
        }
        state.supervisor.dispose().await;
        state.entry_url = None;
        info!("Emulator disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.is_aborted()
    }

    fn check_disposed(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(EmulatorError::Disposed);
        }
        Ok(())
    }

    fn poison(&self) {
        if let Some(client) = self.client.lock().as_ref() {
            client.poison();
        }
    }

    async fn with_client(&self, root: fn(&ProxyClient) -> Arc<Stub>) -> Result<Arc<Stub>> {
        let _state = self.runtime.lock().await;
        self.check_disposed()?;
        self.client
            .lock()
            .as_ref()
            .map(root)
            .ok_or(EmulatorError::Disposed)
    }

    async fn update(&self, state: &mut RuntimeState) -> Result<()> {
        let initial = state.entry_url.is_none();
        let settings = state.config.runtime.clone();
        let previous = state.previous.as_ref().map(|c| &c.runtime);

        let entry_address = socket_address(
            &state.socket_ports,
            ENTRY_SOCKET,
            previous.map(|p| p.port),
            &settings.host,
            settings.port,
        );
        let inspector_address = settings.inspector_port.map(|port| {
            socket_address(
                &state.socket_ports,
                hearth_runtime::INSPECTOR_SOCKET_ID,
                previous.and_then(|p| p.inspector_port),
                "localhost",
                port,
            )
        });

        let mut options =
            RuntimeOptions::new(settings.binary_path()).with_socket(ENTRY_SOCKET, entry_address);
        options.inspector_address = inspector_address;
        options.verbose = settings.verbose;
        options.force_color = settings.force_color;
        options.stdio = self.stdio.clone();

        let request = ConfigRequest {
            proxy_secret: self.secret.clone(),
            sockets: options.sockets.clone(),
            inspector_address: options.inspector_address.clone(),
            policy: state.config.proxy.policy.clone(),
        };
        let config = self
            .provider
            .assemble(&request)
            .await
            .map_err(|e| EmulatorError::Config {
                message: format!("{e:#}"),
            })?;

        let outcome = state
            .supervisor
            .start(&config, &options, Some(self.disposed.signal()))
            .await?;
        let ports = match outcome {
            StartOutcome::Ready(ports) => ports,
            StartOutcome::Aborted => {
                debug!("Sandbox start aborted by dispose");
                return Err(EmulatorError::Disposed);
            }
        };
        let entry_port = ports
            .get(ENTRY_SOCKET)
            .copied()
            .ok_or(EmulatorError::RuntimeFailure {
                kind: StartupFailureKind::Unknown,
            })?;
        state.socket_ports = ports;

        let entry_url: Uri = format!("http://{}", format_address(local_host(&settings.host), entry_port))
            .parse()
            .map_err(|e| EmulatorError::Config {
                message: format!("invalid entry URL: {e}"),
            })?;
        let rebuild = state
            .previous
            .as_ref()
            .is_some_and(|previous| needs_new_client(previous, &state.config));
        let stale = {
            let mut client = self.client.lock();
            if rebuild || client.is_none() {
                client.replace(ProxyClient::new(
                    entry_url.clone(),
                    &self.secret,
                    client_options(&state.config),
                )?)
            } else {
                if let Some(current) = client.as_ref() {
                    current.set_runtime_entry_url(entry_url.clone());
                }
                None
            }
        };
        if let Some(stale) = stale {
            debug!("Proxy settings changed, replaced proxy client");
            stale.dispose();
        }
        state.entry_url = Some(entry_url);

        let ready = if initial { "Ready" } else { "Updated and ready" };
        info!(
            "{ready} on http://{}",
            format_address(&settings.host, entry_port)
        );
        Ok(())
    }
}

fn client_options(config: &EmulatorConfig) -> ClientOptions {
    ClientOptions {
        free_debounce: config.proxy.free_debounce(),
        policy: config.proxy.policy.clone(),
        worker: HttpWorkerConfig {
            worker_threads: config.runtime.worker_threads,
            ..HttpWorkerConfig::default()
        },
    }
}

/// The proxy client only follows the sandbox to a new URL; anything else it
/// was built from requires a fresh one
fn needs_new_client(previous: &EmulatorConfig, next: &EmulatorConfig) -> bool {
    previous.proxy != next.proxy || previous.runtime.worker_threads != next.runtime.worker_threads
}

/// Address for socket `id`. A port requested as 0 twice in a row keeps the
/// random port the sandbox picked last time.
fn socket_address(
    ports: &SocketPorts,
    id: &str,
    previous_port: Option<u16>,
    host: &str,
    port: u16,
) -> String {
    let port = match (port, previous_port) {
        (0, Some(0)) => ports.get(id).copied().unwrap_or(0),
        _ => port,
    };
    format_address(host, port)
}

/// Host the proxy client can reach a socket bound to `host` on
fn local_host(host: &str) -> &str {
    match host {
        "0.0.0.0" | "*" => "127.0.0.1",
        "::" | "[::]" => "::1",
        other => other,
    }
}
