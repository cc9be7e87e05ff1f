//! Sandbox process main loop
//!
//! Bind every requested socket before serving anything, so a port conflict
//! is reported before the supervisor hears about any listener.

use hearth_proxy::{serve, Dispatcher};
use hearth_runtime::ControlMessage;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use nix::fcntl::{fcntl, FcntlArg};
use std::convert::Infallible;
use std::fs::File;
use std::io::{ErrorKind, Write};
use std::net::TcpListener;
use std::os::fd::{FromRawFd, RawFd};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::args::{NamedAddress, ServeArgs};
use crate::config::SandboxConfig;
use crate::error::{Result, SandboxError};
use crate::scope::{Env, GlobalScope};

/// Line-oriented writer for the supervisor's control pipe
pub struct ControlWriter {
    file: File,
}

impl ControlWriter {
    pub fn open(fd: RawFd) -> Result<Self> {
        fcntl(fd, FcntlArg::F_GETFD).map_err(|_| SandboxError::ControlFd { fd })?;
        // SAFETY: the descriptor is open and nothing else in this process
        // claims ownership of it
        let file = unsafe { File::from_raw_fd(fd) };
        Ok(Self { file })
    }

    pub fn send(&mut self, message: &ControlMessage) -> Result<()> {
        self.file.write_all(message.to_line().as_bytes())?;
        self.file.flush()?;
        Ok(())
    }
}

pub async fn read_config(args: &ServeArgs) -> Result<SandboxConfig> {
    if !args.binary {
        return Err(SandboxError::Config(
            "only binary configs are supported, pass --binary".into(),
        ));
    }
    let bytes = if args.config == "-" {
        let mut bytes = Vec::new();
        tokio::io::stdin().read_to_end(&mut bytes).await?;
        bytes
    } else {
        tokio::fs::read(&args.config).await?
    };
    SandboxConfig::decode(&bytes)
}

/// Bind `socket`, mapping a port conflict to the diagnostic the supervisor
/// recognises
pub fn bind(socket: &NamedAddress) -> Result<TcpListener> {
    TcpListener::bind(socket.address.as_str()).map_err(|source| match source.kind() {
        ErrorKind::AddrInUse => SandboxError::AddressInUse {
            address: socket.address.clone(),
        },
        _ => SandboxError::Bind {
            address: socket.address.clone(),
            source,
        },
    })
}

pub async fn run(args: ServeArgs) -> Result<()> {
    let config = read_config(&args).await?;
    debug!(
        bindings = config.bindings.len(),
        externals = args.external_addr.len(),
        "Config loaded"
    );

    let listeners = args
        .socket_addr
        .iter()
        .map(|socket| Ok((socket.name.clone(), bind(socket)?)))
        .collect::<Result<Vec<_>>>()?;
    let inspector = args
        .inspector_addr
        .as_deref()
        .map(|address| {
            bind(&NamedAddress {
                name: hearth_runtime::INSPECTOR_SOCKET_ID.into(),
                address: address.into(),
            })
        })
        .transpose()?;

    let dispatcher = Arc::new(
        Dispatcher::new(
            config.proxy_secret,
            Arc::new(GlobalScope),
            Arc::new(Env::from_bindings(&config.bindings)?),
        )
        .with_policy(config.policy),
    );
    let mut control = args.control_fd.map(ControlWriter::open).transpose()?;
    let (stop, stopped) = watch::channel(false);

    let mut tasks: Vec<JoinHandle<()>> = Vec::new();
    for (socket, listener) in listeners {
        let port = listener.local_addr()?.port();
        let dispatcher = dispatcher.clone();
        let shutdown = wait_for_stop(stopped.clone());
        let name = socket.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = serve(listener, dispatcher, shutdown).await {
                error!(socket = %name, "Socket failed: {e}");
            }
        }));
        if let Some(control) = control.as_mut() {
            control.send(&ControlMessage::Listen { socket, port })?;
        }
    }

    if let Some(listener) = inspector {
        let port = listener.local_addr()?.port();
        let shutdown = wait_for_stop(stopped.clone());
        tasks.push(tokio::spawn(async move {
            if let Err(e) = serve_inspector(listener, shutdown).await {
                error!("Inspector failed: {e}");
            }
        }));
        if let Some(control) = control.as_mut() {
            control.send(&ControlMessage::ListenInspector { port })?;
        }
    }

    info!(sockets = tasks.len(), "Sandbox serving");
    wait_for_signal().await?;
    info!("Sandbox shutting down");
    // Receivers may all be gone if every server already failed
    let _ = stop.send(true);
    for task in tasks {
        let _ = task.await;
    }
    Ok(())
}

async fn wait_for_stop(mut stopped: watch::Receiver<bool>) {
    while !*stopped.borrow() {
        if stopped.changed().await.is_err() {
            return;
        }
    }
}

async fn wait_for_signal() -> Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

/// The inspector socket accepts connections but speaks no debugger protocol
async fn serve_inspector(
    listener: TcpListener,
    shutdown: impl std::future::Future<Output = ()>,
) -> Result<()> {
    listener.set_nonblocking(true)?;
    let make_service = make_service_fn(|_| async {
        Ok::<_, Infallible>(service_fn(|_request: Request<Body>| async {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::NOT_FOUND;
            Ok::<_, Infallible>(response)
        }))
    });
    Server::from_tcp(listener)
        .map_err(hearth_proxy::ServeError::from)?
        .serve(make_service)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(hearth_proxy::ServeError::from)?;
    Ok(())
}
