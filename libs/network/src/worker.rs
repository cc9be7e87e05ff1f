//! Helper execution context
//!
//! Every sandbox request runs on a dedicated tokio runtime so that a caller
//! can block its own thread on the result without starving the I/O that
//! produces it.

use hyper::client::HttpConnector;
use hyper::{Body, Client};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::{Result, TransportError};

/// Helper runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpWorkerConfig {
    pub worker_threads: usize,
    pub thread_name: String,
}

impl Default for HttpWorkerConfig {
    fn default() -> Self {
        Self {
            worker_threads: 2,
            thread_name: "hearth-http".to_string(),
        }
    }
}

/// Dedicated runtime plus the HTTP client bound to it
pub struct HttpWorker {
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
    client: Client<HttpConnector, Body>,
    closed: AtomicBool,
}

impl HttpWorker {
    pub fn new(config: &HttpWorkerConfig) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(config.worker_threads.max(1))
            .thread_name(config.thread_name.clone())
            .enable_all()
            .build()
            .map_err(|e| TransportError::system("failed to build helper runtime", e))?;
        let handle = runtime.handle().clone();
        info!(threads = config.worker_threads, "Started HTTP helper runtime");

        Ok(Self {
            runtime: Mutex::new(Some(runtime)),
            handle,
            client: Client::new(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn client(&self) -> &Client<HttpConnector, Body> {
        &self.client
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Run `future` on the helper runtime
    pub fn spawn<F>(&self, future: F) -> Result<JoinHandle<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        if self.is_closed() {
            return Err(TransportError::closed("helper runtime has been shut down"));
        }
        Ok(self.handle.spawn(future))
    }

    /// Stop the helper runtime without waiting for in-flight requests
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        if let Some(runtime) = self.runtime.lock().take() {
            runtime.shutdown_background();
            debug!("HTTP helper runtime shut down");
        }
    }
}

impl Drop for HttpWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_fails_after_shutdown() {
        let worker = HttpWorker::new(&HttpWorkerConfig::default()).unwrap();
        let (tx, rx) = crossbeam_channel::bounded(1);
        worker
            .spawn(async move {
                tx.send(1).unwrap();
            })
            .unwrap();
        assert_eq!(rx.recv().unwrap(), 1);

        worker.shutdown();
        assert!(worker.is_closed());
        assert!(matches!(
            worker.spawn(async {}),
            Err(TransportError::Closed { .. })
        ));
        worker.shutdown();
    }
}
