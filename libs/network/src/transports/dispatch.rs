//! Asynchronous transport
//!
//! Requests are submitted to the helper runtime immediately; the returned
//! future only waits for the outcome.

use hyper::{Body, Request, Response};
use std::future::Future;
use std::sync::Arc;

use super::send;
use crate::{HttpWorker, Result, TransportError};

pub struct AsyncTransport {
    worker: Arc<HttpWorker>,
}

impl AsyncTransport {
    pub fn new(worker: Arc<HttpWorker>) -> Self {
        Self { worker }
    }

    pub fn request(
        &self,
        request: Request<Body>,
    ) -> impl Future<Output = Result<Response<Body>>> + Send + 'static {
        let client = self.worker.client().clone();
        let spawned = self.worker.spawn(send(client, request));
        async move {
            let handle = spawned?;
            handle
                .await
                .map_err(|e| TransportError::closed(format!("request task did not complete: {e}")))?
        }
    }
}
