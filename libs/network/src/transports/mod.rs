//! Sandbox transports
//!
//! Two views over the same [`HttpWorker`](crate::HttpWorker):
//!
//! - [`SyncTransport`]: blocks the calling thread until the response is ready
//! - [`AsyncTransport`]: returns a future resolved from the helper runtime

pub mod dispatch;
pub mod sync;

pub use dispatch::AsyncTransport;
pub use sync::{ResponseBody, SyncResponse, SyncTransport};

use futures::TryStreamExt;
use hearth_types::ByteStream;
use hyper::client::HttpConnector;
use hyper::{Body, Client, Request, Response, Uri};
use std::io;
use std::net::SocketAddr;
use tracing::debug;

use crate::{Result, TransportError};

/// Adapt a hyper body into a byte stream
pub fn body_stream(body: Body) -> ByteStream {
    Box::pin(body.map_err(|e| io::Error::new(io::ErrorKind::Other, e)))
}

fn remote_addr(uri: &Uri) -> Option<SocketAddr> {
    uri.authority().and_then(|a| a.as_str().parse().ok())
}

pub(crate) async fn send(
    client: Client<HttpConnector, Body>,
    request: Request<Body>,
) -> Result<Response<Body>> {
    let remote = remote_addr(request.uri());
    debug!(method = %request.method(), uri = %request.uri(), "Sending sandbox request");
    client
        .request(request)
        .await
        .map_err(|e| TransportError::from_hyper(e, remote))
}
