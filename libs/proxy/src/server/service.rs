//! HTTP front end for the dispatcher

use hearth_types::protocol::headers;
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::future::Future;
use std::net::TcpListener;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use super::Dispatcher;

#[derive(Error, Debug)]
pub enum ServeError {
    #[error("Failed to configure listener: {0}")]
    Listener(#[from] std::io::Error),

    #[error("HTTP server error: {0}")]
    Http(#[from] hyper::Error),
}

/// Serve proxy requests on `listener` until `shutdown` resolves. Requests
/// without an operation header get 404.
pub async fn serve<F>(
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    shutdown: F,
) -> Result<(), ServeError>
where
    F: Future<Output = ()>,
{
    listener.set_nonblocking(true)?;
    let local = listener.local_addr()?;

    let make_service = make_service_fn(move |conn: &AddrStream| {
        let dispatcher = dispatcher.clone();
        let remote = conn.remote_addr();
        async move {
            Ok::<_, Infallible>(service_fn(move |request: Request<Body>| {
                let dispatcher = dispatcher.clone();
                async move {
                    if !request.headers().contains_key(headers::OP) {
                        debug!(%remote, uri = %request.uri(), "Non-proxy request");
                        return Ok::<_, Infallible>(not_found());
                    }
                    Ok(dispatcher.handle(request).await)
                }
            }))
        }
    });

    info!(address = %local, "Proxy dispatcher listening");
    Server::from_tcp(listener)?
        .serve(make_service)
        .with_graceful_shutdown(shutdown)
        .await?;
    debug!(address = %local, "Proxy dispatcher stopped");
    Ok(())
}

fn not_found() -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}
