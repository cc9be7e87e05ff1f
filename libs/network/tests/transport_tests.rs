//! Transports against a local HTTP server running on its own runtime

use bytes::Bytes;
use hearth_network::{
    AsyncTransport, HttpWorker, HttpWorkerConfig, ResponseBody, SyncTransport, TransportError,
};
use hearth_types::protocol::headers;
use hearth_types::StreamHandle;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

async fn respond(request: Request<Body>) -> Result<Response<Body>, Infallible> {
    let response = match request.uri().path() {
        "/stream" => Response::builder()
            .header(headers::OP_RESULT_TYPE, "Promise, ReadableStream")
            .body(Body::from("streamed bytes")),
        "/echo" => {
            let method = request.method().to_string();
            let body = hyper::body::to_bytes(request.into_body())
                .await
                .unwrap_or_default();
            Response::builder()
                .header("x-method", method)
                .body(Body::from(body))
        }
        _ => Response::builder().status(404).body(Body::empty()),
    };
    Ok(response.unwrap())
}

fn start_server() -> (tokio::runtime::Runtime, SocketAddr) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let addr = runtime.block_on(async {
        let make = make_service_fn(|_| async { Ok::<_, Infallible>(service_fn(respond)) });
        let server = Server::bind(&([127, 0, 0, 1], 0).into()).serve(make);
        let addr = server.local_addr();
        tokio::spawn(server);
        addr
    });
    (runtime, addr)
}

fn worker() -> Arc<HttpWorker> {
    Arc::new(HttpWorker::new(&HttpWorkerConfig::default()).unwrap())
}

#[test]
fn sync_requests_buffer_plain_bodies() {
    let (_server, addr) = start_server();
    let transport = SyncTransport::new(worker());

    let request = Request::post(format!("http://{addr}/echo"))
        .body(Body::from("ping"))
        .unwrap();
    let response = transport.request(request).unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.header("x-method"), Some("POST"));
    assert_eq!(response.bytes(), Bytes::from("ping"));
}

#[test]
fn sync_requests_leave_stream_results_unread() {
    let (_server, addr) = start_server();
    let worker = worker();
    let transport = SyncTransport::new(worker.clone());

    let request = Request::post(format!("http://{addr}/stream"))
        .body(Body::empty())
        .unwrap();
    let response = transport.request(request).unwrap();
    let ResponseBody::Streaming(stream) = response.body else {
        panic!("expected a streaming body");
    };

    let (tx, rx) = crossbeam_channel::bounded(1);
    worker
        .spawn(async move {
            tx.send(StreamHandle::new(stream).read_all().await.unwrap())
                .unwrap();
        })
        .unwrap();
    assert_eq!(rx.recv().unwrap(), Bytes::from("streamed bytes"));
}

#[test]
fn concurrent_sync_requests_do_not_interleave() {
    let (_server, addr) = start_server();
    let transport = Arc::new(SyncTransport::new(worker()));

    let threads: Vec<_> = (0..8)
        .map(|i| {
            let transport = transport.clone();
            std::thread::spawn(move || {
                let request = Request::post(format!("http://{addr}/echo"))
                    .body(Body::from(format!("body-{i}")))
                    .unwrap();
                transport.request(request).unwrap().bytes()
            })
        })
        .collect();

    for (i, thread) in threads.into_iter().enumerate() {
        assert_eq!(thread.join().unwrap(), Bytes::from(format!("body-{i}")));
    }
}

#[test]
fn requests_fail_after_shutdown() {
    let (_server, addr) = start_server();
    let worker = worker();
    let transport = SyncTransport::new(worker.clone());
    worker.shutdown();

    let request = Request::get(format!("http://{addr}/echo"))
        .body(Body::empty())
        .unwrap();
    assert!(matches!(
        transport.request(request),
        Err(TransportError::Closed { .. })
    ));
}

#[test]
fn unreachable_sandbox_is_a_connection_error() {
    let (server, addr) = start_server();
    drop(server);
    let transport = SyncTransport::new(worker());

    let request = Request::get(format!("http://{addr}/echo"))
        .body(Body::empty())
        .unwrap();
    let err = transport.request(request).err().unwrap();
    assert!(matches!(err, TransportError::Connection { .. }), "{err}");
}

#[test]
fn async_requests_resolve_from_the_helper_runtime() {
    let (_server, addr) = start_server();
    let transport = AsyncTransport::new(worker());
    let caller = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    let body = caller.block_on(async {
        let request = Request::put(format!("http://{addr}/echo"))
            .body(Body::from("async"))
            .unwrap();
        let response = transport.request(request).await.unwrap();
        assert_eq!(response.headers()["x-method"], "PUT");
        hyper::body::to_bytes(response.into_body()).await.unwrap()
    });
    assert_eq!(body, Bytes::from("async"));
}
