//! Host stubs against an in-process dispatcher served on its own runtime

use async_trait::async_trait;
use bytes::Bytes;
use futures::executor::block_on;
use futures::StreamExt;
use hearth_proxy::{
    live, serve, stream_value, ClientOptions, Dispatcher, MethodStub, Property, ProxyClient,
    RemoteObject, Stub, StubKind,
};
use hearth_types::protocol::headers;
use hearth_types::{
    ErrorValue, Headers, Pending, PropertyDescriptor, ProxyError, StreamHandle, Value,
};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use parking_lot::Mutex;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use tokio::sync::Notify;

const SECRET: &[u8] = b"test-secret-0123";

struct Global;

impl RemoteObject for Global {
    fn type_name(&self) -> &str {
        "ServiceWorkerGlobalScope"
    }

    fn get(&self, key: &str) -> Property {
        match key {
            "a" => Property::Value(live(Outer)),
            "durable" => Property::Value(live(Durable)),
            "echo" | "slow" | "fail" | "make" | "adder" | "stream" | "length" => Property::Method,
            other => match other.strip_prefix('n').and_then(|n| n.parse::<i32>().ok()) {
                Some(n) => Property::Value(Value::from(n)),
                None => Property::Missing,
            },
        }
    }

    fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, ProxyError> {
        match method {
            "echo" => Ok(args.into_iter().next().unwrap_or(Value::Undefined)),
            "slow" => Ok(Value::Promise(Pending::new(async {
                Ok(Value::from("later"))
            }))),
            "fail" => Err(ProxyError::thrown(Value::Error(
                ErrorValue::new("RangeError", "out of range")
                    .with_stack("RangeError: out of range\n    at fail (worker.js:10:5)")
                    .with_cause(Value::Error(ErrorValue::new("Error", "root cause"))),
            ))),
            "make" => Ok(live(Counter)),
            "adder" => Ok(live(Adder)),
            "stream" => Ok(stream_value("chunked body")),
            "length" => match args.into_iter().next() {
                Some(Value::Stream(handle)) => Ok(Value::Promise(Pending::new(async move {
                    let bytes = handle
                        .read_all()
                        .await
                        .map_err(|e| ProxyError::type_error(e.to_string()))?;
                    Ok(Value::from(bytes.len() as u64))
                }))),
                _ => Err(ProxyError::type_error("expected a stream")),
            },
            other => Err(ProxyError::type_error(format!("{other} is not a function"))),
        }
    }
}

struct Outer;

impl RemoteObject for Outer {
    fn type_name(&self) -> &str {
        "Outer"
    }

    fn get(&self, key: &str) -> Property {
        match key {
            "b" => Property::Value(Value::Promise(Pending::resolved(live(Inner)))),
            _ => Property::Missing,
        }
    }
}

struct Inner;

impl RemoteObject for Inner {
    fn type_name(&self) -> &str {
        "Inner"
    }

    fn get(&self, key: &str) -> Property {
        match key {
            "c" => Property::Value(Value::from("leaf")),
            _ => Property::Missing,
        }
    }
}

struct Counter;

impl RemoteObject for Counter {
    fn type_name(&self) -> &str {
        "Counter"
    }

    fn get(&self, key: &str) -> Property {
        match key {
            "value" => Property::Value(Value::from(7)),
            _ => Property::Missing,
        }
    }
}

struct Adder;

impl RemoteObject for Adder {
    fn type_name(&self) -> &str {
        "Adder"
    }

    fn is_function(&self) -> bool {
        true
    }

    fn get(&self, _key: &str) -> Property {
        Property::Missing
    }

    fn invoke(&self, args: Vec<Value>) -> Result<Value, ProxyError> {
        Ok(Value::from(args.iter().filter_map(Value::as_f64).sum::<f64>()))
    }
}

struct Durable;

impl RemoteObject for Durable {
    fn type_name(&self) -> &str {
        "DurableObject"
    }

    fn get(&self, key: &str) -> Property {
        match key {
            "ping" => Property::Method,
            _ => Property::Missing,
        }
    }

    fn call(&self, method: &str, _args: Vec<Value>) -> Result<Value, ProxyError> {
        match method {
            "ping" => Ok(Value::from("pong")),
            other => Err(ProxyError::type_error(format!("{other} is not a function"))),
        }
    }
}

#[derive(Default)]
struct Env {
    gate: Arc<Notify>,
}

impl RemoteObject for Env {
    fn type_name(&self) -> &str {
        "Object"
    }

    fn get(&self, key: &str) -> Property {
        match key {
            "TEXT" => Property::Value(Value::from("hello")),
            "SERVICE" => Property::Value(live(EchoService)),
            "OBJECT" => Property::Value(live(HeadResult)),
            "TRICKLE" => Property::Value(live(Trickle {
                gate: self.gate.clone(),
            })),
            _ => Property::Missing,
        }
    }

    fn own_keys(&self) -> Vec<String> {
        vec!["TEXT".into(), "SERVICE".into(), "OBJECT".into()]
    }
}

struct EchoService;

#[async_trait]
impl RemoteObject for EchoService {
    fn type_name(&self) -> &str {
        "Fetcher"
    }

    fn get(&self, _key: &str) -> Property {
        Property::Missing
    }

    async fn fetch(&self, request: Request<Body>) -> Result<Response<Body>, ProxyError> {
        let leaked = request
            .headers()
            .keys()
            .any(|name| name.as_str().starts_with("hearth-"));
        let mut response = Response::builder()
            .header("x-method", request.method().as_str())
            .header("x-url", request.uri().to_string())
            .header("x-leaked", if leaked { "yes" } else { "no" });
        if let Some(value) = request.headers().get("x-test") {
            response = response.header("x-test", value.clone());
        }
        response
            .body(request.into_body())
            .map_err(|e| ProxyError::type_error(e.to_string()))
    }
}

/// Fetcher whose response sends one chunk, then waits for the gate
struct Trickle {
    gate: Arc<Notify>,
}

#[async_trait]
impl RemoteObject for Trickle {
    fn type_name(&self) -> &str {
        "Fetcher"
    }

    fn get(&self, _key: &str) -> Property {
        Property::Missing
    }

    async fn fetch(&self, _request: Request<Body>) -> Result<Response<Body>, ProxyError> {
        let (mut sender, body) = Body::channel();
        let gate = self.gate.clone();
        tokio::spawn(async move {
            if sender.send_data(Bytes::from_static(b"first")).await.is_ok() {
                gate.notified().await;
                let _ = sender.send_data(Bytes::from_static(b"rest")).await;
            }
        });
        Ok(Response::new(body))
    }
}

struct HeadResult;

impl RemoteObject for HeadResult {
    fn type_name(&self) -> &str {
        "HeadResult"
    }

    fn get(&self, key: &str) -> Property {
        match key {
            "writeHttpMetadata" => Property::Method,
            _ => Property::Missing,
        }
    }

    fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, ProxyError> {
        match (method, args.first()) {
            ("writeHttpMetadata", Some(Value::Headers(headers))) => {
                headers.set("Content-Type", "text/plain");
                headers.set("ETag", "\"v1\"");
                Ok(Value::Undefined)
            }
            _ => Err(ProxyError::type_error("expected headers")),
        }
    }
}

#[derive(Debug, Clone)]
struct Logged {
    method: Method,
    op: String,
    sync: bool,
}

struct Sandbox {
    runtime: Runtime,
    addr: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    log: Arc<Mutex<Vec<Logged>>>,
    gate: Arc<Notify>,
}

impl Sandbox {
    fn start() -> Self {
        let runtime = Runtime::new().unwrap();
        let env = Env::default();
        let gate = env.gate.clone();
        let dispatcher = Arc::new(Dispatcher::new(SECRET, Arc::new(Global), Arc::new(env)));
        let log = Arc::new(Mutex::new(Vec::new()));

        let addr = runtime.block_on({
            let dispatcher = dispatcher.clone();
            let log = log.clone();
            async move {
                let make = make_service_fn(move |_| {
                    let dispatcher = dispatcher.clone();
                    let log = log.clone();
                    async move {
                        Ok::<_, Infallible>(service_fn(move |request: Request<Body>| {
                            log.lock().push(Logged {
                                method: request.method().clone(),
                                op: header(&request, headers::OP).unwrap_or_default(),
                                sync: request.headers().contains_key(headers::OP_SYNC),
                            });
                            let dispatcher = dispatcher.clone();
                            async move { Ok::<_, Infallible>(dispatcher.handle(request).await) }
                        }))
                    }
                });
                let server = Server::bind(&([127, 0, 0, 1], 0).into()).serve(make);
                let addr = server.local_addr();
                tokio::spawn(server);
                addr
            }
        });

        Self {
            runtime,
            addr,
            dispatcher,
            log,
            gate,
        }
    }

    fn url(&self) -> hyper::Uri {
        format!("http://{}", self.addr).parse().unwrap()
    }

    fn client(&self) -> ProxyClient {
        let options = ClientOptions {
            free_debounce: Duration::from_millis(50),
            ..ClientOptions::default()
        };
        ProxyClient::new(self.url(), SECRET, options).unwrap()
    }

    fn requests(&self) -> Vec<Logged> {
        self.log.lock().clone()
    }

    fn clear(&self) {
        self.log.lock().clear();
    }

    fn count(&self, op: &str) -> usize {
        self.log.lock().iter().filter(|l| l.op == op).count()
    }

    /// Send a hand-built request straight to the dispatcher
    fn raw(&self, request: Request<Body>) -> Response<Body> {
        self.runtime.block_on(self.dispatcher.handle(request))
    }
}

fn header(request: &Request<Body>, name: &str) -> Option<String> {
    request
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    condition()
}

fn stub(value: Value) -> Arc<Stub> {
    value.into_native::<Stub>().expect("expected a stub")
}

#[test]
fn reads_properties_and_calls_methods() {
    let sandbox = Sandbox::start();
    let client = sandbox.client();
    let global = client.global();

    assert_eq!(global.get("n5").unwrap(), Value::from(5));
    assert_eq!(global.get("missing").unwrap(), Value::Undefined);
    assert_eq!(
        global
            .call_method("echo", vec![Value::from("ping")])
            .unwrap(),
        Value::from("ping")
    );

    let echo = global.get("echo").unwrap();
    let method = echo.native_as::<MethodStub>().unwrap();
    assert_eq!(method.name(), "echo");
    assert_eq!(method.call(vec![Value::from(3)]).unwrap(), Value::from(3));
}

#[test]
fn methods_and_references_are_cached() {
    let sandbox = Sandbox::start();
    let client = sandbox.client();
    let global = client.global();

    let first = global.get("a").unwrap();
    global.get("echo").unwrap();
    sandbox.clear();

    assert_eq!(global.get("a").unwrap(), first);
    global.get("echo").unwrap();
    assert!(sandbox.requests().is_empty());
}

#[test]
fn pending_property_costs_one_sync_and_one_async_request() {
    let sandbox = Sandbox::start();
    let client = sandbox.client();
    let outer = stub(client.global().get("a").unwrap());
    sandbox.clear();

    let b = outer.get("b").unwrap();
    let Value::Promise(pending) = b else {
        panic!("expected a pending value, got {b:?}");
    };
    let inner = stub(block_on(pending).unwrap());
    let requests = sandbox.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].sync && requests[0].op == "GET");
    assert!(!requests[1].sync && requests[1].op == "GET");

    assert_eq!(inner.type_name(), "Inner");
    assert_eq!(inner.get("c").unwrap(), Value::from("leaf"));
}

#[test]
fn poisoned_stubs_fail_without_requests() {
    let sandbox = Sandbox::start();
    let client = sandbox.client();
    let env = client.env();
    let counter = stub(client.global().call_method("make", vec![]).unwrap());
    sandbox.clear();

    client.poison();
    assert!(env.is_poisoned() && counter.is_poisoned());
    assert!(matches!(env.get("TEXT"), Err(ProxyError::Poisoned)));
    assert!(matches!(counter.get("value"), Err(ProxyError::Poisoned)));
    assert!(matches!(
        counter.call_method("anything", vec![]),
        Err(ProxyError::Poisoned)
    ));
    assert!(sandbox.requests().is_empty());

    // Fresh roots belong to the new epoch
    assert_eq!(client.env().get("TEXT").unwrap(), Value::from("hello"));
}

#[test]
fn dropped_stubs_are_freed_in_one_batch() {
    let sandbox = Sandbox::start();
    let client = sandbox.client();
    let global = client.global();

    let stubs: Vec<_> = (0..50)
        .map(|_| global.call_method("make", vec![]).unwrap())
        .collect();
    assert_eq!(sandbox.dispatcher.heap().len(), 52);
    drop(stubs);

    assert!(wait_until(|| sandbox.dispatcher.heap().len() == 2));
    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(sandbox.count("FREE"), 1);
    let free = sandbox
        .requests()
        .into_iter()
        .find(|l| l.op == "FREE")
        .unwrap();
    assert_eq!(free.method, Method::DELETE);
}

#[test]
fn stale_batches_send_nothing() {
    let sandbox = Sandbox::start();
    let client = sandbox.client();
    let counter = client.global().call_method("make", vec![]).unwrap();

    drop(counter);
    client.poison();
    std::thread::sleep(Duration::from_millis(250));
    assert_eq!(sandbox.count("FREE"), 0);
    assert_eq!(sandbox.dispatcher.heap().len(), 3);
}

#[test]
fn freed_addresses_raise_reference_errors() {
    let sandbox = Sandbox::start();
    let client = sandbox.client();
    let counter = stub(client.global().call_method("make", vec![]).unwrap());
    assert_eq!(counter.get("value").unwrap(), Value::from(7));

    sandbox.dispatcher.heap().free(&[counter.target().address]);
    let err = counter.get("value").unwrap_err();
    assert_eq!(
        err.thrown_error().map(|e| e.name.as_str()),
        Some("ReferenceError")
    );
}

#[test]
fn reused_addresses_do_not_cross_epochs() {
    let first = Sandbox::start();
    let client = first.client();
    let old = stub(client.global().call_method("make", vec![]).unwrap());

    client.poison();
    let second = Sandbox::start();
    client.set_runtime_entry_url(second.url());
    let new = stub(client.global().call_method("make", vec![]).unwrap());
    assert_eq!(old.target().address, new.target().address);

    assert!(matches!(old.get("value"), Err(ProxyError::Poisoned)));
    drop(old);
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(first.count("FREE") + second.count("FREE"), 0);
    assert!(second.dispatcher.heap().contains(new.target().address));
    assert_eq!(new.get("value").unwrap(), Value::from(7));
}

#[test]
fn concurrent_gets_do_not_interleave() {
    let sandbox = Sandbox::start();
    let client = sandbox.client();
    let global = client.global();

    let threads: Vec<_> = (0..16)
        .map(|i| {
            let global = global.clone();
            std::thread::spawn(move || global.get(&format!("n{i}")).unwrap())
        })
        .collect();
    for (i, thread) in threads.into_iter().enumerate() {
        assert_eq!(thread.join().unwrap(), Value::from(i as i32));
    }
}

#[test]
fn streams_travel_both_ways() {
    let sandbox = Sandbox::start();
    let client = sandbox.client();
    let global = client.global();

    let Value::Stream(handle) = global.call_method("stream", vec![]).unwrap() else {
        panic!("expected a stream");
    };
    assert_eq!(block_on(handle.read_all()).unwrap(), "chunked body");

    sandbox.clear();
    let upload = StreamHandle::from_chunks(vec!["0123".into(), "456789".into()]);
    let result = global
        .call_method("length", vec![Value::Stream(upload)])
        .unwrap();
    assert!(matches!(result, Value::Promise(_)));
    assert_eq!(block_on(result.settle()).unwrap(), Value::from(10));
    assert!(sandbox.requests().iter().all(|l| !l.sync));
}

#[test]
fn promise_results_switch_methods_to_async() {
    let sandbox = Sandbox::start();
    let client = sandbox.client();
    let global = client.global();

    let first = global.call_method("slow", vec![]).unwrap();
    assert_eq!(block_on(first.settle()).unwrap(), Value::from("later"));

    sandbox.clear();
    let second = global.call_method("slow", vec![]).unwrap();
    assert_eq!(block_on(second.settle()).unwrap(), Value::from("later"));
    let requests = sandbox.requests();
    assert_eq!(requests.len(), 1);
    assert!(!requests[0].sync && requests[0].op == "CALL");
}

#[test]
fn thrown_errors_keep_cause_and_point_at_the_caller() {
    let sandbox = Sandbox::start();
    let client = sandbox.client();

    let err = client.global().call_method("fail", vec![]).unwrap_err();
    let error = err.thrown_error().unwrap();
    assert_eq!(error.name, "RangeError");
    assert_eq!(error.message, "out of range");

    let stack = error.stack.as_deref().unwrap();
    let lines: Vec<_> = stack.lines().collect();
    assert_eq!(lines[0], "RangeError: out of range");
    assert!(lines[1].contains("proxy_tests.rs"));
    assert_eq!(lines[2], "    at fail (worker.js:10:5)");

    match error.cause.as_deref() {
        Some(Value::Error(cause)) => assert_eq!(cause.message, "root cause"),
        other => panic!("unexpected cause {other:?}"),
    }
}

#[test]
fn function_values_are_callable_stubs() {
    let sandbox = Sandbox::start();
    let client = sandbox.client();

    let adder = stub(client.global().call_method("adder", vec![]).unwrap());
    assert_eq!(adder.kind(), StubKind::Callable);
    assert_eq!(
        adder.call(vec![Value::from(2), Value::from(3.5)]).unwrap(),
        Value::from(5.5)
    );

    let env = client.env();
    assert_eq!(env.kind(), StubKind::ObjectLike);
    assert!(env.call(vec![]).is_err());
}

#[test]
fn fetch_passthrough_forwards_the_raw_request() {
    let sandbox = Sandbox::start();
    let client = sandbox.client();
    let service = stub(client.env().get("SERVICE").unwrap());

    let request = Request::put("http://example.com/items?id=1")
        .header("x-test", "yes")
        .body(Body::from("payload"))
        .unwrap();
    let response = block_on(service.fetch(request)).unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers["x-method"], "PUT");
    assert_eq!(headers["x-url"], "http://example.com/items?id=1");
    assert_eq!(headers["x-test"], "yes");
    assert_eq!(headers["x-leaked"], "no");
    let body = block_on(hyper::body::to_bytes(response.into_body())).unwrap();
    assert_eq!(body, "payload");

    assert!(matches!(
        service.call_method("fetch", vec![]),
        Err(ProxyError::Unsupported { .. })
    ));
    let request = Request::get("http://example.com/").body(Body::empty()).unwrap();
    assert!(block_on(client.env().fetch(request)).is_err());
}

#[test]
fn passthrough_responses_stream_as_they_arrive() {
    let sandbox = Sandbox::start();
    let client = sandbox.client();
    let trickle = stub(client.env().get("TRICKLE").unwrap());

    let request = Request::get("http://example.com/feed").body(Body::empty()).unwrap();
    let response = block_on(trickle.fetch(request)).unwrap();
    let mut body = response.into_body();

    let first = sandbox
        .runtime
        .block_on(async { tokio::time::timeout(Duration::from_secs(3), body.next()).await })
        .expect("first chunk held back until the body completed")
        .unwrap()
        .unwrap();
    assert_eq!(first, "first");

    sandbox.gate.notify_one();
    let rest = block_on(hyper::body::to_bytes(body)).unwrap();
    assert_eq!(rest, "rest");
}

#[test]
fn always_async_types_skip_the_sync_path() {
    let sandbox = Sandbox::start();
    let client = sandbox.client();
    let durable = stub(client.global().get("durable").unwrap());
    assert_eq!(durable.type_name(), "DurableObject");

    sandbox.clear();
    let result = durable.call_method("ping", vec![]).unwrap();
    assert!(matches!(result, Value::Promise(_)));
    assert_eq!(block_on(result.settle()).unwrap(), Value::from("pong"));

    let requests = sandbox.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].op, "CALL");
    assert!(!requests[0].sync);
}

#[test]
fn metadata_is_written_into_the_callers_headers() {
    let sandbox = Sandbox::start();
    let client = sandbox.client();
    let object = stub(client.env().get("OBJECT").unwrap());

    let headers = Headers::from_entries([("x-existing", "1")]);
    let result = object
        .call_method("writeHttpMetadata", vec![Value::Headers(headers.clone())])
        .unwrap();
    assert_eq!(result, Value::Undefined);
    assert_eq!(headers.get("content-type").as_deref(), Some("text/plain"));
    assert_eq!(headers.get("etag").as_deref(), Some("\"v1\""));
    assert_eq!(headers.get("x-existing").as_deref(), Some("1"));
}

#[test]
fn keys_and_descriptors_are_read_once() {
    let sandbox = Sandbox::start();
    let client = sandbox.client();
    let env = client.env();

    assert_eq!(env.own_keys().unwrap(), vec!["TEXT", "SERVICE", "OBJECT"]);
    assert_eq!(
        env.own_descriptor("TEXT").unwrap(),
        Some(PropertyDescriptor::data())
    );
    assert_eq!(env.own_descriptor("NOPE").unwrap(), None);
    assert!(env.has("TEXT").unwrap());
    assert!(!env.has("NOPE").unwrap());

    sandbox.clear();
    env.own_keys().unwrap();
    env.own_descriptor("TEXT").unwrap();
    env.own_descriptor("NOPE").unwrap();
    assert!(sandbox.requests().is_empty());
}

#[test]
fn stubs_describe_themselves() {
    let sandbox = Sandbox::start();
    let client = sandbox.client();
    let env = client.env();

    assert_eq!(
        format!("{env:?}"),
        r#"ProxyStub { name: "Object", poisoned: false }"#
    );
    client.poison();
    assert_eq!(
        format!("{env:?}"),
        r#"ProxyStub { name: "Object", poisoned: true }"#
    );
}

#[test]
fn dispatcher_rejects_bad_requests() {
    let sandbox = Sandbox::start();
    let secret = hex::encode(SECRET);
    let request = |host: &str, secret: &str, op: &str, target: &str| {
        Request::post("/")
            .header("host", host)
            .header(headers::OP_SECRET, secret)
            .header(headers::OP, op)
            .header(headers::OP_TARGET, target)
            .body(Body::empty())
            .unwrap()
    };

    let free = sandbox.raw(request("127.0.0.1:1", &secret, "FREE", "40,41,42"));
    assert_eq!(free.status(), StatusCode::NO_CONTENT);
    let bad_list = sandbox.raw(request("127.0.0.1:1", &secret, "FREE", "4,x"));
    assert_eq!(bad_list.status(), StatusCode::BAD_REQUEST);
    let wrong_secret = sandbox.raw(request("localhost", "00ff", "FREE", "4"));
    assert_eq!(wrong_secret.status(), StatusCode::UNAUTHORIZED);
    let wrong_host = sandbox.raw(request("example.com", &secret, "FREE", "4"));
    assert_eq!(wrong_host.status(), StatusCode::UNAUTHORIZED);
    let unknown_op = sandbox.raw(request("[::1]:9", &secret, "DESTROY", "4"));
    assert_eq!(unknown_op.status(), StatusCode::NOT_FOUND);
}

#[test]
fn protocol_rejections_surface_as_protocol_errors() {
    let sandbox = Sandbox::start();
    let client = ProxyClient::new(sandbox.url(), b"wrong-secret", ClientOptions::default())
        .unwrap();
    assert!(matches!(
        client.env().get("TEXT"),
        Err(ProxyError::Protocol { status: 401, .. })
    ));
}

#[test]
fn serve_answers_only_proxy_requests() {
    let runtime = Runtime::new().unwrap();
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let dispatcher = Arc::new(Dispatcher::new(
        SECRET,
        Arc::new(Global),
        Arc::new(Env::default()),
    ));
    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
    let server = runtime.spawn(serve(listener, dispatcher, async {
        stopped.await.ok();
    }));

    let client = ProxyClient::new(
        format!("http://{addr}").parse().unwrap(),
        SECRET,
        ClientOptions::default(),
    )
    .unwrap();
    assert_eq!(client.env().get("TEXT").unwrap(), Value::from("hello"));

    let status = runtime.block_on(async {
        hyper::Client::new()
            .get(format!("http://{addr}/").parse().unwrap())
            .await
            .unwrap()
            .status()
    });
    assert_eq!(status, StatusCode::NOT_FOUND);

    drop(client);
    stop.send(()).unwrap();
    runtime.block_on(server).unwrap().unwrap();
}
