//! The emulator driving the real sandbox binary

use hearth::{Emulator, EmulatorError, ProxyError, Stub, StubKind, Value};
use hearth_config::EmulatorConfig;
use hearth_runtime::StartupFailureKind;
use hearth_sandbox::{Binding, SandboxProvider};
use hearth_types::StreamHandle;
use hyper::{Body, Request, StatusCode};
use serde_json::json;
use std::net::TcpListener;
use std::sync::Arc;

fn config() -> EmulatorConfig {
    let mut config = EmulatorConfig::default();
    config.runtime.binary = env!("CARGO_BIN_EXE_hearth-sandbox").to_string();
    config
}

fn provider() -> SandboxProvider {
    SandboxProvider::new(vec![
        Binding::text("TEXT", "hello"),
        Binding::json("DATA", &json!({"items": [1, 2], "ok": true})),
        Binding::echo("SERVICE"),
    ])
}

async fn start() -> Emulator {
    Emulator::start(config(), provider()).await.unwrap()
}

fn stub(value: Value) -> Arc<Stub> {
    value.into_native::<Stub>().expect("expected a stub")
}

fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test(flavor = "multi_thread")]
async fn global_scope_encodes_base64() {
    let emulator = start().await;
    let global = emulator.global().await.unwrap();

    assert_eq!(global.type_name(), "ServiceWorkerGlobalScope");
    assert_eq!(
        global.call_method("btoa", vec![Value::from("hello")]).unwrap(),
        Value::from("aGVsbG8=")
    );
    assert_eq!(
        global.call_method("atob", vec![Value::from("aGVsbG8=")]).unwrap(),
        Value::from("hello")
    );

    let err = global
        .call_method("atob", vec![Value::from("***")])
        .unwrap_err();
    assert_eq!(err.thrown_error().map(|e| e.name.as_str()), Some("Error"));

    let cloned = global
        .call_method("structuredClone", vec![Value::object([("a", Value::from(1))])])
        .unwrap();
    assert_eq!(cloned, Value::object([("a", Value::from(1))]));

    emulator.dispose().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn env_bindings_are_readable() {
    let emulator = start().await;
    let env = emulator.env().await.unwrap();

    assert_eq!(env.get("TEXT").unwrap(), Value::from("hello"));
    assert_eq!(
        env.get("DATA").unwrap(),
        Value::object([
            (
                "items",
                Value::Array(vec![Value::from(1), Value::from(2)])
            ),
            ("ok", Value::Bool(true)),
        ])
    );
    assert!(env.get("MISSING").unwrap().is_undefined());
    assert_eq!(env.own_keys().unwrap(), vec!["TEXT", "DATA", "SERVICE"]);

    let service = stub(env.get("SERVICE").unwrap());
    assert_eq!(service.type_name(), "Fetcher");
    assert_eq!(service.kind(), StubKind::ObjectLike);

    emulator.dispose().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn service_fetch_is_passed_through() {
    let emulator = start().await;
    let service = stub(emulator.env().await.unwrap().get("SERVICE").unwrap());

    let request = Request::post("http://service.local/upload?v=2")
        .header("x-trace", "abc")
        .body(Body::from("payload"))
        .unwrap();
    let response = service.fetch(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-echo-method"], "POST");
    assert_eq!(
        response.headers()["x-echo-url"],
        "http://service.local/upload?v=2"
    );
    assert_eq!(response.headers()["x-trace"], "abc");
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    assert_eq!(body, "payload");

    assert!(matches!(
        service.call_method("fetch", vec![]),
        Err(ProxyError::Unsupported { .. })
    ));

    emulator.dispose().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn host_and_sandbox_share_the_call_policy() {
    let emulator = start().await;
    let mut renamed = config();
    renamed.proxy.policy.fetch_key = "handle".into();
    emulator.set_options(renamed).await.unwrap();

    let service = stub(emulator.env().await.unwrap().get("SERVICE").unwrap());
    let request = Request::get("http://service.local/renamed")
        .body(Body::empty())
        .unwrap();
    let response = service.fetch(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["x-echo-url"],
        "http://service.local/renamed"
    );
    assert!(matches!(
        service.call_method("handle", vec![]),
        Err(ProxyError::Unsupported { .. })
    ));

    emulator.dispose().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn streams_and_promises_cross_the_boundary() {
    let emulator = start().await;
    let service = stub(emulator.env().await.unwrap().get("SERVICE").unwrap());

    let upload = StreamHandle::from_chunks(vec!["stream ".into(), "body".into()]);
    let echoed = service
        .call_method("echo", vec![Value::Stream(upload)])
        .unwrap()
        .settle()
        .await
        .unwrap();
    let Value::Stream(handle) = echoed else {
        panic!("expected a stream, got {echoed:?}");
    };
    assert_eq!(handle.read_all().await.unwrap(), "stream body");

    for _ in 0..2 {
        let delayed = service
            .call_method("delay", vec![Value::from(20), Value::from("later")])
            .unwrap();
        assert!(matches!(delayed, Value::Promise(_)));
        assert_eq!(delayed.settle().await.unwrap(), Value::from("later"));
    }

    emulator.dispose().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn function_values_are_callable() {
    let emulator = start().await;
    let service = stub(emulator.env().await.unwrap().get("SERVICE").unwrap());

    let reflector = stub(service.call_method("reflector", vec![]).unwrap());
    assert_eq!(reflector.kind(), StubKind::Callable);
    assert_eq!(
        reflector
            .call(vec![Value::from(1), Value::from("two")])
            .unwrap(),
        Value::Array(vec![Value::from(1), Value::from("two")])
    );

    emulator.dispose().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn set_options_restarts_on_the_same_random_port() {
    let emulator = start().await;
    let port = emulator.socket_ports().await.unwrap()["entry"];
    let env = emulator.env().await.unwrap();
    assert_eq!(env.get("TEXT").unwrap(), Value::from("hello"));

    let mut updated = config();
    updated.runtime.verbose = true;
    emulator.set_options(updated).await.unwrap();

    assert!(matches!(env.get("TEXT"), Err(ProxyError::Poisoned)));
    assert_eq!(emulator.socket_ports().await.unwrap()["entry"], port);
    let env = emulator.env().await.unwrap();
    assert_eq!(env.get("TEXT").unwrap(), Value::from("hello"));

    emulator.dispose().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn second_sandbox_on_a_taken_port_fails() {
    let port = free_port();
    let mut fixed = config();
    fixed.runtime.port = port;

    let first = Emulator::start(fixed.clone(), provider()).await.unwrap();
    let err = Emulator::start(fixed, provider()).await.err().unwrap();
    match err {
        EmulatorError::RuntimeFailure { kind } => assert_eq!(
            kind,
            StartupFailureKind::AddressInUse {
                address: format!("127.0.0.1:{port}")
            }
        ),
        other => panic!("unexpected error {other:?}"),
    }

    first.dispose().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn dispose_poisons_stubs() {
    let emulator = start().await;
    let global = emulator.global().await.unwrap();

    emulator.dispose().await;
    assert!(global.is_poisoned());
    assert!(matches!(
        global.call_method("btoa", vec![Value::from("x")]),
        Err(ProxyError::Poisoned)
    ));
    assert!(matches!(
        emulator.global().await,
        Err(EmulatorError::Disposed)
    ));
}
