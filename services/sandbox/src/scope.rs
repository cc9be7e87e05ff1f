//! Objects the sandbox exposes at the fixed heap addresses

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hearth_proxy::{live, Property, RemoteObject};
use hearth_types::{Pending, ProxyError, Result, Value};
use hyper::{Body, Request, Response};
use std::time::Duration;

use crate::config::{Binding, BindingValue};
use crate::error;

/// The global scope at address 0
pub struct GlobalScope;

impl RemoteObject for GlobalScope {
    fn type_name(&self) -> &str {
        hearth_proxy::GLOBAL_TYPE_NAME
    }

    fn get(&self, key: &str) -> Property {
        match key {
            "atob" | "btoa" | "structuredClone" => Property::Method,
            _ => Property::Missing,
        }
    }

    fn call(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        let mut args = args.into_iter();
        let first = args.next().unwrap_or(Value::Undefined);
        match method {
            "btoa" => btoa(&string_arg(method, first)?).map(Value::String),
            "atob" => atob(&string_arg(method, first)?).map(Value::String),
            "structuredClone" => Ok(first),
            other => Err(ProxyError::type_error(format!("{other} is not a function"))),
        }
    }
}

fn string_arg(method: &str, value: Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Undefined => Err(ProxyError::type_error(format!(
            "{method} requires at least 1 argument"
        ))),
        other => Err(ProxyError::type_error(format!(
            "{method} expects a string, got {}",
            other.type_label()
        ))),
    }
}

/// Base64 of a Latin-1 string
fn btoa(input: &str) -> Result<String> {
    let bytes = input
        .chars()
        .map(|c| {
            u8::try_from(u32::from(c)).map_err(|_| ProxyError::throw("Error", "Invalid character"))
        })
        .collect::<Result<Vec<u8>>>()?;
    Ok(STANDARD.encode(bytes))
}

/// Latin-1 string from base64, ignoring ASCII whitespace
fn atob(input: &str) -> Result<String> {
    let compact: String = input.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact)
        .map_err(|_| {
            ProxyError::throw("Error", "The string to be decoded is not correctly encoded.")
        })?;
    Ok(bytes.into_iter().map(char::from).collect())
}

/// The environment bindings at address 1
pub struct Env {
    bindings: Vec<(String, Value)>,
}

impl Env {
    pub fn from_bindings(bindings: &[Binding]) -> error::Result<Self> {
        let bindings = bindings
            .iter()
            .map(|binding| {
                let value = match &binding.value {
                    BindingValue::Echo => live(EchoService),
                    plain => plain.to_value()?.unwrap_or(Value::Undefined),
                };
                Ok((binding.name.clone(), value))
            })
            .collect::<error::Result<Vec<_>>>()?;
        Ok(Self { bindings })
    }
}

impl RemoteObject for Env {
    fn type_name(&self) -> &str {
        hearth_proxy::ENV_TYPE_NAME
    }

    fn get(&self, key: &str) -> Property {
        self.bindings
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| Property::Value(value.clone()))
            .unwrap_or(Property::Missing)
    }

    fn own_keys(&self) -> Vec<String> {
        self.bindings.iter().map(|(name, _)| name.clone()).collect()
    }
}

/// Service binding that reflects what it receives
pub struct EchoService;

#[async_trait]
impl RemoteObject for EchoService {
    fn type_name(&self) -> &str {
        "Fetcher"
    }

    fn get(&self, key: &str) -> Property {
        match key {
            "fetch" | "echo" | "delay" | "reflector" => Property::Method,
            _ => Property::Missing,
        }
    }

    fn call(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        let mut args = args.into_iter();
        match method {
            "echo" => Ok(args.next().unwrap_or(Value::Undefined)),
            "delay" => {
                let ms = args.next().and_then(|v| v.as_f64()).unwrap_or(0.0).max(0.0);
                let value = args.next().unwrap_or(Value::Undefined);
                Ok(Value::Promise(Pending::new(async move {
                    tokio::time::sleep(Duration::from_millis(ms as u64)).await;
                    Ok(value)
                })))
            }
            "reflector" => Ok(live(Reflector)),
            other => Err(ProxyError::type_error(format!(
                "Fetcher.{other} is not a function"
            ))),
        }
    }

    async fn fetch(&self, request: Request<Body>) -> Result<Response<Body>> {
        let mut response = Response::builder()
            .header("x-echo-method", request.method().as_str())
            .header("x-echo-url", request.uri().to_string());
        for (name, value) in request.headers() {
            if name.as_str().starts_with("x-") {
                response = response.header(name, value.clone());
            }
        }
        response
            .body(request.into_body())
            .map_err(|e| ProxyError::type_error(e.to_string()))
    }
}

/// Function value returning its arguments as an array
pub struct Reflector;

impl RemoteObject for Reflector {
    fn type_name(&self) -> &str {
        "Function"
    }

    fn is_function(&self) -> bool {
        true
    }

    fn get(&self, _key: &str) -> Property {
        Property::Missing
    }

    fn invoke(&self, args: Vec<Value>) -> Result<Value> {
        Ok(Value::Array(args))
    }
}
