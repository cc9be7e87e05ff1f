//! Sandbox configuration
//!
//! The supervisor writes one bincode-encoded [`SandboxConfig`] to stdin.
//! [`SandboxProvider`] builds it on the host side from the emulator's
//! [`ConfigRequest`] plus the bindings the embedder wants in `env`.

use async_trait::async_trait;
use hearth::{ConfigProvider, ConfigRequest};
use hearth_types::{CallPolicy, Value};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SandboxError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxConfig {
    pub proxy_secret: Vec<u8>,
    pub bindings: Vec<Binding>,
    pub policy: CallPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub name: String,
    pub value: BindingValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BindingValue {
    Text(String),
    /// JSON document as text; bincode cannot carry `serde_json::Value`
    Json(String),
    /// An echo service
    Echo,
}

impl Binding {
    pub fn text(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: BindingValue::Text(text.into()),
        }
    }

    pub fn json(name: impl Into<String>, json: &serde_json::Value) -> Self {
        Self {
            name: name.into(),
            value: BindingValue::Json(json.to_string()),
        }
    }

    pub fn echo(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: BindingValue::Echo,
        }
    }
}

impl BindingValue {
    /// Plain value for text and JSON bindings; services are built elsewhere
    pub fn to_value(&self) -> Result<Option<Value>> {
        match self {
            Self::Text(text) => Ok(Some(Value::String(text.clone()))),
            Self::Json(json) => {
                let parsed: serde_json::Value = serde_json::from_str(json)?;
                Ok(Some(Value::from_json(parsed)))
            }
            Self::Echo => Ok(None),
        }
    }
}

impl SandboxConfig {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| SandboxError::Config(e.to_string()))
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| SandboxError::Config(e.to_string()))
    }
}

/// Host-side provider for the reference sandbox. The dispatcher gets the
/// same call policy as the host bridge.
#[derive(Debug, Clone, Default)]
pub struct SandboxProvider {
    pub bindings: Vec<Binding>,
}

impl SandboxProvider {
    pub fn new(bindings: Vec<Binding>) -> Self {
        Self { bindings }
    }
}

#[async_trait]
impl ConfigProvider for SandboxProvider {
    async fn assemble(&self, request: &ConfigRequest) -> anyhow::Result<Vec<u8>> {
        let config = SandboxConfig {
            proxy_secret: request.proxy_secret.clone(),
            bindings: self.bindings.clone(),
            policy: request.policy.clone(),
        };
        Ok(config.encode()?)
    }
}
