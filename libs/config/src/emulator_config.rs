//! Emulator Configuration Module
//!
//! Loads [`EmulatorConfig`] from an optional TOML file with `HEARTH_`
//! environment overrides, e.g. `HEARTH_RUNTIME__VERBOSE=true` or
//! `HEARTH_PROXY__FREE_DEBOUNCE_MS=250`.

use anyhow::{Context, Result};
use config_crate::{Config, Environment, File};
use hearth_types::CallPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Main emulator configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct EmulatorConfig {
    /// Sandbox process settings
    pub runtime: RuntimeSettings,

    /// Object proxy settings
    pub proxy: ProxySettings,

    /// Log output settings
    pub logging: LoggingConfig,
}

/// Sandbox process settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Sandbox executable; `~` and `$VARS` are expanded
    pub binary: String,
    pub host: String,
    /// Entry socket port, 0 for a random one
    pub port: u16,
    pub inspector_port: Option<u16>,
    pub verbose: bool,
    pub force_color: bool,
    /// Threads of the HTTP helper runtime
    pub worker_threads: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            binary: "hearth-sandbox".to_string(),
            host: "127.0.0.1".to_string(),
            port: 0,
            inspector_port: None,
            verbose: false,
            force_color: false,
            worker_threads: 2,
        }
    }
}

/// Object proxy settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ProxySettings {
    /// Quiet period before released stubs are freed in one batch
    pub free_debounce_ms: u64,
    pub policy: CallPolicy,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            free_debounce_ms: 100,
            policy: CallPolicy::default(),
        }
    }
}

impl ProxySettings {
    pub fn free_debounce(&self) -> Duration {
        Duration::from_millis(self.free_debounce_ms)
    }
}

/// Log output settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "hearth=info,warn".to_string(),
            json: false,
        }
    }
}

impl EmulatorConfig {
    /// Load configuration from an optional file with environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults =
            Config::try_from(&Self::default()).context("Failed to serialize default configuration")?;
        let mut builder = Config::builder().add_source(defaults);

        if let Some(path) = path {
            info!("Loading emulator config: {:?}", path);
            builder = builder.add_source(File::from(path).required(true));
        }

        // Override with environment variables (HEARTH_ prefix)
        builder = builder.add_source(
            Environment::with_prefix("HEARTH")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;
        let mut config: Self = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.expand_env_vars()?;
        debug!(?config, "Emulator configuration loaded");
        Ok(config)
    }

    /// Parse a TOML document without consulting the environment
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(text).context("Failed to parse TOML configuration")?;
        config.expand_env_vars()?;
        Ok(config)
    }

    /// Expand `~` and environment variables in path values
    pub fn expand_env_vars(&mut self) -> Result<()> {
        let expanded = shellexpand::full(&self.runtime.binary)
            .context("Failed to expand runtime binary path")?;
        self.runtime.binary = expanded.to_string();
        Ok(())
    }
}

impl RuntimeSettings {
    pub fn binary_path(&self) -> PathBuf {
        PathBuf::from(&self.binary)
    }

    pub fn entry_address(&self) -> String {
        format_address(&self.host, self.port)
    }

    pub fn inspector_address(&self) -> Option<String> {
        self.inspector_port.map(|port| format_address(&self.host, port))
    }
}

/// `host:port`, bracketing bare IPv6 hosts
pub fn format_address(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Convenience function to load configuration from the default location
pub fn load_config(path: Option<&Path>) -> Result<EmulatorConfig> {
    EmulatorConfig::load(path)
}
