//! # Hearth Configuration
//!
//! Centralized configuration for the emulator and its sandbox process.
//!
//! ## Features
//!
//! - **Runtime settings**: sandbox binary, listen host/ports, inspector, colour
//! - **Proxy settings**: batched-free debounce window and call policy
//! - **Logging**: tracing filter and JSON output toggle
//!
//! ## Usage
//!
//! ```rust,no_run
//! use hearth_config::{init_tracing, EmulatorConfig};
//!
//! let config = EmulatorConfig::load(None)?;
//! init_tracing(&config.logging);
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod emulator_config;
pub mod logging;

// Re-export commonly used types
pub use emulator_config::{
    format_address, load_config, EmulatorConfig, LoggingConfig, ProxySettings, RuntimeSettings,
};
pub use logging::init_tracing;
