//! # Configuration
//!
//! Layered client configuration: defaults, JSON file, overrides.

pub mod config_client;

pub use config_client::{load_config, ClientConfig, ConfigOverrides, ReconnectPolicy};
