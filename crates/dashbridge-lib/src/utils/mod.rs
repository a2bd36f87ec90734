// Utilities module

pub mod config;

pub use config::{BridgeConfig, ConfigError};
