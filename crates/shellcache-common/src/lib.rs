//! # shellcache common
//!
//! Logging configuration and JSON config loading shared by the shellcache crates.

pub mod config;
pub mod logging;

pub use config::{load_json, save_json, ConfigError};
pub use logging::{init_logging, LogConfig, LogFormat};
