//! Configuration Module
//!
//! Configuration loading for the stream binary.

mod settings;

pub use settings::{AppConfig, ConfigError, ServerSettings};
