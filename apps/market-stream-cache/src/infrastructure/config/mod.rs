//! Configuration Module
//!
//! Environment-driven configuration for one exchange feed.

mod settings;

pub use settings::{AppConfig, ConfigError, ServerSettings, SessionConfig, StoreSettings};
