//! Configuration Module
//!
//! Loads and validates configuration from TOML files; secrets come from
//! the environment.

pub mod loader;

pub use loader::{load_config, master_secret, Config, ConfigError, MASTER_SECRET_ENV};
