/// Configuration module for the bridge client
mod config;
mod config_loader;
mod error;

pub use config::*;
pub use config_loader::{ConfigLoader, default_config_path};
pub use error::ConfigError;
