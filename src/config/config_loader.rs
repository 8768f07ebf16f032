/// Configuration file loader for the bridge client
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::{BridgeConfig, ConfigError};

/// Configuration loader responsible for loading and parsing configuration files
pub struct ConfigLoader;

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self
    }

    /// Load configuration from an explicit file, or from the default
    /// location when it exists, or fall back to built-in defaults
    pub fn load_config(&self, config_path: Option<&Path>) -> Result<BridgeConfig, ConfigError> {
        match config_path {
            Some(path) => self.load_config_from_file(path),
            None => match default_config_path() {
                Some(path) if path.exists() => {
                    info!("Using default configuration file path: {:?}", path);
                    self.load_config_from_file(&path)
                }
                _ => {
                    debug!("No configuration file found, using defaults");
                    Ok(BridgeConfig::default())
                }
            },
        }
    }

    /// Load configuration from a specific file path
    pub fn load_config_from_file(&self, path: &Path) -> Result<BridgeConfig, ConfigError> {
        info!("Loading configuration from file: {:?}", path);

        let contents = fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigError::FileNotFound(path.display().to_string()),
            _ => ConfigError::FileOpenError(e),
        })?;

        self.parse_config(&contents)
    }

    /// Parse configuration from string content
    pub fn parse_config(&self, content: &str) -> Result<BridgeConfig, ConfigError> {
        let config: BridgeConfig = toml::from_str(content)?;
        debug!("Loaded configuration: {:?}", config);
        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Default configuration path: `bridge.toml` in the working directory
pub fn default_config_path() -> Option<PathBuf> {
    std::env::current_dir().ok().map(|dir| dir.join("bridge.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use std::io::Write;

    #[test]
    fn parses_partial_file_with_defaults() {
        let config = ConfigLoader::new()
            .parse_config("[server]\nbase_url = \"wss://bridge.example.com/api\"\n")
            .unwrap();
        assert_eq!(config.server.base_url, "wss://bridge.example.com/api");
        assert_eq!(config.connection.connect_timeout_secs, 10);
    }

    #[test]
    fn empty_file_yields_defaults() {
        let config = ConfigLoader::new().parse_config("").unwrap();
        assert_eq!(config, BridgeConfig::default());
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[connection]\nconnect_timeout_secs = 3").unwrap();

        let config = ConfigLoader::new().load_config(Some(file.path())).unwrap();
        assert_eq!(config.connection.connect_timeout_secs, 3);
        assert_eq!(config.server, ServerConfig::default());
    }

    #[test]
    fn missing_explicit_file_is_reported() {
        let err = ConfigLoader::new()
            .load_config(Some(Path::new("/nonexistent/bridge.toml")))
            .unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let err = ConfigLoader::new().parse_config("[server\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }
}
