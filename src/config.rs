use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::conn::ConnectionOptions;

/// Connection and pool settings for one client.
///
/// Deserializable so deployments can keep client settings in YAML next to
/// the rest of their service configuration. Knobs that are code rather than
/// data (backoff prototype, breaker gate, dialer factory) attach through
/// `ClientBuilder`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Primary server address, e.g. "127.0.0.1:6379".
    pub addr: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub database: i64,
    #[serde(default = "default_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub write_timeout_secs: u64,
    #[serde(default = "default_pool_capacity")]
    pub pool_capacity: usize,
    /// Absent means a borrow blocks until a slot frees up.
    #[serde(default)]
    pub borrow_timeout_ms: Option<u64>,
    /// Empty means no read-replica client is created.
    #[serde(default)]
    pub read_replica_addrs: Vec<String>,
}

// Default values for client configuration
fn default_timeout_secs() -> u64 {
    5
}
fn default_pool_capacity() -> usize {
    10
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:6379".to_string(),
            password: String::new(),
            database: 0,
            connect_timeout_secs: default_timeout_secs(),
            read_timeout_secs: default_timeout_secs(),
            write_timeout_secs: default_timeout_secs(),
            pool_capacity: default_pool_capacity(),
            borrow_timeout_ms: None,
            read_replica_addrs: Vec::new(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from a YAML file
    pub async fn from_yaml_file(path: &str) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound(path.to_string())
            } else {
                ConfigError::IoError(e.to_string())
            }
        })?;

        Self::from_yaml_str(&content)
    }

    /// Parse configuration from a YAML string (useful for testing)
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig =
            serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration for common errors
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.addr.is_empty() {
            return Err(ConfigError::ValidationError(
                "addr must not be empty".to_string(),
            ));
        }

        if self.pool_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "pool_capacity must be at least 1".to_string(),
            ));
        }

        for addr in &self.read_replica_addrs {
            if addr.is_empty() {
                return Err(ConfigError::ValidationError(
                    "read_replica_addrs must not contain empty addresses".to_string(),
                ));
            }
        }

        Ok(())
    }

    pub fn borrow_timeout(&self) -> Option<Duration> {
        self.borrow_timeout_ms.map(Duration::from_millis)
    }

    pub(crate) fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            password: self.password.clone(),
            database: self.database,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            read_timeout: Duration::from_secs(self.read_timeout_secs),
            write_timeout: Duration::from_secs(self.write_timeout_secs),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("File not found: {0}")]
    FileNotFound(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
}
