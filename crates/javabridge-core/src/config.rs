//! Centralized configuration for the bridge.
//!
//! Protocol and pool constants live in unit structs; the server settings
//! that an operator may change are in [`ServerConfig`].

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Wire protocol constants.
pub struct ProtocolConfig;

impl ProtocolConfig {
    /// Initial capacity of a connection's reference table.
    pub const REF_TABLE_SIZE: usize = 1021;
    /// Base64 output is wrapped after this many 4-character groups.
    pub const BASE64_LINE_QUARTETS: usize = 19;
    /// Largest tag name or attribute value the parser accepts.
    pub const MAX_TOKEN_LEN: usize = 64 * 1024 * 1024;
    /// Bytes of a request or reply shown in debug logs.
    pub const LOG_PREVIEW_BYTES: usize = 256;
    /// Encoding used until the peer negotiates another one.
    pub const DEFAULT_ENCODING: &'static str = "UTF-8";
}

/// Worker pool constants.
pub struct PoolConfig;

impl PoolConfig {
    pub const DEFAULT_POOL_SIZE: usize = 20;
    pub const THREAD_NAME_PREFIX: &'static str = "JavaBridgeThreadPool";
    /// How long destroying a resource group waits for its threads.
    pub const GROUP_DESTROY_TIMEOUT: Duration = Duration::from_millis(1000);
    pub const GROUP_JOIN_POLL: Duration = Duration::from_millis(5);
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub pool_size: usize,
    pub max_connections: usize,
    pub group_destroy_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            pool_size: PoolConfig::DEFAULT_POOL_SIZE,
            max_connections: 256,
            group_destroy_timeout_ms: PoolConfig::GROUP_DESTROY_TIMEOUT.as_millis() as u64,
        }
    }
}

impl ServerConfig {
    /// Load a configuration from a JSON file. Missing keys keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| BridgeError::Config {
            message: format!("cannot read {}: {}", path.display(), e),
        })?;
        let config: ServerConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pool cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(BridgeError::Config {
                message: "pool_size must be at least 1".to_string(),
            });
        }
        if self.max_connections == 0 {
            return Err(BridgeError::Config {
                message: "max_connections must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn group_destroy_timeout(&self) -> Duration {
        Duration::from_millis(self.group_destroy_timeout_ms)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pool_size, PoolConfig::DEFAULT_POOL_SIZE);
        assert_eq!(config.bind_addr(), "127.0.0.1:0");
    }

    #[test]
    fn test_from_file_keeps_missing_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"port": 9267, "pool_size": 4}}"#).unwrap();

        let config = ServerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.port, 9267);
        assert_eq!(config.pool_size, 4);
        assert_eq!(config.host, "127.0.0.1");
    }

    #[test]
    fn test_from_file_rejects_zero_pool() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"pool_size": 0}}"#).unwrap();

        let err = ServerConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, BridgeError::Config { .. }));
    }

    #[test]
    fn test_from_missing_file() {
        let err = ServerConfig::from_file("/nonexistent/bridge.json").unwrap_err();
        assert!(err.to_string().contains("cannot read"));
    }
}
