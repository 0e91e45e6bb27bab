//! Configuration schema and loader for the weathervane aggregator.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level aggregator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// TCP port the aggregator listens on.
    pub port: u16,

    /// Directory holding the persisted station files. Defaults to the
    /// working directory; multiple instances should each get their own.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Record expiry settings.
    #[serde(default)]
    pub expiry: ExpiryConfig,

    /// Optional Prometheus metrics HTTP port.
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpiryConfig {
    /// Age in milliseconds after which a record expires.
    #[serde(default = "default_max_age_ms")]
    pub max_age_ms: u64,

    /// Number of fleet-wide admitted writes a record may fall behind
    /// before it counts as stale.
    #[serde(default = "default_max_update_lag")]
    pub max_update_lag: u64,

    /// Seconds between expiry sweeps.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            max_age_ms: default_max_age_ms(),
            max_update_lag: default_max_update_lag(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl ExpiryConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

// --- Defaults ---

fn default_data_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_max_age_ms() -> u64 {
    30_000
}
fn default_max_update_lag() -> u64 {
    20
}
fn default_sweep_interval_secs() -> u64 {
    120
}

// --- Loading ---

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl AggregatorConfig {
    /// A config with defaults for everything but the port.
    pub fn for_port(port: u16) -> Self {
        Self {
            port,
            data_dir: default_data_dir(),
            expiry: ExpiryConfig::default(),
            metrics_port: None,
        }
    }

    /// Validate that configuration values are consistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::Invalid("port must be in 1..=65535".into()));
        }
        if self.expiry.max_age_ms == 0 {
            return Err(ConfigError::Invalid("expiry.max_age_ms must be > 0".into()));
        }
        if self.expiry.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "expiry.sweep_interval_secs must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Load an `AggregatorConfig` from a YAML file path.
pub fn load_from_file(path: &std::path::Path) -> Result<AggregatorConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    load_from_str(&contents)
}

/// Load an `AggregatorConfig` from a YAML string.
pub fn load_from_str(yaml: &str) -> Result<AggregatorConfig, ConfigError> {
    let config: AggregatorConfig = serde_yaml::from_str(yaml)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let yaml = "port: 4567\n";
        let config = load_from_str(yaml).unwrap();
        assert_eq!(config.port, 4567);
        assert_eq!(config.data_dir, PathBuf::from("."));
        assert_eq!(config.expiry.max_age_ms, 30_000);
        assert_eq!(config.expiry.max_update_lag, 20);
        assert_eq!(config.expiry.sweep_interval_secs, 120);
        assert!(config.metrics_port.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
port: 9000
data_dir: /var/lib/weathervane
expiry:
  max_age_ms: 10000
  max_update_lag: 5
  sweep_interval_secs: 30
metrics_port: 9901
"#;
        let config = load_from_str(yaml).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/weathervane"));
        assert_eq!(config.expiry.max_age_ms, 10_000);
        assert_eq!(config.expiry.max_update_lag, 5);
        assert_eq!(config.expiry.sweep_interval(), Duration::from_secs(30));
        assert_eq!(config.metrics_port, Some(9901));
    }

    #[test]
    fn test_roundtrip_yaml() {
        let config = load_from_str("port: 1234\n").unwrap();
        let serialized = serde_yaml::to_string(&config).unwrap();
        let config2 = load_from_str(&serialized).unwrap();
        assert_eq!(config.port, config2.port);
        assert_eq!(config.expiry.max_age_ms, config2.expiry.max_age_ms);
    }

    #[test]
    fn test_rejects_zero_port() {
        let result = load_from_str("port: 0\n");
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("port"), "error should mention port: {}", err);
    }

    #[test]
    fn test_rejects_zero_sweep_interval() {
        let yaml = "port: 4567\nexpiry:\n  sweep_interval_secs: 0\n";
        let result = load_from_str(yaml);
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(
            err.contains("sweep_interval_secs"),
            "error should mention sweep_interval_secs: {}",
            err
        );
    }

    #[test]
    fn test_rejects_zero_max_age() {
        let yaml = "port: 4567\nexpiry:\n  max_age_ms: 0\n";
        assert!(load_from_str(yaml).is_err());
    }

    #[test]
    fn test_for_port_defaults() {
        let config = AggregatorConfig::for_port(4567);
        config.validate().unwrap();
        assert_eq!(config.port, 4567);
        assert_eq!(config.expiry.max_update_lag, 20);
    }
}
