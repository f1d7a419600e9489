use crate::core::errors::{ChapterlaneError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Engine configuration with all tuning parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChapterlaneConfig {
    // Context configuration
    /// Number of preceding chapters sent as context
    pub context_depth: usize,
    /// Upper bound accepted for `context_depth`
    pub max_context_depth: usize,
    /// Persist ordinals discovered through link-chain traversal
    pub infer_ordinals: bool,

    // Provider configuration
    /// Retries the provider client may attempt on its own
    pub max_retries: u32,
    /// Hard limit for a single provider call
    pub provider_timeout_ms: u64,

    // Events
    /// Capacity of the buffering event sink
    pub event_buffer: usize,

    // Storage configuration
    /// Database path for the sled resolver
    pub db_path: Option<PathBuf>,
    /// sled page cache size in bytes
    pub db_cache_size: u64,
    /// zstd level for stored records
    pub compression_level: i32,
}

impl Default for ChapterlaneConfig {
    fn default() -> Self {
        Self {
            context_depth: 2,
            max_context_depth: 20,
            infer_ordinals: true,

            max_retries: 3,
            provider_timeout_ms: 120_000, // 2 minutes

            event_buffer: 256,

            db_path: None,
            db_cache_size: 64 * 1024 * 1024, // 64MB
            compression_level: 3,
        }
    }
}

impl ChapterlaneConfig {
    /// Create a new builder
    pub fn builder() -> ChapterlaneConfigBuilder {
        ChapterlaneConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_context_depth == 0 {
            return Err(ChapterlaneError::configuration_field(
                "max_context_depth must be greater than 0",
                "max_context_depth",
            ));
        }
        if self.context_depth > self.max_context_depth {
            return Err(ChapterlaneError::configuration_field(
                format!(
                    "context_depth {} exceeds max_context_depth {}",
                    self.context_depth, self.max_context_depth
                ),
                "context_depth",
            ));
        }
        if self.provider_timeout_ms == 0 {
            return Err(ChapterlaneError::configuration_field(
                "provider_timeout_ms must be greater than 0",
                "provider_timeout_ms",
            ));
        }
        if self.event_buffer == 0 {
            return Err(ChapterlaneError::configuration_field(
                "event_buffer must be greater than 0",
                "event_buffer",
            ));
        }
        if !(1..=22).contains(&self.compression_level) {
            return Err(ChapterlaneError::configuration_field(
                "compression_level must be between 1 and 22",
                "compression_level",
            ));
        }
        Ok(())
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&raw)
    }

    /// Create a configuration suited to local development and tests
    pub fn development() -> Self {
        Self {
            provider_timeout_ms: 10_000,
            event_buffer: 64,
            db_cache_size: 8 * 1024 * 1024,
            compression_level: 1,
            ..Default::default()
        }
    }
}

/// Builder for ChapterlaneConfig
pub struct ChapterlaneConfigBuilder {
    config: ChapterlaneConfig,
}

impl ChapterlaneConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ChapterlaneConfig::default(),
        }
    }

    /// Set context depth
    pub fn context_depth(mut self, depth: usize) -> Self {
        self.config.context_depth = depth;
        self
    }

    /// Enable/disable ordinal inference
    pub fn infer_ordinals(mut self, enabled: bool) -> Self {
        self.config.infer_ordinals = enabled;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    /// Set provider timeout
    pub fn provider_timeout(mut self, timeout: Duration) -> Self {
        self.config.provider_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn event_buffer(mut self, capacity: usize) -> Self {
        self.config.event_buffer = capacity;
        self
    }

    /// Set database path
    pub fn db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.db_path = Some(path.into());
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<ChapterlaneConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ChapterlaneConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ChapterlaneConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.context_depth, 2);
    }

    #[test]
    fn test_development_config() {
        let config = ChapterlaneConfig::development();
        assert!(config.validate().is_ok());
        assert_eq!(config.provider_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_validation_errors() {
        let mut config = ChapterlaneConfig::default();

        config.context_depth = 50;
        assert!(config.validate().is_err());
        config.context_depth = 3;

        config.provider_timeout_ms = 0;
        assert!(config.validate().is_err());
        config.provider_timeout_ms = 1_000;

        config.compression_level = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder() {
        let config = ChapterlaneConfig::builder()
            .context_depth(5)
            .max_retries(1)
            .provider_timeout(Duration::from_secs(30))
            .infer_ordinals(false)
            .db_path("/tmp/chapterlane_db")
            .build()
            .unwrap();

        assert_eq!(config.context_depth, 5);
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.provider_timeout_ms, 30_000);
        assert!(!config.infer_ordinals);
        assert_eq!(config.db_path, Some(PathBuf::from("/tmp/chapterlane_db")));
    }

    #[test]
    fn test_yaml_partial_document_uses_defaults() {
        let config = ChapterlaneConfig::from_yaml_str("context_depth: 4\nmax_retries: 0\n").unwrap();
        assert_eq!(config.context_depth, 4);
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.event_buffer, 256);
    }

    #[test]
    fn test_yaml_rejects_invalid_values() {
        let err = ChapterlaneConfig::from_yaml_str("context_depth: 99\n").unwrap_err();
        assert_eq!(err.category(), "configuration");
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chapterlane.yaml");
        std::fs::write(&path, "context_depth: 4\nprovider_timeout_ms: 30000\n").unwrap();

        let config = ChapterlaneConfig::from_file(&path).unwrap();
        assert_eq!(config.context_depth, 4);
        assert_eq!(config.provider_timeout(), Duration::from_secs(30));
        assert!(ChapterlaneConfig::from_file(dir.path().join("missing.yaml")).is_err());
    }
}
