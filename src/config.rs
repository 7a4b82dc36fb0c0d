use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::{FederationError, Result};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct FederationConfig {
    /// Ordered shard endpoints; the position is the partition index
    pub partitions: Vec<String>,
    pub query_timeout_ms: u64,
    pub overfetch_multiplier: usize,
    pub min_commit_interval_ms: u64,
    /// Facets aggregated when a query names none of its own
    pub facet_fields: Vec<String>,
    /// Ring points per partition
    pub virtual_points: usize,
    pub commit_wait_flush: bool,
    pub commit_wait_visible: bool,
    pub log_level: String,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            partitions: Vec::new(),
            query_timeout_ms: 10_000,
            overfetch_multiplier: 3,
            min_commit_interval_ms: 5_000,
            facet_fields: Vec::new(),
            virtual_points: 128,
            commit_wait_flush: true,
            commit_wait_visible: true,
            log_level: "info".to_string(),
        }
    }
}

impl FederationConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: FederationConfig =
            toml::from_str(contents).map_err(|e| FederationError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check tunables. An empty partition list is reported separately, when
    /// the directory is built.
    pub fn validate(&self) -> Result<()> {
        if self.query_timeout_ms == 0 {
            return Err(FederationError::Config("query_timeout_ms must be positive".into()));
        }
        if self.overfetch_multiplier == 0 {
            return Err(FederationError::Config("overfetch_multiplier must be positive".into()));
        }
        if self.virtual_points == 0 {
            return Err(FederationError::Config("virtual_points must be positive".into()));
        }
        Ok(())
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn min_commit_interval(&self) -> Duration {
        Duration::from_millis(self.min_commit_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = FederationConfig::default();
        assert_eq!(config.query_timeout(), Duration::from_secs(10));
        assert_eq!(config.overfetch_multiplier, 3);
        assert_eq!(config.min_commit_interval(), Duration::from_millis(5000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = FederationConfig::from_toml(
            r#"
            partitions = ["http://10.0.0.1:8983/solr", "http://10.0.0.2:8983/solr"]
            facet_fields = ["meta"]
            "#,
        )
        .unwrap();
        assert_eq!(config.partitions.len(), 2);
        assert_eq!(config.facet_fields, vec!["meta".to_string()]);
        assert_eq!(config.query_timeout_ms, 10_000);
    }

    #[test]
    fn test_rejects_zero_multiplier() {
        let err = FederationConfig::from_toml("overfetch_multiplier = 0").unwrap_err();
        assert!(matches!(err, FederationError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "partitions = [\"http://localhost:8999/solr\"]").unwrap();
        writeln!(file, "min_commit_interval_ms = 1000").unwrap();

        let config = FederationConfig::load(file.path()).unwrap();
        assert_eq!(config.min_commit_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_load_missing_file() {
        let err = FederationConfig::load("/nonexistent/lumafed.toml").unwrap_err();
        assert!(matches!(err, FederationError::Io(_)));
    }
}
