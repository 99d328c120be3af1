//! Mapper configuration
//!
//! Loaded from a JSON file by the CLI; every field has a default so an
//! empty object is a valid configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapperConfig {
    /// Directory holding `*.json` collection-definition maps
    #[serde(default = "default_schema_dir")]
    pub schema_dir: PathBuf,

    /// `tracing-subscriber` filter directive
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Bytes of randomness in generated `random-key` values
    #[serde(default = "default_random_key_length")]
    pub random_key_length: usize,

    /// Use an atomic batch for nested creates when the backend executes
    /// batches
    #[serde(default = "default_prefer_batch_create")]
    pub prefer_batch_create: bool,
}

fn default_schema_dir() -> PathBuf {
    PathBuf::from("./schemas")
}
fn default_log_filter() -> String {
    "info".to_string()
}
fn default_random_key_length() -> usize {
    20
}
fn default_prefer_batch_create() -> bool {
    true
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            schema_dir: default_schema_dir(),
            log_filter: default_log_filter(),
            random_key_length: default_random_key_length(),
            prefer_batch_create: default_prefer_batch_create(),
        }
    }
}

impl MapperConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.random_key_length == 0 {
            return Err("random_key_length must be > 0".to_string());
        }
        if self.log_filter.trim().is_empty() {
            return Err("log_filter must not be empty".to_string());
        }
        Ok(())
    }

    /// Schema directory, resolved against the directory of the config file
    /// when relative
    pub fn schema_dir_relative_to(&self, config_path: &Path) -> PathBuf {
        if self.schema_dir.is_absolute() {
            return self.schema_dir.clone();
        }
        match config_path.parent() {
            Some(parent) => parent.join(&self.schema_dir),
            None => self.schema_dir.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config: MapperConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, MapperConfig::default());
        assert_eq!(config.schema_dir, PathBuf::from("./schemas"));
        assert_eq!(config.random_key_length, 20);
        assert!(config.prefer_batch_create);
    }

    #[test]
    fn test_zero_key_length_is_invalid() {
        let config = MapperConfig {
            random_key_length: 0,
            ..MapperConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_relative_schema_dir() {
        let config = MapperConfig {
            schema_dir: PathBuf::from("schemas"),
            ..MapperConfig::default()
        };
        assert_eq!(
            config.schema_dir_relative_to(Path::new("/etc/aeromap/config.json")),
            PathBuf::from("/etc/aeromap/schemas")
        );
    }
}
