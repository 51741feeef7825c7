//! `formentry.toml` configuration.
//!
//! ```toml
//! store_dir = "data"
//!
//! [properties]
//! "formentry.default_hl7_source" = "local"
//!
//! [[hl7_sources]]
//! name = "local"
//! description = "Local form entry"
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use formentry_core::{ConfigStore, DEFAULT_SOURCE_NAME, SourceRegistry, StoreError};
use formentry_model::Hl7Source;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ConfigError;

/// Default configuration file name.
pub const CONFIG_FILE: &str = "formentry.toml";

const DEFAULT_STORE_DIR: &str = "formentry-data";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormEntryConfig {
    /// Root of the local store. Relative paths are resolved against the
    /// directory holding the configuration file.
    pub store_dir: PathBuf,
    /// Global string properties.
    pub properties: BTreeMap<String, String>,
    /// Registered inbound sources.
    pub hl7_sources: Vec<Hl7Source>,
}

impl Default for FormEntryConfig {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from(DEFAULT_STORE_DIR),
            properties: BTreeMap::new(),
            hl7_sources: vec![Hl7Source {
                name: DEFAULT_SOURCE_NAME.to_string(),
                description: "Local form entry".to_string(),
            }],
        }
    }
}

impl FormEntryConfig {
    /// Parses a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&text, path)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config.resolved(path))
    }

    /// Like [`load`](Self::load), but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        match Self::load(path) {
            Err(ConfigError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => {
                info!(path = %path.display(), "No configuration file, using defaults");
                Ok(Self::default().resolved(path))
            }
            other => other,
        }
    }

    fn parse(text: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })
    }

    fn resolved(mut self, config_path: &Path) -> Self {
        if self.store_dir.is_relative()
            && let Some(parent) = config_path.parent()
        {
            self.store_dir = parent.join(&self.store_dir);
        }
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

impl ConfigStore for FormEntryConfig {
    fn get_string(&self, key: &str, default: &str) -> Result<String, StoreError> {
        Ok(self
            .properties
            .get(key)
            .map_or_else(|| default.to_string(), Clone::clone))
    }
}

impl SourceRegistry for FormEntryConfig {
    fn by_name(&self, name: &str) -> Result<Option<Hl7Source>, StoreError> {
        Ok(self
            .hl7_sources
            .iter()
            .find(|source| source.name == name)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use formentry_core::DEFAULT_SOURCE_PROPERTY;
    use tempfile::tempdir;

    #[test]
    fn test_load_full_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(
            &path,
            r#"
store_dir = "data"

[properties]
"formentry.default_hl7_source" = "lab"

[[hl7_sources]]
name = "lab"
"#,
        )
        .unwrap();

        let config = FormEntryConfig::load(&path).unwrap();
        assert_eq!(config.store_dir, dir.path().join("data"));
        assert_eq!(
            config.get_string(DEFAULT_SOURCE_PROPERTY, "local").unwrap(),
            "lab"
        );
        assert_eq!(config.by_name("lab").unwrap(), Some(Hl7Source::new("lab")));
        assert_eq!(config.by_name("local").unwrap(), None);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = FormEntryConfig::load_or_default(&dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config.store_dir, dir.path().join(DEFAULT_STORE_DIR));
        assert!(config.by_name(DEFAULT_SOURCE_NAME).unwrap().is_some());
        assert_eq!(config.get_string("anything", "fallback").unwrap(), "fallback");
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "store_dir = \"/var/lib/formentry\"\n").unwrap();
        let config = FormEntryConfig::load(&path).unwrap();
        assert_eq!(config.store_dir, PathBuf::from("/var/lib/formentry"));
        assert_eq!(config.hl7_sources.len(), 1);
    }

    #[test]
    fn test_invalid_toml_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "store_dir = [").unwrap();
        assert!(matches!(
            FormEntryConfig::load_or_default(&path),
            Err(ConfigError::Toml { .. })
        ));
    }
}
