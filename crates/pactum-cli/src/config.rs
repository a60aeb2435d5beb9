use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use pactum_keys::KeyManagerConfig;
use serde::Deserialize;

/// CLI configuration, loaded from a TOML file.
#[derive(Debug, Deserialize)]
pub struct CliConfig {
    /// JSON file backing the key-value store.
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// Key manager settings, the `[keys]` table.
    #[serde(default)]
    pub keys: KeyManagerConfig,
}

/// `~/.local/share/pactum/keys.json` on Linux, the platform data dir elsewhere.
/// Falls back to the working directory when there is no data dir.
fn default_store_path() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("pactum"))
        .unwrap_or_default()
        .join("keys.json")
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            keys: KeyManagerConfig::default(),
        }
    }
}

impl CliConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("invalid config file: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = CliConfig::default();
        assert!(config.store_path.ends_with("keys.json"));
        assert_eq!(config.keys, KeyManagerConfig::default());
    }

    #[test]
    fn config_toml_deserialization() {
        let toml = r#"
            store_path = "/tmp/pactum/keys.json"

            [keys]
            storage_prefix = "work"
            device_id = 2
            backup_iterations = 100000
        "#;
        let config: CliConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.store_path, PathBuf::from("/tmp/pactum/keys.json"));
        assert_eq!(config.keys.storage_prefix, "work");
        assert_eq!(config.keys.device_id, 2);
        assert_eq!(config.keys.backup_iterations, 100_000);
        assert_eq!(config.keys.fingerprint_group_size, 4);
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let config: CliConfig = toml::from_str("").unwrap();
        assert_eq!(config.keys.storage_prefix, "pactum");
    }

    #[test]
    fn load_reports_missing_file() {
        let err = CliConfig::load(Path::new("/nonexistent/pactum.toml")).unwrap_err();
        assert!(err.to_string().contains("failed to read config file"));
    }
}
