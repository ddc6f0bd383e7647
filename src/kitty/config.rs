use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{ExpiryConfig, LimitsConfig};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KittyConfig {
    pub limits: LimitsConfig,
    pub expiry: ExpiryConfig,
    pub names: NamesConfig,
    pub storage: StorageConfig,
    pub http: HttpConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NamesConfig {
    pub word_list: PathBuf,
    pub min_word_len: usize,
    pub max_word_len: usize,
    /// Candidate names tried per create before giving up.
    pub max_attempts: u32,
}

impl Default for NamesConfig {
    fn default() -> Self {
        Self {
            word_list: PathBuf::from("/usr/share/dict/words"),
            min_word_len: 4,
            max_word_len: 8,
            max_attempts: 32,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub timeout_ms: u64,
    /// Compare-and-swap retries per update before reporting contention.
    pub max_update_retries: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            max_update_retries: 8,
        }
    }
}

impl StorageConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// CORS allow-list; empty disables CORS headers.
    pub allowed_origins: Vec<String>,
    pub trust_forwarded_for: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config failed: {0}")]
    Read(#[from] std::io::Error),
    #[error("parse json config failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("parse toml config failed: {0}")]
    Toml(#[from] toml::de::Error),
    #[cfg(feature = "config-yaml")]
    #[error("parse yaml config failed: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("unsupported config format: {extension}")]
    UnsupportedFormat { extension: String },
}

impl KittyConfig {
    /// Loads a config file; the extension picks the format.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)?;
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("json")
            .to_ascii_lowercase();
        Self::parse(&raw, &extension)
    }

    pub fn parse(raw: &str, extension: &str) -> Result<Self, ConfigError> {
        match extension {
            "json" => Ok(serde_json::from_str(raw)?),
            "toml" => Ok(toml::from_str(raw)?),
            #[cfg(feature = "config-yaml")]
            "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
            other => Err(ConfigError::UnsupportedFormat {
                extension: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_uses_defaults() {
        let config = KittyConfig::parse("{}", "json").expect("parse");
        assert_eq!(config.limits.window_secs, 3600);
        assert_eq!(config.names.min_word_len, 4);
        assert_eq!(config.storage.timeout_ms, 5_000);
        assert!(config.expiry.sweep_after_create);
        assert!(config.http.allowed_origins.is_empty());
    }

    #[test]
    fn toml_sections_override_fields() {
        let raw = r#"
            [limits]
            create_limit = 2
            update_limit = 0

            [expiry]
            sweep_after_read = true

            [http]
            allowed_origins = ["http://localhost:5173"]
        "#;
        let config = KittyConfig::parse(raw, "toml").expect("parse");
        assert_eq!(config.limits.create_limit, 2);
        assert_eq!(config.limits.update_limit, 0);
        assert_eq!(config.limits.window_secs, 3600);
        assert!(config.expiry.sweep_after_read);
        assert!(config.expiry.sweep_after_create);
        assert_eq!(config.http.allowed_origins, vec!["http://localhost:5173"]);
    }

    #[test]
    fn load_reads_file_by_extension() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("kitty.json");
        fs::write(&path, r#"{"storage": {"timeout_ms": 250}}"#).expect("write");
        let config = KittyConfig::load(&path).expect("load");
        assert_eq!(config.storage.timeout(), Duration::from_millis(250));
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let err = KittyConfig::parse("", "ini").unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat { .. }));
    }
}
