use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::options;
use crate::session::DocConfig;

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";

/// Client configuration, read from a TOML file in the platform config
/// directory. A missing file means built-in defaults; a present but
/// malformed file is an error, not a silent fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub backend_url: String,
    pub embedding_model: String,
    pub embedding_model_api_key: String,
    pub llm: String,
    pub llm_api_key: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            embedding_model: options::default_embedding_model().to_string(),
            embedding_model_api_key: String::new(),
            llm: options::default_llm().to_string(),
            llm_api_key: String::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// The session every run starts from: no document, configured model
    /// selections, empty language.
    pub fn initial_doc_config(&self) -> DocConfig {
        DocConfig {
            embedding_model_name: self.embedding_model.clone(),
            embedding_model_api_key: self.embedding_model_api_key.clone(),
            llm_name: self.llm.clone(),
            llm_api_key: self.llm_api_key.clone(),
            ..DocConfig::with_defaults()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(&dir.path().join("docchat.toml")).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.backend_url, DEFAULT_BACKEND_URL);
    }

    #[test]
    fn partial_file_keeps_defaults_for_absent_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docchat.toml");
        fs::write(&path, "backend_url = \"http://qa.internal:9000\"\n").unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.backend_url, "http://qa.internal:9000");
        assert_eq!(config.llm, options::default_llm());
    }

    #[test]
    fn malformed_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docchat.toml");
        fs::write(&path, "backend_url = [not toml").unwrap();

        assert!(matches!(
            AppConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn initial_doc_config_carries_model_selections() {
        let config = AppConfig {
            llm: "gpt-4".into(),
            llm_api_key: "sk-test".into(),
            ..AppConfig::default()
        };
        let doc = config.initial_doc_config();
        assert_eq!(doc.llm_name, "gpt-4");
        assert_eq!(doc.llm_api_key, "sk-test");
        assert!(!doc.has_document());
    }
}
