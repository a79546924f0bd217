//! ============================================================================
//! Configuration - Environment-driven settings
//! ============================================================================
//! Read after `.env` has been loaded by the binary. Every value has a
//! default except the API key; without a key the pipeline runs offline.
//! ============================================================================

use std::path::PathBuf;
use std::time::Duration;

use crate::recall::embeddings::{DEFAULT_EMBEDDING_MODEL, DEFAULT_PROVIDER_TIMEOUT, EMBEDDING_DIM};
use crate::recall::provider::DEFAULT_BASE_URL;
use crate::recall::synthesizer::DEFAULT_CHAT_MODEL;
use crate::types::{RecallError, Result};

/// Runtime configuration for the recall pipeline
#[derive(Debug, Clone)]
pub struct RecallConfig {
    pub openai_api_key: Option<String>,
    pub base_url: String,
    pub embedding_model: String,
    pub chat_model: String,
    /// Vector dimensionality shared by every stored and query embedding
    pub embedding_dim: usize,
    pub provider_timeout: Duration,
    /// Database file; `None` resolves to ~/.story-recall/recall.redb
    pub db_path: Option<PathBuf>,
    /// Directory audio clips are copied into during ingestion
    pub storage_dir: Option<PathBuf>,
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            embedding_dim: EMBEDDING_DIM,
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
            db_path: None,
            storage_dir: None,
        }
    }
}

impl RecallConfig {
    /// Load from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (used by tests)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let embedding_dim = match get("STORY_RECALL_EMBEDDING_DIM") {
            Some(raw) => parse_positive("STORY_RECALL_EMBEDDING_DIM", &raw)?,
            None => defaults.embedding_dim,
        };

        let provider_timeout = match get("STORY_RECALL_PROVIDER_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(parse_positive("STORY_RECALL_PROVIDER_TIMEOUT_SECS", &raw)? as u64),
            None => defaults.provider_timeout,
        };

        Ok(Self {
            openai_api_key: get("OPENAI_API_KEY"),
            base_url: get("OPENAI_BASE_URL").unwrap_or(defaults.base_url),
            embedding_model: get("STORY_RECALL_EMBEDDING_MODEL").unwrap_or(defaults.embedding_model),
            chat_model: get("STORY_RECALL_CHAT_MODEL").unwrap_or(defaults.chat_model),
            embedding_dim,
            provider_timeout,
            db_path: get("STORY_RECALL_DB_PATH").map(PathBuf::from),
            storage_dir: get("STORY_RECALL_STORAGE_DIR").map(PathBuf::from),
        })
    }

    /// API key, if one is configured and non-empty
    pub fn api_key(&self) -> Option<&str> {
        self.openai_api_key.as_deref().filter(|k| !k.is_empty())
    }

    /// Storage directory for audio clips, defaulting next to the database
    pub fn resolved_storage_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.storage_dir {
            return Ok(dir.clone());
        }
        let home = dirs::home_dir()
            .ok_or_else(|| RecallError::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(".story-recall").join("storage"))
    }
}

fn parse_positive(key: &str, raw: &str) -> Result<usize> {
    match raw.parse::<usize>() {
        Ok(0) | Err(_) => Err(RecallError::Config(format!(
            "{} must be a positive integer, got '{}'",
            key, raw
        ))),
        Ok(value) => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RecallConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.embedding_dim, EMBEDDING_DIM);
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.chat_model, DEFAULT_CHAT_MODEL);
        assert!(config.api_key().is_none());
        assert!(config.db_path.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = RecallConfig::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("STORY_RECALL_EMBEDDING_DIM", "256"),
            ("STORY_RECALL_PROVIDER_TIMEOUT_SECS", "3"),
            ("STORY_RECALL_DB_PATH", "/tmp/recall.redb"),
        ]))
        .unwrap();
        assert_eq!(config.api_key(), Some("sk-test"));
        assert_eq!(config.embedding_dim, 256);
        assert_eq!(config.provider_timeout, Duration::from_secs(3));
        assert_eq!(config.db_path, Some(PathBuf::from("/tmp/recall.redb")));
    }

    #[test]
    fn test_blank_key_means_offline() {
        let config = RecallConfig::from_lookup(lookup(&[("OPENAI_API_KEY", "  ")])).unwrap();
        assert!(config.api_key().is_none());
    }

    #[test]
    fn test_invalid_dimension_rejected() {
        let err = RecallConfig::from_lookup(lookup(&[("STORY_RECALL_EMBEDDING_DIM", "zero")]))
            .unwrap_err();
        assert!(matches!(err, RecallError::Config(_)));

        let err = RecallConfig::from_lookup(lookup(&[("STORY_RECALL_EMBEDDING_DIM", "0")]))
            .unwrap_err();
        assert!(matches!(err, RecallError::Config(_)));
    }
}
