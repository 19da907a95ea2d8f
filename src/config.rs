//! Application configuration
//!
//! Service endpoints and timeouts come from the environment; grammar and
//! prompt tables optionally come from a JSON file.

use crate::dialogue::prompts::{PromptId, PromptSet};
use crate::dialogue::{GrammarConfig, PromptCatalog};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_KB_URL: &str = "https://api.duckduckgo.com/";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid dialogue config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Process-level settings
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub port: u16,
    /// Knowledge base endpoint (`DuckDuckGo` instant answers)
    pub kb_url: String,
    /// Intent classifier endpoint; classification is disabled when unset
    pub classifier_url: Option<String>,
    pub request_timeout: Duration,
    /// Runtime-side deadline after LISTEN, when the speech client sends no TIMEOUT
    pub listen_timeout: Option<Duration>,
    pub dialogue_config: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        Self {
            port: non_empty("SDS_PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            kb_url: non_empty("SDS_KB_URL").unwrap_or_else(|| DEFAULT_KB_URL.to_string()),
            classifier_url: non_empty("SDS_CLASSIFIER_URL"),
            request_timeout: Duration::from_secs(
                non_empty("SDS_REQUEST_TIMEOUT_SECS")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            ),
            listen_timeout: non_empty("SDS_LISTEN_TIMEOUT_MS")
                .and_then(|ms| ms.parse().ok())
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
            dialogue_config: non_empty("SDS_DIALOGUE_CONFIG").map(PathBuf::from),
        }
    }
}

/// Grammar tables plus prompt overrides
///
/// Prompt sets listed in the file replace the built-in set with the same id;
/// the others keep their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DialogueConfig {
    pub grammar: GrammarConfig,
    pub prompts: BTreeMap<PromptId, PromptSet>,
}

impl DialogueConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load from `path` if given, otherwise use the built-in tables
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => {
                let config = Self::load(path)?;
                tracing::info!(path = %path.display(), overrides = config.prompts.len(), "Loaded dialogue config");
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn prompt_catalog(&self) -> PromptCatalog {
        self.prompts
            .iter()
            .fold(PromptCatalog::default(), |catalog, (id, set)| {
                catalog.with_set(*id, set.clone())
            })
    }
}
