use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::ApiError;

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub project_root: PathBuf,
    pub user_data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub db_path: PathBuf,
    pub config_path: PathBuf,
}

impl AppPaths {
    pub fn new() -> Self {
        let project_root = discover_project_root();
        let user_data_dir = discover_user_data_dir(&project_root);
        let log_dir = user_data_dir.join("logs");
        let db_path = user_data_dir.join("bookworm.db");
        let config_path = user_data_dir.join("config.yml");

        for dir in [&user_data_dir, &log_dir] {
            let _ = fs::create_dir_all(dir);
        }

        AppPaths {
            project_root,
            user_data_dir,
            log_dir,
            db_path,
            config_path,
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}

fn discover_project_root() -> PathBuf {
    if let Ok(root) = env::var("BOOKWORM_ROOT") {
        return PathBuf::from(root);
    }

    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    if manifest_dir.join("config.yml").exists() {
        return manifest_dir;
    }

    env::current_dir().unwrap_or(manifest_dir)
}

fn discover_user_data_dir(project_root: &Path) -> PathBuf {
    if let Ok(dir) = env::var("BOOKWORM_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if cfg!(debug_assertions) {
        return project_root.to_path_buf();
    }

    if cfg!(target_os = "windows") {
        let base = env::var("LOCALAPPDATA")
            .unwrap_or_else(|_| env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string()));
        return PathBuf::from(base).join("Bookworm");
    }

    if cfg!(target_os = "macos") {
        return home_dir()
            .join("Library")
            .join("Application Support")
            .join("Bookworm");
    }

    let base = env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local").join("share"));
    base.join("bookworm")
}

fn home_dir() -> PathBuf {
    env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Engine tuning knobs, loaded from `config.yml` when present.
///
/// Every field has a default so a missing or partial file still yields a
/// usable configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Completion model identifier passed to the provider.
    pub qa_model: String,
    /// Embedding model identifier.
    pub embedding_model: String,
    /// Base URL of the OpenAI-compatible API.
    pub api_base: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Number of chunks handed to the context assembler.
    pub retrieval_top_k: usize,
    /// Maximum total excerpt characters in one assembled context.
    pub context_char_budget: usize,
    /// Approximate token target per chunk at ingest.
    pub chunk_token_target: usize,
    /// In-memory history stack capacity per (book, session).
    pub history_cap: usize,
    /// Timeout for one embedding round-trip, seconds.
    pub embed_timeout_secs: u64,
    /// Timeout for the gap between two stream deltas, seconds.
    pub stream_delta_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            qa_model: "gpt-5-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            api_base: "https://api.openai.com".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            retrieval_top_k: 8,
            context_char_budget: 12_000,
            chunk_token_target: 800,
            history_cap: 40,
            embed_timeout_secs: 20,
            stream_delta_timeout_secs: 60,
        }
    }
}

impl EngineConfig {
    pub fn load(paths: &AppPaths) -> Result<Self, ApiError> {
        if !paths.config_path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&paths.config_path).map_err(ApiError::internal)?;
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_yaml::from_str(&contents)
            .map_err(|e| ApiError::internal(format!("failed to parse config.yml: {e}")))
    }

    pub fn api_key(&self) -> Option<String> {
        env::var(&self.api_key_env).ok().filter(|k| !k.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = EngineConfig::default();
        assert_eq!(config.retrieval_top_k, 8);
        assert_eq!(config.history_cap, 40);
        assert!(config.context_char_budget > 0);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let config: EngineConfig = serde_yaml::from_str("retrieval_top_k: 4").unwrap();
        assert_eq!(config.retrieval_top_k, 4);
        assert_eq!(config.qa_model, EngineConfig::default().qa_model);
    }
}
