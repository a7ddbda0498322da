use std::sync::Arc;

use crate::core::config::{AppPaths, EngineConfig};
use crate::core::errors::ApiError;
use crate::engine::CompanionEngine;
use crate::library::store::LibraryStore;
use crate::llm::{LlmProvider, OpenAiProvider};

/// Global application state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    pub paths: Arc<AppPaths>,
    pub engine: Arc<CompanionEngine>,
}

impl AppState {
    pub async fn initialize() -> Result<Arc<Self>, ApiError> {
        let paths = Arc::new(AppPaths::new());
        let config = EngineConfig::load(&paths)?;

        let store = LibraryStore::new(paths.db_path.clone())
            .await
            .map_err(ApiError::from)?;

        if config.api_key().is_none() {
            tracing::warn!(
                "no API key in ${}; LLM calls will fail until it is set",
                config.api_key_env
            );
        }
        let provider: Arc<dyn LlmProvider> = Arc::new(OpenAiProvider::new(
            config.api_base.clone(),
            config.api_key(),
        ));

        let engine = Arc::new(CompanionEngine::new(store, provider, config));

        Ok(Arc::new(AppState { paths, engine }))
    }
}
