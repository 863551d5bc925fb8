//! Run-scoped model handles
//!
//! A run is bound to one model at admission. The handle is registered here
//! under the run's id, looked up by every phase, and removed when the run
//! ends, so no model client outlives its run.

use crate::llm::client::{LLMClient, Provider};
use crate::types::{AppError, Result};
use crate::utils::toml_config::ResearchConfig;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Builds model clients for a configured model id.
pub trait ModelFactory: Send + Sync {
    fn create(&self, config: &ResearchConfig, model_id: Option<&str>)
    -> Result<(String, Arc<dyn LLMClient>)>;
}

/// Resolves `[models.*]` entries into OpenAI-compatible clients.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigModelFactory;

impl ModelFactory for ConfigModelFactory {
    fn create(
        &self,
        config: &ResearchConfig,
        model_id: Option<&str>,
    ) -> Result<(String, Arc<dyn LLMClient>)> {
        let (id, model) = config.model(model_id).ok_or_else(|| {
            AppError::InvalidInput(format!("Unknown model '{}'", model_id.unwrap_or_default()))
        })?;

        let provider = Provider::OpenAI {
            api_key: model
                .api_key_env
                .as_deref()
                .and_then(|env| config.resolve_env(env)),
            api_base: model.api_base.clone(),
            model: model.model.clone(),
            timeout_secs: model.timeout_secs,
            max_tokens: model.max_tokens,
        };

        Ok((id, provider.create_client()?))
    }
}

#[derive(Default)]
pub struct ModelPool {
    handles: RwLock<HashMap<String, Arc<dyn LLMClient>>>,
}

impl ModelPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, research_id: &str, client: Arc<dyn LLMClient>) {
        debug!(research_id, model = client.model_name(), "Model bound to run");
        self.handles.write().insert(research_id.to_string(), client);
    }

    pub fn get(&self, research_id: &str) -> Result<Arc<dyn LLMClient>> {
        self.handles
            .read()
            .get(research_id)
            .cloned()
            .ok_or_else(|| AppError::Workflow(format!("No model bound to run {}", research_id)))
    }

    pub fn remove(&self, research_id: &str) -> Option<Arc<dyn LLMClient>> {
        self.handles.write().remove(research_id)
    }

    pub fn len(&self) -> usize {
        self.handles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.read().is_empty()
    }
}
