//! # Deep Research Server
//!
//! A server that turns a user's question into a cited research report. A
//! run is scoped with the user, planned by a supervisor that delegates
//! sub-topics to researchers, and written up by a report phase, all under
//! numeric budgets. Every step is recorded in an ordered, replayable
//! timeline that viewers follow live over server-sent events.
//!
//! ## Quick Start (Library Usage)
//!
//! ```rust,ignore
//! use deep_research::{AppState, ResearchConfigManager};
//! use std::sync::Arc;
//!
//! let config = Arc::new(ResearchConfigManager::new("research.toml")?);
//! let state = AppState::from_config(config).await?;
//! let app = deep_research::api::routes::create_router().with_state(state);
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Records, status enums, API DTOs and errors
//! - [`db`] - Durable record store (libsql / Turso)
//! - [`timeline`] - Sequence numbers, timeline cache and the event publisher
//! - [`streaming`] - Live viewer connections
//! - [`executor`] - Bounded admission pool for runs
//! - [`llm`] - Model capability and run-scoped model handles
//! - [`tools`] - Tool registry and web search providers
//! - [`research`] - Phases and the budget-bounded decision loop
//! - [`workflows`] - The run orchestrator
//! - [`service`] - Session queries and submission intake
//! - [`api`] - REST and SSE endpoints
//!
//! ## Configuration
//!
//! Infrastructure, models and budget tiers come from `research.toml`. Secrets
//! are read from the environment variables the file names. The file is
//! hot-reloadable; budgets and models are resolved per run at admission.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

/// HTTP API handlers and routes.
pub mod api;
/// Durable record store.
pub mod db;
/// Admission-controlled run execution.
pub mod executor;
/// LLM provider clients and abstractions.
pub mod llm;
/// Research phases and the shared decision loop.
pub mod research;
/// Session queries and submission intake.
pub mod service;
/// Live timeline delivery.
pub mod streaming;
/// Run timelines: numbering, caching, publishing.
pub mod timeline;
/// Tool registry and web search.
pub mod tools;
/// Core types (records, requests, responses, errors).
pub mod types;
/// Configuration utilities.
pub mod utils;
/// Workflow orchestration.
pub mod workflows;

// Re-export commonly used types
pub use db::{DatabaseProvider, RecordStore, TursoClient};
pub use llm::{ConfigModelFactory, LLMClient, ModelFactory, ModelPool};
pub use service::ResearchService;
pub use tools::ToolRegistry;
pub use types::{AppError, Result};
pub use utils::toml_config::{ResearchConfig, ResearchConfigManager};
pub use workflows::WorkflowEngine;

use crate::executor::ResearchTaskExecutor;
use crate::research::AgentContext;
use crate::streaming::StreamingHub;
use crate::timeline::{
    EventPublisher, MemoryTimelineStore, SequenceAllocator, TimelineCache, TimelineStore,
};
use crate::tools::SearchProvider;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// TOML configuration with hot-reload support
    pub config_manager: Arc<ResearchConfigManager>,
    /// System of record for sessions, messages and events
    pub records: Arc<dyn RecordStore>,
    /// Single append path for timeline items
    pub publisher: Arc<EventPublisher>,
    /// Live viewer connections
    pub hub: Arc<StreamingHub>,
    /// Session queries and submission intake
    pub service: Arc<ResearchService>,
}

/// External capabilities the research stack is assembled around.
pub struct Capabilities {
    pub records: Arc<dyn RecordStore>,
    pub timeline_store: Arc<dyn TimelineStore>,
    pub search: Arc<dyn SearchProvider>,
    pub models: Arc<dyn ModelFactory>,
}

impl AppState {
    /// Open the configured database and search provider and build the stack.
    /// Returns the in-memory timeline store too, so its purge task can run.
    pub async fn from_config(
        config_manager: Arc<ResearchConfigManager>,
    ) -> Result<(Self, Arc<MemoryTimelineStore>)> {
        let config = config_manager.config();
        let records = DatabaseProvider::from_config(&config).create_store().await?;
        let timeline_store = Arc::new(MemoryTimelineStore::new());

        let state = Self::build(
            config_manager,
            Capabilities {
                records,
                timeline_store: timeline_store.clone(),
                search: tools::search::create_provider(&config.search),
                models: Arc::new(ConfigModelFactory),
            },
        );
        Ok((state, timeline_store))
    }

    /// Wire the stack over the given capabilities. Spawns executor workers,
    /// so it must run inside a tokio runtime.
    pub fn build(config_manager: Arc<ResearchConfigManager>, caps: Capabilities) -> Self {
        let config = config_manager.config();

        let sequences = Arc::new(SequenceAllocator::new(Arc::clone(&caps.records)));
        let cache = Arc::new(TimelineCache::new(
            caps.timeline_store,
            Arc::clone(&caps.records),
            config.timeline.ttl(),
        ));
        let hub = Arc::new(StreamingHub::new(
            Arc::clone(&cache),
            config.timeline.client_buffer,
        ));
        let publisher = Arc::new(EventPublisher::new(
            sequences,
            Arc::clone(&caps.records),
            cache,
            Arc::clone(&hub),
        ));

        let engine = Arc::new(WorkflowEngine::new(AgentContext {
            publisher: Arc::clone(&publisher),
            models: Arc::new(ModelPool::new()),
            tools: Arc::new(ToolRegistry::new()),
            search: caps.search,
            search_config: config.search.clone(),
        }));
        let executor = Arc::new(ResearchTaskExecutor::new(
            config.executor.clone(),
            Arc::clone(&publisher),
        ));
        let service = Arc::new(ResearchService::new(
            engine,
            executor,
            caps.models,
            Arc::clone(&config_manager),
        ));

        Self {
            config_manager,
            records: caps.records,
            publisher,
            hub,
            service,
        }
    }
}
