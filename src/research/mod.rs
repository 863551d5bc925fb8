//! Research phases and the decision loop they share
//!
//! - [`scope`] - clarification check and research brief
//! - [`supervisor`] - delegates sub-topics under the conduct budget
//! - [`researcher`] - searches one sub-topic under the search budget
//! - [`search`] - one web search, deduplicated and summarized
//! - [`report`] - streams the final report
//!
//! Every phase receives the same [`AgentContext`] and mutates one
//! [`WorkflowRun`].

pub mod decision_loop;
pub mod prompts;
pub mod report;
pub mod researcher;
pub mod scope;
pub mod search;
pub mod state;
pub mod supervisor;

pub use decision_loop::{BUDGET_EXHAUSTED, LoopExit};
pub use report::Report;
pub use researcher::Researcher;
pub use scope::Scope;
pub use search::SearchAgent;
pub use state::{Budget, UsageAccumulator, WorkflowRun};
pub use supervisor::Supervisor;

use crate::llm::ModelPool;
use crate::timeline::EventPublisher;
use crate::tools::{SearchProvider, ToolRegistry};
use crate::utils::toml_config::SearchConfig;
use std::sync::Arc;

/// Shared services available to every phase of a run.
#[derive(Clone)]
pub struct AgentContext {
    pub publisher: Arc<EventPublisher>,
    pub models: Arc<ModelPool>,
    pub tools: Arc<ToolRegistry>,
    pub search: Arc<dyn SearchProvider>,
    pub search_config: SearchConfig,
}
