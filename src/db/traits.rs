//! Durable record store abstraction
//!
//! The record store is the system of record for research sessions, chat
//! messages and workflow events. The timeline cache rebuilds from it when
//! cold, and the sequence allocator seeds from it on first use.
//!
//! # Example
//!
//! ```rust,ignore
//! use deep_research::db::{DatabaseProvider, RecordStore};
//!
//! let store = DatabaseProvider::Memory.create_store().await?;
//! let session = store.create_session("r-1", "user-1").await?;
//! ```

use crate::types::{
    ChatMessageRecord, ResearchSession, Result, WorkflowEventRecord, WorkflowStatus,
};
use crate::utils::toml_config::ResearchConfig;
use async_trait::async_trait;
use std::sync::Arc;

/// Database provider configuration
#[derive(Debug, Clone, Default)]
pub enum DatabaseProvider {
    /// In-memory SQLite database (ephemeral, lost on restart)
    #[default]
    Memory,
    /// File-based SQLite database
    SQLite {
        /// Path to the SQLite database file
        path: String,
    },
    /// Remote Turso database
    Turso {
        /// The Turso database URL (e.g., `libsql://your-db.turso.io`)
        url: String,
        /// Authentication token for the Turso database
        auth_token: String,
    },
}

impl DatabaseProvider {
    /// Pick the provider for `[database]`: `:memory:`, a remote libsql URL,
    /// or a local file path.
    pub fn from_config(config: &ResearchConfig) -> Self {
        let database = &config.database;
        if database.url == ":memory:" {
            DatabaseProvider::Memory
        } else if database.is_remote() {
            DatabaseProvider::Turso {
                url: database.url.clone(),
                auth_token: database
                    .auth_token_env
                    .as_deref()
                    .and_then(|env| config.resolve_env(env))
                    .unwrap_or_default(),
            }
        } else {
            DatabaseProvider::SQLite {
                path: database.url.clone(),
            }
        }
    }

    /// Create a record store from this provider configuration
    pub async fn create_store(&self) -> Result<Arc<dyn RecordStore>> {
        let client = match self {
            DatabaseProvider::Memory => super::turso::TursoClient::new_memory().await?,
            DatabaseProvider::SQLite { path } => super::turso::TursoClient::new_local(path).await?,
            DatabaseProvider::Turso { url, auth_token } => {
                super::turso::TursoClient::new_remote(url.clone(), auth_token.clone()).await?
            }
        };
        Ok(Arc::new(client))
    }
}

/// Status and usage written at every phase boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionProgress {
    pub status: WorkflowStatus,
    pub total_input_tokens: i64,
    pub total_output_tokens: i64,
}

/// First-write-wins descriptive fields of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionMetadata {
    pub model_id: Option<String>,
    pub budget: Option<String>,
    pub title: Option<String>,
}

/// Persistence operations used by the research core.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a session row in `NEW` state.
    async fn create_session(&self, research_id: &str, user_id: &str) -> Result<ResearchSession>;

    async fn get_session(&self, research_id: &str) -> Result<Option<ResearchSession>>;

    async fn list_sessions(
        &self,
        user_id: &str,
        status: WorkflowStatus,
    ) -> Result<Vec<ResearchSession>>;

    /// Move a session to `next` only if it is currently `expected`.
    /// Returns the number of rows changed (0 or 1).
    async fn compare_and_set_status(
        &self,
        research_id: &str,
        expected: WorkflowStatus,
        next: WorkflowStatus,
    ) -> Result<u64>;

    /// Write status and token totals. Sets the start time when entering
    /// `START` for the first time and the complete time on terminal statuses.
    async fn update_progress(&self, research_id: &str, progress: SessionProgress) -> Result<()>;

    /// Fill unset descriptive fields; values already present are kept.
    async fn set_metadata(&self, research_id: &str, metadata: &SessionMetadata) -> Result<()>;

    /// Persist a message; `id` on the input is ignored. Returns the row id.
    async fn insert_message(&self, message: &ChatMessageRecord) -> Result<i64>;

    /// Persist an event; `id` on the input is ignored. Returns the row id.
    async fn insert_event(&self, event: &WorkflowEventRecord) -> Result<i64>;

    /// Messages ordered by sequence number.
    async fn list_messages(&self, research_id: &str) -> Result<Vec<ChatMessageRecord>>;

    /// Events ordered by sequence number.
    async fn list_events(&self, research_id: &str) -> Result<Vec<WorkflowEventRecord>>;

    /// Highest sequence number used by any message or event of the run, 0 if none.
    async fn max_sequence(&self, research_id: &str) -> Result<i64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_from_config() {
        let mut config = ResearchConfig::default();
        assert!(matches!(
            DatabaseProvider::from_config(&config),
            DatabaseProvider::SQLite { .. }
        ));

        config.database.url = ":memory:".to_string();
        assert!(matches!(
            DatabaseProvider::from_config(&config),
            DatabaseProvider::Memory
        ));

        config.database.url = "libsql://research.turso.io".to_string();
        assert!(matches!(
            DatabaseProvider::from_config(&config),
            DatabaseProvider::Turso { .. }
        ));
    }
}
