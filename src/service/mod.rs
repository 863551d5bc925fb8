//! Research sessions as seen by API callers
//!
//! Session creation, ownership-checked queries and submission intake. A
//! submission is admitted exactly once per status: the `NEW -> QUEUE` (or
//! `NEED_CLARIFICATION -> QUEUE`) move is a compare-and-set on the session
//! row, so a concurrent duplicate sees zero rows affected.

use crate::db::{RecordStore, SessionMetadata};
use crate::executor::ResearchTaskExecutor;
use crate::llm::{ChatTurn, ModelFactory, ModelPool};
use crate::research::{Budget, UsageAccumulator, WorkflowRun};
use crate::timeline::EventPublisher;
use crate::types::{
    AppError, ChatMessageRecord, CreateResearchResponse, MessageRole, ResearchMessagesResponse,
    ResearchSession, ResearchStatusResponse, Result, SendMessageRequest, SendMessageResponse,
    WorkflowStatus,
};
use crate::utils::toml_config::ResearchConfigManager;
use crate::workflows::WorkflowEngine;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Most session ids handed out by one create call.
pub const MAX_CREATE: u32 = 10;

pub struct ResearchService {
    records: Arc<dyn RecordStore>,
    publisher: Arc<EventPublisher>,
    executor: Arc<ResearchTaskExecutor>,
    engine: Arc<WorkflowEngine>,
    models: Arc<ModelPool>,
    factory: Arc<dyn ModelFactory>,
    config: Arc<ResearchConfigManager>,
}

/// Rebuild the model-facing conversation from stored messages.
pub fn chat_history(messages: &[ChatMessageRecord]) -> Vec<ChatTurn> {
    messages
        .iter()
        .filter_map(|m| match m.role {
            MessageRole::User => Some(ChatTurn::user(m.content.clone())),
            MessageRole::Assistant => Some(ChatTurn::assistant(m.content.clone())),
            MessageRole::System => None,
        })
        .collect()
}

impl ResearchService {
    pub fn new(
        engine: Arc<WorkflowEngine>,
        executor: Arc<ResearchTaskExecutor>,
        factory: Arc<dyn ModelFactory>,
        config: Arc<ResearchConfigManager>,
    ) -> Self {
        let ctx = engine.context();
        Self {
            records: Arc::clone(ctx.publisher.records()),
            publisher: Arc::clone(&ctx.publisher),
            models: Arc::clone(&ctx.models),
            executor,
            engine,
            factory,
            config,
        }
    }

    pub fn executor(&self) -> &Arc<ResearchTaskExecutor> {
        &self.executor
    }

    /// Hand out `num` session ids, reusing the caller's unused ones first.
    pub async fn create_research(&self, user_id: &str, num: u32) -> Result<CreateResearchResponse> {
        if num == 0 || num > MAX_CREATE {
            return Err(AppError::InvalidInput(format!(
                "num must be between 1 and {}",
                MAX_CREATE
            )));
        }
        let wanted = num as usize;

        let mut research_ids: Vec<String> = self
            .records
            .list_sessions(user_id, WorkflowStatus::New)
            .await?
            .into_iter()
            .take(wanted)
            .map(|s| s.research_id)
            .collect();

        while research_ids.len() < wanted {
            let session = self
                .records
                .create_session(&Uuid::new_v4().to_string(), user_id)
                .await?;
            research_ids.push(session.research_id);
        }

        Ok(CreateResearchResponse { research_ids })
    }

    async fn owned_session(&self, user_id: &str, research_id: &str) -> Result<ResearchSession> {
        self.records
            .get_session(research_id)
            .await?
            .filter(|s| s.user_id == user_id)
            .ok_or_else(|| AppError::NotFound(format!("Research {} not found", research_id)))
    }

    pub async fn status(&self, user_id: &str, research_id: &str) -> Result<ResearchStatusResponse> {
        Ok(self.owned_session(user_id, research_id).await?.into())
    }

    pub async fn messages(
        &self,
        user_id: &str,
        research_id: &str,
    ) -> Result<ResearchMessagesResponse> {
        let session = self.owned_session(user_id, research_id).await?;
        let items = self.publisher.cache().get_timeline(research_id, 0).await?;
        Ok(ResearchMessagesResponse {
            research_id: session.research_id,
            status: session.status,
            items,
        })
    }

    /// Admit a user message as a new run.
    #[instrument(skip(self, request))]
    pub async fn send_message(
        &self,
        user_id: &str,
        research_id: &str,
        request: SendMessageRequest,
    ) -> Result<SendMessageResponse> {
        let content = request.content.trim();
        if content.is_empty() {
            return Err(AppError::InvalidInput("content must not be empty".to_string()));
        }

        let session = self.owned_session(user_id, research_id).await?;
        if !session.status.accepts_submission() {
            return Err(AppError::Conflict(format!(
                "Research {} is {} and cannot take a new message",
                research_id, session.status
            )));
        }

        let config = self.config.config();
        let level = request.budget.as_deref().or(session.budget.as_deref());
        let (level, budget) = config.budget_level(level).ok_or_else(|| {
            AppError::InvalidInput(format!("Unknown budget '{}'", level.unwrap_or_default()))
        })?;
        let model_id = request.model_id.as_deref().or(session.model_id.as_deref());
        let (model_id, client) = self.factory.create(&config, model_id)?;

        let moved = self
            .records
            .compare_and_set_status(research_id, session.status, WorkflowStatus::Queue)
            .await?;
        if moved == 0 {
            return Err(AppError::Conflict(format!(
                "Research {} was already submitted",
                research_id
            )));
        }

        let history = match self.prepare(research_id, content, &model_id, &level).await {
            Ok(messages) => chat_history(&messages),
            Err(e) => {
                self.revert(research_id, session.status).await;
                return Err(e);
            }
        };

        let run = WorkflowRun::new(
            research_id,
            Budget::from_level(level, budget),
            history,
            UsageAccumulator::with_totals(session.total_input_tokens, session.total_output_tokens),
        );

        self.models.insert(research_id, client);
        let engine = Arc::clone(&self.engine);
        let admission = match self
            .executor
            .submit(research_id, async move {
                engine.execute(run).await;
            })
            .await
        {
            Ok(admission) => admission,
            Err(e) => {
                self.models.remove(research_id);
                self.revert(research_id, session.status).await;
                return Err(e);
            }
        };

        info!(
            research_id,
            model = %model_id,
            restarted = session.status == WorkflowStatus::NeedClarification,
            "Research submitted"
        );
        Ok(SendMessageResponse {
            research_id: research_id.to_string(),
            accepted: true,
            estimated_start: admission.estimated_start_hhmm(),
        })
    }

    /// Store the user message and run metadata, returning the full message
    /// log. A retry after a busy rejection finds its message already stored
    /// as the last entry and does not store it twice.
    async fn prepare(
        &self,
        research_id: &str,
        content: &str,
        model_id: &str,
        level: &str,
    ) -> Result<Vec<ChatMessageRecord>> {
        let mut messages = self.records.list_messages(research_id).await?;
        let already_stored = messages
            .last()
            .is_some_and(|m| m.role == MessageRole::User && m.content == content);
        if !already_stored {
            let message = self
                .publisher
                .publish_message(research_id, MessageRole::User, content)
                .await?;
            messages.push(message);
        }

        self.records
            .set_metadata(
                research_id,
                &SessionMetadata {
                    model_id: Some(model_id.to_string()),
                    budget: Some(level.to_string()),
                    title: None,
                },
            )
            .await?;
        Ok(messages)
    }

    /// Undo the admission CAS so the caller may retry.
    async fn revert(&self, research_id: &str, previous: WorkflowStatus) {
        match self
            .records
            .compare_and_set_status(research_id, WorkflowStatus::Queue, previous)
            .await
        {
            Ok(_) => {}
            Err(e) => warn!(research_id, error = %e, "Could not revert admission"),
        }
        // a later restart reads the same counter from the store
        self.publisher.finish(research_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn message(role: MessageRole, content: &str) -> ChatMessageRecord {
        ChatMessageRecord {
            id: 0,
            research_id: "r1".to_string(),
            role,
            content: content.to_string(),
            sequence_no: 1,
            create_time: Utc::now(),
        }
    }

    #[test]
    fn test_chat_history_skips_system_messages() {
        let history = chat_history(&[
            message(MessageRole::System, "internal"),
            message(MessageRole::User, "Research EV batteries"),
            message(MessageRole::Assistant, "Which region?"),
            message(MessageRole::User, "Europe"),
        ]);
        assert_eq!(
            history,
            vec![
                ChatTurn::user("Research EV batteries"),
                ChatTurn::assistant("Which region?"),
                ChatTurn::user("Europe"),
            ]
        );
    }
}
