use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

// ============= API Request/Response Types =============

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateResearchRequest {
    /// Number of session ids to hand out (1..=10)
    #[serde(default = "default_create_num")]
    pub num: u32,
}

fn default_create_num() -> u32 {
    1
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateResearchResponse {
    pub research_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SendMessageResponse {
    pub research_id: String,
    pub accepted: bool,
    /// Estimated start time formatted as `HH:MM` (UTC)
    pub estimated_start: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ResearchStatusResponse {
    pub research_id: String,
    pub status: WorkflowStatus,
    pub title: Option<String>,
    pub model_id: Option<String>,
    pub budget: Option<String>,
    pub total_input_tokens: i64,
    pub total_output_tokens: i64,
    pub start_time: Option<DateTime<Utc>>,
    pub update_time: DateTime<Utc>,
    pub complete_time: Option<DateTime<Utc>>,
}

impl From<ResearchSession> for ResearchStatusResponse {
    fn from(session: ResearchSession) -> Self {
        Self {
            research_id: session.research_id,
            status: session.status,
            title: session.title,
            model_id: session.model_id,
            budget: session.budget,
            total_input_tokens: session.total_input_tokens,
            total_output_tokens: session.total_output_tokens,
            start_time: session.start_time,
            update_time: session.update_time,
            complete_time: session.complete_time,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ResearchMessagesResponse {
    pub research_id: String,
    pub status: WorkflowStatus,
    #[schema(value_type = Vec<Object>)]
    pub items: Vec<TimelineItem>,
}

// ============= Workflow Types =============

/// Lifecycle of a research session. Persisted as SCREAMING_SNAKE_CASE text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    New,
    Queue,
    Start,
    InScope,
    NeedClarification,
    InResearch,
    InReport,
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::New => "NEW",
            WorkflowStatus::Queue => "QUEUE",
            WorkflowStatus::Start => "START",
            WorkflowStatus::InScope => "IN_SCOPE",
            WorkflowStatus::NeedClarification => "NEED_CLARIFICATION",
            WorkflowStatus::InResearch => "IN_RESEARCH",
            WorkflowStatus::InReport => "IN_REPORT",
            WorkflowStatus::Completed => "COMPLETED",
            WorkflowStatus::Failed => "FAILED",
        }
    }

    /// A run has ended and its viewers have been (or should be) released.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::NeedClarification
        )
    }

    /// States from which a fresh submission may be admitted.
    pub fn accepts_submission(&self) -> bool {
        matches!(self, WorkflowStatus::New | WorkflowStatus::NeedClarification)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "NEW" => Ok(WorkflowStatus::New),
            "QUEUE" => Ok(WorkflowStatus::Queue),
            "START" => Ok(WorkflowStatus::Start),
            "IN_SCOPE" => Ok(WorkflowStatus::InScope),
            "NEED_CLARIFICATION" => Ok(WorkflowStatus::NeedClarification),
            "IN_RESEARCH" => Ok(WorkflowStatus::InResearch),
            "IN_REPORT" => Ok(WorkflowStatus::InReport),
            "COMPLETED" => Ok(WorkflowStatus::Completed),
            "FAILED" => Ok(WorkflowStatus::Failed),
            other => Err(AppError::Database(format!("Unknown workflow status: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Queue,
    Scope,
    Supervisor,
    Research,
    Search,
    Report,
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Queue => "QUEUE",
            EventKind::Scope => "SCOPE",
            EventKind::Supervisor => "SUPERVISOR",
            EventKind::Research => "RESEARCH",
            EventKind::Search => "SEARCH",
            EventKind::Report => "REPORT",
            EventKind::Error => "ERROR",
        }
    }
}

impl FromStr for EventKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "QUEUE" => Ok(EventKind::Queue),
            "SCOPE" => Ok(EventKind::Scope),
            "SUPERVISOR" => Ok(EventKind::Supervisor),
            "RESEARCH" => Ok(EventKind::Research),
            "SEARCH" => Ok(EventKind::Search),
            "REPORT" => Ok(EventKind::Report),
            "ERROR" => Ok(EventKind::Error),
            other => Err(AppError::Database(format!("Unknown event type: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    InProgress,
    Completed,
    Failed,
    /// Live-only notice, never persisted
    Transient,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::InProgress => "IN_PROGRESS",
            EventStatus::Completed => "COMPLETED",
            EventStatus::Failed => "FAILED",
            EventStatus::Transient => "TRANSIENT",
        }
    }
}

impl FromStr for EventStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "IN_PROGRESS" => Ok(EventStatus::InProgress),
            "COMPLETED" => Ok(EventStatus::Completed),
            "FAILED" => Ok(EventStatus::Failed),
            "TRANSIENT" => Ok(EventStatus::Transient),
            other => Err(AppError::Database(format!("Unknown event status: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

impl FromStr for MessageRole {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "system" => Ok(MessageRole::System),
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            other => Err(AppError::Database(format!("Unknown message role: {}", other))),
        }
    }
}

// ============= Persisted Records =============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ResearchSession {
    pub research_id: String,
    pub user_id: String,
    pub status: WorkflowStatus,
    pub model_id: Option<String>,
    pub budget: Option<String>,
    pub title: Option<String>,
    pub total_input_tokens: i64,
    pub total_output_tokens: i64,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub complete_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ChatMessageRecord {
    pub id: i64,
    pub research_id: String,
    pub role: MessageRole,
    pub content: String,
    pub sequence_no: i64,
    pub create_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct WorkflowEventRecord {
    pub id: i64,
    pub research_id: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub status: EventStatus,
    pub title: String,
    pub content: Option<String>,
    pub parent_event_id: Option<i64>,
    pub sequence_no: i64,
    pub create_time: DateTime<Utc>,
}

/// One entry of a run's timeline as stored in the cache and sent to viewers.
///
/// Transient items (queue notices) carry `sequence_no == 0` and never reach
/// the record store or the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TimelineItem {
    Message(ChatMessageRecord),
    Event(WorkflowEventRecord),
}

impl TimelineItem {
    pub fn sequence_no(&self) -> i64 {
        match self {
            TimelineItem::Message(m) => m.sequence_no,
            TimelineItem::Event(e) => e.sequence_no,
        }
    }

    pub fn research_id(&self) -> &str {
        match self {
            TimelineItem::Message(m) => &m.research_id,
            TimelineItem::Event(e) => &e.research_id,
        }
    }

    /// SSE event name for this item.
    pub fn kind(&self) -> &'static str {
        match self {
            TimelineItem::Message(_) => "message",
            TimelineItem::Event(_) => "event",
        }
    }

    pub fn is_transient(&self) -> bool {
        self.sequence_no() <= 0
    }
}

// ============= Tool Types =============

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// A tool invocation requested by the model. Arguments stay as the raw JSON
/// text the model produced until the registry decodes them.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

// ============= Error Types =============

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("LLM error: {0}")]
    LLM(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("System busy: {0}")]
    Busy(String),

    #[error("Workflow error: {0}")]
    Workflow(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Busy(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Database(_)
            | AppError::LLM(_)
            | AppError::Search(_)
            | AppError::Workflow(_)
            | AppError::Configuration(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({
            "error": self.to_string()
        });

        (status, axum::Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
