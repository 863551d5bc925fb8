use crate::db::traits::{RecordStore, SessionMetadata, SessionProgress};
use crate::types::{
    AppError, ChatMessageRecord, ResearchSession, Result, WorkflowEventRecord, WorkflowStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Builder, Connection, Database, Row, Value};
use tokio::sync::Mutex;

/// libsql-backed record store (local file, in-memory, or remote Turso).
///
/// A single connection is shared and serialized; an in-memory database only
/// exists for the connection that created it.
pub struct TursoClient {
    _db: Database,
    conn: Mutex<Connection>,
}

impl TursoClient {
    pub async fn new_remote(url: String, auth_token: String) -> Result<Self> {
        let db = Builder::new_remote(url, auth_token)
            .build()
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Turso: {}", e)))?;
        Self::from_database(db).await
    }

    pub async fn new_local(path: &str) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(path).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::Database(format!("Failed to create database directory: {}", e))
            })?;
        }

        let db = Builder::new_local(path)
            .build()
            .await
            .map_err(|e| AppError::Database(format!("Failed to open database {}: {}", path, e)))?;
        Self::from_database(db).await
    }

    pub async fn new_memory() -> Result<Self> {
        let db = Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| AppError::Database(format!("Failed to open in-memory database: {}", e)))?;
        Self::from_database(db).await
    }

    async fn from_database(db: Database) -> Result<Self> {
        let conn = db
            .connect()
            .map_err(|e| AppError::Database(format!("Failed to get connection: {}", e)))?;

        let client = Self {
            _db: db,
            conn: Mutex::new(conn),
        };
        client.initialize_schema().await?;

        Ok(client)
    }

    async fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock().await;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS research_sessions (
                research_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                status TEXT NOT NULL,
                model_id TEXT,
                budget TEXT,
                title TEXT,
                total_input_tokens INTEGER NOT NULL DEFAULT 0,
                total_output_tokens INTEGER NOT NULL DEFAULT 0,
                create_time INTEGER NOT NULL,
                update_time INTEGER NOT NULL,
                start_time INTEGER,
                complete_time INTEGER
            )",
            (),
        )
        .await
        .map_err(|e| AppError::Database(format!("Failed to create sessions table: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS chat_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                research_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                sequence_no INTEGER NOT NULL,
                create_time INTEGER NOT NULL
            )",
            (),
        )
        .await
        .map_err(|e| AppError::Database(format!("Failed to create messages table: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS workflow_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                research_id TEXT NOT NULL,
                type TEXT NOT NULL,
                status TEXT NOT NULL,
                title TEXT NOT NULL,
                content TEXT,
                parent_event_id INTEGER,
                sequence_no INTEGER NOT NULL,
                create_time INTEGER NOT NULL
            )",
            (),
        )
        .await
        .map_err(|e| AppError::Database(format!("Failed to create events table: {}", e)))?;

        for ddl in [
            "CREATE INDEX IF NOT EXISTS idx_messages_research_seq ON chat_messages(research_id, sequence_no)",
            "CREATE INDEX IF NOT EXISTS idx_events_research_seq ON workflow_events(research_id, sequence_no)",
            "CREATE INDEX IF NOT EXISTS idx_sessions_user_status ON research_sessions(user_id, status)",
        ] {
            conn.execute(ddl, ())
                .await
                .map_err(|e| AppError::Database(format!("Failed to create index: {}", e)))?;
        }

        Ok(())
    }
}

// ============= Row mapping =============

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn opt_text(value: Option<&str>) -> Value {
    value.map(|v| Value::Text(v.to_string())).unwrap_or(Value::Null)
}

fn opt_integer(value: Option<i64>) -> Value {
    value.map(Value::Integer).unwrap_or(Value::Null)
}

fn value(row: &Row, idx: i32, name: &str) -> Result<Value> {
    row.get_value(idx)
        .map_err(|e| AppError::Database(format!("Failed to read column {}: {}", name, e)))
}

fn text(row: &Row, idx: i32, name: &str) -> Result<String> {
    text_or_null(row, idx, name)?
        .ok_or_else(|| AppError::Database(format!("Column {} is null", name)))
}

fn text_or_null(row: &Row, idx: i32, name: &str) -> Result<Option<String>> {
    match value(row, idx, name)? {
        Value::Text(text) => Ok(Some(text)),
        Value::Null => Ok(None),
        other => Err(AppError::Database(format!(
            "Column {} is not text: {:?}",
            name, other
        ))),
    }
}

fn integer(row: &Row, idx: i32, name: &str) -> Result<i64> {
    integer_or_null(row, idx, name)?
        .ok_or_else(|| AppError::Database(format!("Column {} is null", name)))
}

fn integer_or_null(row: &Row, idx: i32, name: &str) -> Result<Option<i64>> {
    match value(row, idx, name)? {
        Value::Integer(n) => Ok(Some(n)),
        Value::Null => Ok(None),
        other => Err(AppError::Database(format!(
            "Column {} is not an integer: {:?}",
            name, other
        ))),
    }
}

const SESSION_COLUMNS: &str = "research_id, user_id, status, model_id, budget, title, \
     total_input_tokens, total_output_tokens, create_time, update_time, start_time, complete_time";

fn session_from_row(row: &Row) -> Result<ResearchSession> {
    let status = text(row, 2, "status")?;
    Ok(ResearchSession {
        research_id: text(row, 0, "research_id")?,
        user_id: text(row, 1, "user_id")?,
        status: status.parse()?,
        model_id: text_or_null(row, 3, "model_id")?,
        budget: text_or_null(row, 4, "budget")?,
        title: text_or_null(row, 5, "title")?,
        total_input_tokens: integer(row, 6, "total_input_tokens")?,
        total_output_tokens: integer(row, 7, "total_output_tokens")?,
        create_time: millis_to_datetime(integer(row, 8, "create_time")?),
        update_time: millis_to_datetime(integer(row, 9, "update_time")?),
        start_time: integer_or_null(row, 10, "start_time")?.map(millis_to_datetime),
        complete_time: integer_or_null(row, 11, "complete_time")?.map(millis_to_datetime),
    })
}

fn message_from_row(row: &Row) -> Result<ChatMessageRecord> {
    let role = text(row, 2, "role")?;
    Ok(ChatMessageRecord {
        id: integer(row, 0, "id")?,
        research_id: text(row, 1, "research_id")?,
        role: role.parse()?,
        content: text(row, 3, "content")?,
        sequence_no: integer(row, 4, "sequence_no")?,
        create_time: millis_to_datetime(integer(row, 5, "create_time")?),
    })
}

fn event_from_row(row: &Row) -> Result<WorkflowEventRecord> {
    let kind = text(row, 2, "type")?;
    let status = text(row, 3, "status")?;
    Ok(WorkflowEventRecord {
        id: integer(row, 0, "id")?,
        research_id: text(row, 1, "research_id")?,
        kind: kind.parse()?,
        status: status.parse()?,
        title: text(row, 4, "title")?,
        content: text_or_null(row, 5, "content")?,
        parent_event_id: integer_or_null(row, 6, "parent_event_id")?,
        sequence_no: integer(row, 7, "sequence_no")?,
        create_time: millis_to_datetime(integer(row, 8, "create_time")?),
    })
}

#[async_trait]
impl RecordStore for TursoClient {
    async fn create_session(&self, research_id: &str, user_id: &str) -> Result<ResearchSession> {
        let now = Utc::now().timestamp_millis();
        let conn = self.conn.lock().await;

        conn.execute(
            "INSERT INTO research_sessions (research_id, user_id, status, create_time, update_time)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            (research_id, user_id, WorkflowStatus::New.as_str(), now),
        )
        .await
        .map_err(|e| AppError::Database(format!("Failed to create session: {}", e)))?;

        Ok(ResearchSession {
            research_id: research_id.to_string(),
            user_id: user_id.to_string(),
            status: WorkflowStatus::New,
            model_id: None,
            budget: None,
            title: None,
            total_input_tokens: 0,
            total_output_tokens: 0,
            create_time: millis_to_datetime(now),
            update_time: millis_to_datetime(now),
            start_time: None,
            complete_time: None,
        })
    }

    async fn get_session(&self, research_id: &str) -> Result<Option<ResearchSession>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM research_sessions WHERE research_id = ?1",
            SESSION_COLUMNS
        );
        let mut rows = conn
            .query(&sql, [research_id])
            .await
            .map_err(|e| AppError::Database(format!("Failed to query session: {}", e)))?;

        match rows
            .next()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
        {
            Some(row) => Ok(Some(session_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_sessions(
        &self,
        user_id: &str,
        status: WorkflowStatus,
    ) -> Result<Vec<ResearchSession>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM research_sessions WHERE user_id = ?1 AND status = ?2 ORDER BY create_time ASC",
            SESSION_COLUMNS
        );
        let mut rows = conn
            .query(&sql, (user_id, status.as_str()))
            .await
            .map_err(|e| AppError::Database(format!("Failed to list sessions: {}", e)))?;

        let mut sessions = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
        {
            sessions.push(session_from_row(&row)?);
        }
        Ok(sessions)
    }

    async fn compare_and_set_status(
        &self,
        research_id: &str,
        expected: WorkflowStatus,
        next: WorkflowStatus,
    ) -> Result<u64> {
        let now = Utc::now().timestamp_millis();
        let conn = self.conn.lock().await;

        conn.execute(
            "UPDATE research_sessions SET status = ?3, update_time = ?4
             WHERE research_id = ?1 AND status = ?2",
            (research_id, expected.as_str(), next.as_str(), now),
        )
        .await
        .map_err(|e| AppError::Database(format!("Failed to update session status: {}", e)))
    }

    async fn update_progress(&self, research_id: &str, progress: SessionProgress) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let conn = self.conn.lock().await;

        conn.execute(
            "UPDATE research_sessions SET
                status = ?2,
                total_input_tokens = ?3,
                total_output_tokens = ?4,
                update_time = ?5,
                start_time = CASE WHEN ?2 = 'START' AND start_time IS NULL THEN ?5 ELSE start_time END,
                complete_time = CASE WHEN ?2 IN ('COMPLETED', 'FAILED', 'NEED_CLARIFICATION') THEN ?5 ELSE complete_time END
             WHERE research_id = ?1",
            (
                research_id,
                progress.status.as_str(),
                progress.total_input_tokens,
                progress.total_output_tokens,
                now,
            ),
        )
        .await
        .map_err(|e| AppError::Database(format!("Failed to update session progress: {}", e)))?;

        Ok(())
    }

    async fn set_metadata(&self, research_id: &str, metadata: &SessionMetadata) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let conn = self.conn.lock().await;

        conn.execute(
            "UPDATE research_sessions SET
                model_id = COALESCE(model_id, ?2),
                budget = COALESCE(budget, ?3),
                title = COALESCE(title, ?4),
                update_time = ?5
             WHERE research_id = ?1",
            vec![
                Value::Text(research_id.to_string()),
                opt_text(metadata.model_id.as_deref()),
                opt_text(metadata.budget.as_deref()),
                opt_text(metadata.title.as_deref()),
                Value::Integer(now),
            ],
        )
        .await
        .map_err(|e| AppError::Database(format!("Failed to update session metadata: {}", e)))?;

        Ok(())
    }

    async fn insert_message(&self, message: &ChatMessageRecord) -> Result<i64> {
        let conn = self.conn.lock().await;

        conn.execute(
            "INSERT INTO chat_messages (research_id, role, content, sequence_no, create_time)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            (
                message.research_id.as_str(),
                message.role.as_str(),
                message.content.as_str(),
                message.sequence_no,
                message.create_time.timestamp_millis(),
            ),
        )
        .await
        .map_err(|e| AppError::Database(format!("Failed to insert message: {}", e)))?;

        Ok(conn.last_insert_rowid())
    }

    async fn insert_event(&self, event: &WorkflowEventRecord) -> Result<i64> {
        let conn = self.conn.lock().await;

        conn.execute(
            "INSERT INTO workflow_events
                (research_id, type, status, title, content, parent_event_id, sequence_no, create_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            vec![
                Value::Text(event.research_id.clone()),
                Value::Text(event.kind.as_str().to_string()),
                Value::Text(event.status.as_str().to_string()),
                Value::Text(event.title.clone()),
                opt_text(event.content.as_deref()),
                opt_integer(event.parent_event_id),
                Value::Integer(event.sequence_no),
                Value::Integer(event.create_time.timestamp_millis()),
            ],
        )
        .await
        .map_err(|e| AppError::Database(format!("Failed to insert event: {}", e)))?;

        Ok(conn.last_insert_rowid())
    }

    async fn list_messages(&self, research_id: &str) -> Result<Vec<ChatMessageRecord>> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT id, research_id, role, content, sequence_no, create_time
                 FROM chat_messages WHERE research_id = ?1 ORDER BY sequence_no ASC",
                [research_id],
            )
            .await
            .map_err(|e| AppError::Database(format!("Failed to list messages: {}", e)))?;

        let mut messages = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
        {
            messages.push(message_from_row(&row)?);
        }
        Ok(messages)
    }

    async fn list_events(&self, research_id: &str) -> Result<Vec<WorkflowEventRecord>> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT id, research_id, type, status, title, content, parent_event_id, sequence_no, create_time
                 FROM workflow_events WHERE research_id = ?1 ORDER BY sequence_no ASC",
                [research_id],
            )
            .await
            .map_err(|e| AppError::Database(format!("Failed to list events: {}", e)))?;

        let mut events = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
        {
            events.push(event_from_row(&row)?);
        }
        Ok(events)
    }

    async fn max_sequence(&self, research_id: &str) -> Result<i64> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT COALESCE(MAX(seq), 0) FROM (
                    SELECT MAX(sequence_no) AS seq FROM chat_messages WHERE research_id = ?1
                    UNION ALL
                    SELECT MAX(sequence_no) AS seq FROM workflow_events WHERE research_id = ?1
                 )",
                [research_id],
            )
            .await
            .map_err(|e| AppError::Database(format!("Failed to read max sequence: {}", e)))?;

        match rows
            .next()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
        {
            Some(row) => integer(&row, 0, "max_sequence"),
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventKind, EventStatus, MessageRole};

    fn message(research_id: &str, seq: i64, content: &str) -> ChatMessageRecord {
        ChatMessageRecord {
            id: 0,
            research_id: research_id.to_string(),
            role: MessageRole::User,
            content: content.to_string(),
            sequence_no: seq,
            create_time: Utc::now(),
        }
    }

    fn event(research_id: &str, seq: i64, parent: Option<i64>) -> WorkflowEventRecord {
        WorkflowEventRecord {
            id: 0,
            research_id: research_id.to_string(),
            kind: EventKind::Research,
            status: EventStatus::InProgress,
            title: "Researching".to_string(),
            content: None,
            parent_event_id: parent,
            sequence_no: seq,
            create_time: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let store = TursoClient::new_memory().await.unwrap();
        let created = store.create_session("r1", "u1").await.unwrap();
        assert_eq!(created.status, WorkflowStatus::New);

        let fetched = store.get_session("r1").await.unwrap().unwrap();
        assert_eq!(fetched.user_id, "u1");
        assert!(store.get_session("missing").await.unwrap().is_none());

        let listed = store.list_sessions("u1", WorkflowStatus::New).await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_compare_and_set_only_matches_expected_status() {
        let store = TursoClient::new_memory().await.unwrap();
        store.create_session("r1", "u1").await.unwrap();

        let first = store
            .compare_and_set_status("r1", WorkflowStatus::New, WorkflowStatus::Queue)
            .await
            .unwrap();
        let second = store
            .compare_and_set_status("r1", WorkflowStatus::New, WorkflowStatus::Queue)
            .await
            .unwrap();

        assert_eq!(first, 1);
        assert_eq!(second, 0);
        let session = store.get_session("r1").await.unwrap().unwrap();
        assert_eq!(session.status, WorkflowStatus::Queue);
    }

    #[tokio::test]
    async fn test_progress_sets_start_and_complete_times() {
        let store = TursoClient::new_memory().await.unwrap();
        store.create_session("r1", "u1").await.unwrap();

        store
            .update_progress(
                "r1",
                SessionProgress {
                    status: WorkflowStatus::Start,
                    total_input_tokens: 0,
                    total_output_tokens: 0,
                },
            )
            .await
            .unwrap();
        let started = store.get_session("r1").await.unwrap().unwrap();
        assert!(started.start_time.is_some());
        assert!(started.complete_time.is_none());

        store
            .update_progress(
                "r1",
                SessionProgress {
                    status: WorkflowStatus::Completed,
                    total_input_tokens: 120,
                    total_output_tokens: 45,
                },
            )
            .await
            .unwrap();
        let done = store.get_session("r1").await.unwrap().unwrap();
        assert_eq!(done.status, WorkflowStatus::Completed);
        assert_eq!(done.total_input_tokens, 120);
        assert_eq!(done.start_time, started.start_time);
        assert!(done.complete_time.is_some());
    }

    #[tokio::test]
    async fn test_metadata_is_first_write_wins() {
        let store = TursoClient::new_memory().await.unwrap();
        store.create_session("r1", "u1").await.unwrap();

        store
            .set_metadata(
                "r1",
                &SessionMetadata {
                    model_id: Some("default".to_string()),
                    budget: Some("HIGH".to_string()),
                    title: None,
                },
            )
            .await
            .unwrap();
        store
            .set_metadata(
                "r1",
                &SessionMetadata {
                    model_id: Some("other".to_string()),
                    budget: None,
                    title: Some("Battery chemistry".to_string()),
                },
            )
            .await
            .unwrap();

        let session = store.get_session("r1").await.unwrap().unwrap();
        assert_eq!(session.model_id.as_deref(), Some("default"));
        assert_eq!(session.budget.as_deref(), Some("HIGH"));
        assert_eq!(session.title.as_deref(), Some("Battery chemistry"));
    }

    #[tokio::test]
    async fn test_max_sequence_spans_messages_and_events() {
        let store = TursoClient::new_memory().await.unwrap();
        assert_eq!(store.max_sequence("r1").await.unwrap(), 0);

        store.insert_message(&message("r1", 1, "hello")).await.unwrap();
        let parent = store.insert_event(&event("r1", 2, None)).await.unwrap();
        store.insert_event(&event("r1", 5, Some(parent))).await.unwrap();
        store.insert_message(&message("r2", 9, "other run")).await.unwrap();

        assert_eq!(store.max_sequence("r1").await.unwrap(), 5);

        let events = store.list_events("r1").await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].parent_event_id, Some(parent));
        assert_eq!(store.list_messages("r1").await.unwrap().len(), 1);
    }
}
