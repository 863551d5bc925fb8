//! The single write path for client-visible progress.
//!
//! A persisted append is: allocate sequence number, write the row, upsert the
//! cache, fan out to viewers. Appends for one run are serialized so viewers
//! observe them in sequence order.

use crate::db::RecordStore;
use crate::streaming::StreamingHub;
use crate::timeline::{SequenceAllocator, TimelineCache};
use crate::types::{
    ChatMessageRecord, EventKind, EventStatus, MessageRole, Result, TimelineItem,
    WorkflowEventRecord,
};
use chrono::{DateTime, SubsecRound, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

/// Current time at the millisecond precision the record store keeps, so
/// live, cached and reloaded copies of an item compare equal.
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Fields of a workflow event before it is numbered and stored.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub kind: EventKind,
    pub status: EventStatus,
    pub title: String,
    pub content: Option<String>,
    pub parent_event_id: Option<i64>,
}

impl NewEvent {
    pub fn new(kind: EventKind, title: impl Into<String>) -> Self {
        Self {
            kind,
            status: EventStatus::InProgress,
            title: title.into(),
            content: None,
            parent_event_id: None,
        }
    }

    pub fn status(mut self, status: EventStatus) -> Self {
        self.status = status;
        self
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn parent(mut self, parent_event_id: Option<i64>) -> Self {
        self.parent_event_id = parent_event_id;
        self
    }
}

pub struct EventPublisher {
    sequences: Arc<SequenceAllocator>,
    records: Arc<dyn RecordStore>,
    cache: Arc<TimelineCache>,
    hub: Arc<StreamingHub>,
    append_locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl EventPublisher {
    pub fn new(
        sequences: Arc<SequenceAllocator>,
        records: Arc<dyn RecordStore>,
        cache: Arc<TimelineCache>,
        hub: Arc<StreamingHub>,
    ) -> Self {
        Self {
            sequences,
            records,
            cache,
            hub,
            append_locks: RwLock::new(HashMap::new()),
        }
    }

    fn append_lock(&self, research_id: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.append_locks.read().get(research_id) {
            return Arc::clone(lock);
        }
        Arc::clone(
            self.append_locks
                .write()
                .entry(research_id.to_string())
                .or_default(),
        )
    }

    async fn cache_and_fan_out(&self, item: &TimelineItem) {
        if let Err(e) = self.cache.append(item).await {
            warn!(research_id = item.research_id(), seq = item.sequence_no(), error = %e, "Timeline cache write failed");
        }
        self.hub.send_item(item).await;
    }

    /// Persist a chat message and push it to viewers.
    pub async fn publish_message(
        &self,
        research_id: &str,
        role: MessageRole,
        content: &str,
    ) -> Result<ChatMessageRecord> {
        let lock = self.append_lock(research_id);
        let _guard = lock.lock().await;

        let mut message = ChatMessageRecord {
            id: 0,
            research_id: research_id.to_string(),
            role,
            content: content.to_string(),
            sequence_no: self.sequences.next(research_id).await?,
            create_time: now_millis(),
        };
        message.id = self.records.insert_message(&message).await?;

        self.cache_and_fan_out(&TimelineItem::Message(message.clone()))
            .await;
        Ok(message)
    }

    /// Persist a workflow event and push it to viewers. Returns the event id
    /// for use as a parent of nested events.
    pub async fn publish_event(&self, research_id: &str, event: NewEvent) -> Result<i64> {
        let lock = self.append_lock(research_id);
        let _guard = lock.lock().await;

        let mut record = WorkflowEventRecord {
            id: 0,
            research_id: research_id.to_string(),
            kind: event.kind,
            status: event.status,
            title: event.title,
            content: event.content,
            parent_event_id: event.parent_event_id,
            sequence_no: self.sequences.next(research_id).await?,
            create_time: now_millis(),
        };
        record.id = self.records.insert_event(&record).await?;
        let id = record.id;

        self.cache_and_fan_out(&TimelineItem::Event(record)).await;
        Ok(id)
    }

    /// Partial report text, live viewers only.
    pub fn publish_report_stream(&self, research_id: &str, chunk: &str) {
        self.hub.send_report_chunk(research_id, chunk);
    }

    /// Live-only notice: no sequence number, no row, no cache entry.
    pub async fn publish_temp_event(&self, research_id: &str, kind: EventKind, title: &str) {
        let item = TimelineItem::Event(WorkflowEventRecord {
            id: 0,
            research_id: research_id.to_string(),
            kind,
            status: EventStatus::Transient,
            title: title.to_string(),
            content: None,
            parent_event_id: None,
            sequence_no: 0,
            create_time: now_millis(),
        });
        self.hub.send_item(&item).await;
    }

    /// Drop per-run state once a run has ended.
    pub fn finish(&self, research_id: &str) {
        self.sequences.reset(research_id);
        self.append_locks.write().remove(research_id);
    }

    pub fn hub(&self) -> &Arc<StreamingHub> {
        &self.hub
    }

    pub fn cache(&self) -> &Arc<TimelineCache> {
        &self.cache
    }

    pub fn records(&self) -> &Arc<dyn RecordStore> {
        &self.records
    }
}
