//! Live viewer connections per run.
//!
//! Each viewer owns a bounded channel of [`StreamFrame`]s that the SSE
//! handler drains. A viewer whose channel is closed or full is dropped on
//! the spot; it is expected to reconnect with its last seen sequence number.

use crate::timeline::TimelineCache;
use crate::types::{TimelineItem, WorkflowStatus};
use axum::response::sse::Event;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, mpsc};
use tracing::{debug, info, warn};

/// How long a replay or terminal frame may wait on a full viewer buffer.
const BLOCKING_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// One frame on a viewer's stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    Item(TimelineItem),
    ReportChunk(String),
    Heartbeat,
    Done(WorkflowStatus),
}

impl StreamFrame {
    /// Encode as a server-sent event. Persisted items carry their sequence
    /// number as the event id so browsers resume via `Last-Event-ID`.
    pub fn into_sse_event(self) -> Result<Event, axum::Error> {
        match self {
            StreamFrame::Item(item) => {
                let mut event = Event::default().event(item.kind());
                if !item.is_transient() {
                    event = event.id(item.sequence_no().to_string());
                }
                event.json_data(&item)
            }
            StreamFrame::ReportChunk(text) => Ok(Event::default().event("report-stream").data(text)),
            StreamFrame::Heartbeat => Ok(Event::default().comment("heartbeat")),
            StreamFrame::Done(status) => Ok(Event::default().data(format!("[DONE] {}", status))),
        }
    }
}

struct ClientConn {
    tx: mpsc::Sender<StreamFrame>,
    /// Highest sequence number delivered. Held for the whole replay so live
    /// items queue up behind it.
    delivered: Arc<Mutex<i64>>,
}

type ClientMap = HashMap<String, HashMap<String, Arc<ClientConn>>>;

pub struct StreamingHub {
    clients: RwLock<ClientMap>,
    cache: Arc<TimelineCache>,
    buffer: usize,
    shutdown: AtomicBool,
}

impl StreamingHub {
    pub fn new(cache: Arc<TimelineCache>, buffer: usize) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            cache,
            buffer: buffer.max(1),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Register a viewer. With `last_event_id` set, everything after it is
    /// replayed before any live frame reaches the viewer.
    pub async fn connect(
        self: &Arc<Self>,
        research_id: &str,
        client_id: &str,
        last_event_id: Option<i64>,
    ) -> mpsc::Receiver<StreamFrame> {
        let (tx, rx) = mpsc::channel(self.buffer);
        let delivered = Arc::new(Mutex::new(0i64));
        let gate = Arc::clone(&delivered).lock_owned().await;

        let conn = Arc::new(ClientConn { tx, delivered });
        self.clients
            .write()
            .entry(research_id.to_string())
            .or_default()
            .insert(client_id.to_string(), Arc::clone(&conn));

        info!(research_id, client_id, ?last_event_id, "Viewer connected");

        match last_event_id {
            Some(last_seq) => {
                let hub = Arc::clone(self);
                let research_id = research_id.to_string();
                let client_id = client_id.to_string();
                tokio::spawn(async move {
                    hub.replay(&research_id, &client_id, conn, gate, last_seq).await;
                });
            }
            None => drop(gate),
        }

        rx
    }

    async fn replay(
        &self,
        research_id: &str,
        client_id: &str,
        conn: Arc<ClientConn>,
        mut gate: OwnedMutexGuard<i64>,
        last_seq: i64,
    ) {
        *gate = last_seq.max(0);

        let items = match self.cache.get_timeline(research_id, last_seq.max(0)).await {
            Ok(items) => items,
            Err(e) => {
                warn!(research_id, client_id, error = %e, "Replay failed, continuing live");
                return;
            }
        };

        let count = items.len();
        for item in items {
            let seq = item.sequence_no();
            let sent = tokio::time::timeout(BLOCKING_SEND_TIMEOUT, conn.tx.send(StreamFrame::Item(item))).await;
            if !matches!(sent, Ok(Ok(()))) {
                debug!(research_id, client_id, "Viewer went away during replay");
                self.deregister(research_id, client_id, &conn);
                return;
            }
            *gate = seq;
        }

        debug!(research_id, client_id, replayed = count, "Replay complete");
    }

    fn snapshot(&self, research_id: &str) -> Vec<(String, Arc<ClientConn>)> {
        self.clients
            .read()
            .get(research_id)
            .map(|clients| {
                clients
                    .iter()
                    .map(|(id, conn)| (id.clone(), Arc::clone(conn)))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn deregister(&self, research_id: &str, client_id: &str, conn: &Arc<ClientConn>) {
        let mut clients = self.clients.write();
        if let Some(run_clients) = clients.get_mut(research_id) {
            // a reconnect may have replaced this entry already
            if run_clients
                .get(client_id)
                .is_some_and(|current| Arc::ptr_eq(current, conn))
            {
                run_clients.remove(client_id);
                debug!(research_id, client_id, "Viewer deregistered");
            }
            if run_clients.is_empty() {
                clients.remove(research_id);
            }
        }
    }

    /// Fan a timeline item out to every viewer of its run, in order.
    pub async fn send_item(&self, item: &TimelineItem) {
        let research_id = item.research_id();
        let seq = item.sequence_no();

        for (client_id, conn) in self.snapshot(research_id) {
            let mut delivered = conn.delivered.lock().await;
            if !item.is_transient() && seq <= *delivered {
                continue;
            }
            match conn.tx.try_send(StreamFrame::Item(item.clone())) {
                Ok(()) => {
                    if !item.is_transient() {
                        *delivered = seq;
                    }
                }
                Err(e) => {
                    warn!(research_id, client_id = %client_id, error = %e, "Timeline push failed");
                    drop(delivered);
                    self.deregister(research_id, &client_id, &conn);
                }
            }
        }
    }

    /// Live-only partial report text.
    pub fn send_report_chunk(&self, research_id: &str, text: &str) {
        if text.is_empty() {
            return;
        }
        for (client_id, conn) in self.snapshot(research_id) {
            if let Err(e) = conn.tx.try_send(StreamFrame::ReportChunk(text.to_string())) {
                warn!(research_id, client_id = %client_id, error = %e, "Report stream push failed");
                self.deregister(research_id, &client_id, &conn);
            }
        }
    }

    /// Ping every open connection once, dropping the ones that fail.
    pub fn heartbeat(&self) -> usize {
        let all: Vec<(String, String, Arc<ClientConn>)> = self
            .clients
            .read()
            .iter()
            .flat_map(|(research_id, clients)| {
                clients
                    .iter()
                    .map(|(client_id, conn)| (research_id.clone(), client_id.clone(), Arc::clone(conn)))
            })
            .collect();

        let mut dropped = 0;
        for (research_id, client_id, conn) in all {
            if conn.tx.try_send(StreamFrame::Heartbeat).is_err() {
                debug!(research_id = %research_id, client_id = %client_id, "Heartbeat failed, removing viewer");
                self.deregister(&research_id, &client_id, &conn);
                dropped += 1;
            }
        }
        dropped
    }

    /// Spawn the periodic heartbeat ticker.
    pub fn start_heartbeat(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if hub.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                hub.heartbeat();
            }
        })
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Send the terminal frame to every viewer of the run and close them.
    pub async fn complete(&self, research_id: &str, status: WorkflowStatus) {
        let clients = self.clients.write().remove(research_id).unwrap_or_default();
        let count = clients.len();

        for (client_id, conn) in clients {
            Self::finish(research_id, &client_id, &conn, status).await;
        }

        info!(research_id, %status, viewers = count, "Run streams closed");
    }

    /// Close a single viewer with a terminal frame.
    pub async fn complete_client(&self, research_id: &str, client_id: &str, status: WorkflowStatus) {
        let conn = {
            let mut clients = self.clients.write();
            let conn = clients
                .get_mut(research_id)
                .and_then(|run_clients| run_clients.remove(client_id));
            if clients.get(research_id).is_some_and(|c| c.is_empty()) {
                clients.remove(research_id);
            }
            conn
        };

        if let Some(conn) = conn {
            Self::finish(research_id, client_id, &conn, status).await;
        }
    }

    async fn finish(research_id: &str, client_id: &str, conn: &ClientConn, status: WorkflowStatus) {
        // wait out any replay still feeding this viewer
        let _delivered = conn.delivered.lock().await;
        let sent = tokio::time::timeout(BLOCKING_SEND_TIMEOUT, conn.tx.send(StreamFrame::Done(status))).await;
        if !matches!(sent, Ok(Ok(()))) {
            debug!(research_id, client_id, "Viewer gone before terminal frame");
        }
    }

    pub fn connection_count(&self, research_id: &str) -> usize {
        self.clients
            .read()
            .get(research_id)
            .map(|clients| clients.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{RecordStore, TursoClient};
    use crate::timeline::MemoryTimelineStore;
    use crate::types::{ChatMessageRecord, MessageRole};
    use chrono::DateTime;

    fn message(seq: i64) -> TimelineItem {
        TimelineItem::Message(ChatMessageRecord {
            id: seq,
            research_id: "r1".to_string(),
            role: MessageRole::Assistant,
            content: format!("m{}", seq),
            sequence_no: seq,
            create_time: DateTime::from_timestamp_millis(1_700_000_000_000 + seq).unwrap(),
        })
    }

    async fn hub(buffer: usize) -> Arc<StreamingHub> {
        let records: Arc<dyn RecordStore> = Arc::new(TursoClient::new_memory().await.unwrap());
        let cache = Arc::new(TimelineCache::new(
            Arc::new(MemoryTimelineStore::new()),
            records,
            Duration::from_secs(60),
        ));
        Arc::new(StreamingHub::new(cache, buffer))
    }

    #[tokio::test]
    async fn test_live_items_reach_all_viewers() {
        let hub = hub(8).await;
        let mut a = hub.connect("r1", "a", None).await;
        let mut b = hub.connect("r1", "b", None).await;

        hub.send_item(&message(1)).await;

        assert_eq!(a.recv().await, Some(StreamFrame::Item(message(1))));
        assert_eq!(b.recv().await, Some(StreamFrame::Item(message(1))));
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_deregistered() {
        let hub = hub(8).await;
        let rx = hub.connect("r1", "a", None).await;
        drop(rx);

        hub.send_item(&message(1)).await;
        assert_eq!(hub.connection_count("r1"), 0);
    }

    #[tokio::test]
    async fn test_full_buffer_counts_as_failure() {
        let hub = hub(1).await;
        let _rx = hub.connect("r1", "slow", None).await;

        hub.send_item(&message(1)).await;
        assert_eq!(hub.connection_count("r1"), 1);
        hub.send_item(&message(2)).await;
        assert_eq!(hub.connection_count("r1"), 0);
    }

    #[tokio::test]
    async fn test_never_delivers_lower_sequence_after_higher() {
        let hub = hub(8).await;
        let mut rx = hub.connect("r1", "a", None).await;

        hub.send_item(&message(2)).await;
        hub.send_item(&message(1)).await;
        hub.send_item(&message(3)).await;
        hub.complete("r1", WorkflowStatus::Completed).await;

        let mut seqs = Vec::new();
        while let Some(frame) = rx.recv().await {
            if let StreamFrame::Item(item) = frame {
                seqs.push(item.sequence_no());
            }
        }
        assert_eq!(seqs, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_heartbeat_drops_closed_connections() {
        let hub = hub(8).await;
        let mut alive = hub.connect("r1", "alive", None).await;
        drop(hub.connect("r1", "gone", None).await);

        assert_eq!(hub.heartbeat(), 1);
        assert_eq!(alive.recv().await, Some(StreamFrame::Heartbeat));
        assert_eq!(hub.connection_count("r1"), 1);
    }

    #[tokio::test]
    async fn test_complete_sends_single_done_and_closes() {
        let hub = hub(8).await;
        let mut rx = hub.connect("r1", "a", None).await;

        hub.complete("r1", WorkflowStatus::Failed).await;

        assert_eq!(rx.recv().await, Some(StreamFrame::Done(WorkflowStatus::Failed)));
        assert_eq!(rx.recv().await, None);
        assert_eq!(hub.connection_count("r1"), 0);
    }

    #[test]
    fn test_done_frame_encoding() {
        let event = StreamFrame::Done(WorkflowStatus::Completed).into_sse_event();
        assert!(event.is_ok());
    }
}
