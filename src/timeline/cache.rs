//! Read-through / write-through timeline cache.
//!
//! The cache mirrors each run's persisted timeline under
//! `research:{id}:timeline`, scored by sequence number. It is never the
//! system of record: a miss rebuilds the full timeline from the record store.

use crate::db::RecordStore;
use crate::timeline::store::{AddMode, TimelineStore};
use crate::types::{AppError, Result, TimelineItem};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub struct TimelineCache {
    store: Arc<dyn TimelineStore>,
    records: Arc<dyn RecordStore>,
    ttl: Duration,
}

impl TimelineCache {
    pub fn new(store: Arc<dyn TimelineStore>, records: Arc<dyn RecordStore>, ttl: Duration) -> Self {
        Self {
            store,
            records,
            ttl,
        }
    }

    pub fn key(research_id: &str) -> String {
        format!("research:{}:timeline", research_id)
    }

    /// Upsert a freshly persisted item.
    ///
    /// Only the first item of a timeline may create the key. Later items are
    /// written into a live key only, so an expired timeline is never
    /// resurrected holding just its newest entries.
    pub async fn append(&self, item: &TimelineItem) -> Result<bool> {
        if item.is_transient() {
            return Ok(false);
        }

        let value = serde_json::to_string(item)
            .map_err(|e| AppError::Internal(format!("Failed to serialize timeline item: {}", e)))?;
        let mode = if item.sequence_no() == 1 {
            AddMode::Create
        } else {
            AddMode::ExistingOnly
        };

        let written = self
            .store
            .add(
                &Self::key(item.research_id()),
                vec![(item.sequence_no(), value)],
                self.ttl,
                mode,
            )
            .await;
        if !written {
            debug!(
                research_id = item.research_id(),
                seq = item.sequence_no(),
                "Timeline cache cold, leaving rebuild to the next read"
            );
        }
        Ok(written)
    }

    /// Items with `sequence_no > from_seq`, ascending (all items when `from_seq == 0`).
    pub async fn get_timeline(&self, research_id: &str, from_seq: i64) -> Result<Vec<TimelineItem>> {
        let key = Self::key(research_id);
        if let Some(values) = self
            .store
            .range_by_score(&key, from_seq.saturating_add(1), i64::MAX, self.ttl)
            .await
        {
            let items: Vec<TimelineItem> = values
                .iter()
                .filter_map(|value| match serde_json::from_str(value) {
                    Ok(item) => Some(item),
                    Err(e) => {
                        warn!(research_id, error = %e, "Dropping undecodable cached timeline item");
                        None
                    }
                })
                .collect();
            return Ok(items);
        }

        let all = self.rebuild(research_id).await?;
        Ok(all
            .into_iter()
            .filter(|item| from_seq == 0 || item.sequence_no() > from_seq)
            .collect())
    }

    /// Load the full timeline from the record store and repopulate the cache.
    ///
    /// An append landing between the load and the write finds the key cold
    /// and writes nothing, so the record store is read again once the key
    /// exists and anything newer is merged in.
    pub async fn rebuild(&self, research_id: &str) -> Result<Vec<TimelineItem>> {
        let key = Self::key(research_id);
        let mut all = self.load(research_id).await?;
        if !all.is_empty() {
            self.store
                .add(&key, Self::members(&all), self.ttl, AddMode::Create)
                .await;
        }

        let newest = all.last().map(TimelineItem::sequence_no).unwrap_or(0);
        let late: Vec<TimelineItem> = self
            .load(research_id)
            .await?
            .into_iter()
            .filter(|item| item.sequence_no() > newest)
            .collect();
        if !late.is_empty() {
            // an empty first load means `late` is the whole timeline
            let mode = if all.is_empty() {
                AddMode::Create
            } else {
                AddMode::ExistingOnly
            };
            self.store
                .add(&key, Self::members(&late), self.ttl, mode)
                .await;
            all.extend(late);
        }

        debug!(research_id, items = all.len(), "Rebuilt timeline from record store");
        Ok(all)
    }

    async fn load(&self, research_id: &str) -> Result<Vec<TimelineItem>> {
        let messages = self.records.list_messages(research_id).await?;
        let events = self.records.list_events(research_id).await?;

        let mut all: Vec<TimelineItem> = messages
            .into_iter()
            .map(TimelineItem::Message)
            .chain(events.into_iter().map(TimelineItem::Event))
            .collect();
        all.sort_by_key(|item| item.sequence_no());
        Ok(all)
    }

    fn members(items: &[TimelineItem]) -> Vec<(i64, String)> {
        items
            .iter()
            .filter_map(|item| {
                serde_json::to_string(item)
                    .ok()
                    .map(|value| (item.sequence_no(), value))
            })
            .collect()
    }

    pub async fn evict(&self, research_id: &str) {
        self.store.remove(&Self::key(research_id)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::TursoClient;
    use crate::timeline::store::MemoryTimelineStore;
    use crate::timeline::store::TimelineStoreStats;
    use crate::types::{ChatMessageRecord, MessageRole};
    use async_trait::async_trait;
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

    fn seqs(items: &[TimelineItem]) -> Vec<i64> {
        items.iter().map(|i| i.sequence_no()).collect()
    }

    /// Holds every key-creating write back for `delay`.
    struct SlowCreateStore {
        inner: MemoryTimelineStore,
        delay: Duration,
    }

    #[async_trait]
    impl TimelineStore for SlowCreateStore {
        async fn add(
            &self,
            key: &str,
            members: Vec<(i64, String)>,
            ttl: Duration,
            mode: AddMode,
        ) -> bool {
            if mode == AddMode::Create {
                tokio::time::sleep(self.delay).await;
            }
            self.inner.add(key, members, ttl, mode).await
        }

        async fn range_by_score(
            &self,
            key: &str,
            min: i64,
            max: i64,
            ttl: Duration,
        ) -> Option<Vec<String>> {
            self.inner.range_by_score(key, min, max, ttl).await
        }

        async fn remove(&self, key: &str) {
            self.inner.remove(key).await
        }

        fn stats(&self) -> TimelineStoreStats {
            self.inner.stats()
        }
    }

    async fn cache() -> (TimelineCache, Arc<dyn RecordStore>) {
        let records: Arc<dyn RecordStore> = Arc::new(TursoClient::new_memory().await.unwrap());
        let cache = TimelineCache::new(
            Arc::new(MemoryTimelineStore::new()),
            Arc::clone(&records),
            Duration::from_secs(60),
        );
        (cache, records)
    }

    #[tokio::test]
    async fn test_append_then_read_from_cache() {
        let (cache, _) = cache().await;
        assert!(cache.append(&message(1)).await.unwrap());
        assert!(cache.append(&message(2)).await.unwrap());

        let items = cache.get_timeline("r1", 1).await.unwrap();
        assert_eq!(items, vec![message(2)]);
    }

    #[tokio::test]
    async fn test_cold_append_does_not_create_partial_timeline() {
        let (cache, records) = cache().await;
        for seq in 1..=3 {
            if let TimelineItem::Message(m) = message(seq) {
                records.insert_message(&m).await.unwrap();
            }
        }

        assert!(!cache.append(&message(3)).await.unwrap());

        let items = cache.get_timeline("r1", 0).await.unwrap();
        assert_eq!(seqs(&items), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_append_during_rebuild_is_merged() {
        let records: Arc<dyn RecordStore> = Arc::new(TursoClient::new_memory().await.unwrap());
        for seq in 1..=3 {
            if let TimelineItem::Message(m) = message(seq) {
                records.insert_message(&m).await.unwrap();
            }
        }
        let cache = Arc::new(TimelineCache::new(
            Arc::new(SlowCreateStore {
                inner: MemoryTimelineStore::new(),
                delay: Duration::from_millis(200),
            }),
            Arc::clone(&records),
            Duration::from_secs(60),
        ));

        let reader = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get_timeline("r1", 0).await.unwrap() })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let TimelineItem::Message(late) = message(4) else {
            unreachable!()
        };
        records.insert_message(&late).await.unwrap();
        assert!(!cache.append(&message(4)).await.unwrap());

        assert_eq!(seqs(&reader.await.unwrap()), vec![1, 2, 3, 4]);
        let cached = cache.get_timeline("r1", 0).await.unwrap();
        assert_eq!(seqs(&cached), vec![1, 2, 3, 4]);
        assert_eq!(cached[3], message(4));
    }

    #[tokio::test]
    async fn test_up_to_date_reader_gets_empty_hit() {
        let (cache, _) = cache().await;
        cache.append(&message(1)).await.unwrap();
        assert!(cache.get_timeline("r1", 1).await.unwrap().is_empty());
    }
}
