//! Sorted, TTL-capable collection store backing the timeline cache.
//!
//! Each key holds members ordered by an integer score (the sequence number).
//! Adding a member with a score already present replaces it, which keeps
//! repeated appends of the same item idempotent.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

// ============================================================================
// Store Trait
// ============================================================================

/// How an add treats a key that does not exist (or has expired).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddMode {
    /// Create the key if needed
    Create,
    /// Only write into a key that is already live
    ExistingOnly,
}

#[async_trait]
pub trait TimelineStore: Send + Sync {
    /// Upsert scored members and refresh the key's TTL.
    /// Returns false when nothing was written (ExistingOnly on a cold key).
    async fn add(&self, key: &str, members: Vec<(i64, String)>, ttl: Duration, mode: AddMode)
    -> bool;

    /// Members with `min <= score <= max`, ascending. `None` when the key is
    /// absent or expired. A hit refreshes the TTL.
    async fn range_by_score(
        &self,
        key: &str,
        min: i64,
        max: i64,
        ttl: Duration,
    ) -> Option<Vec<String>>;

    async fn remove(&self, key: &str);

    fn stats(&self) -> TimelineStoreStats;
}

/// Statistics for cache monitoring
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimelineStoreStats {
    pub hits: u64,
    pub misses: u64,
    pub keys: usize,
    pub expired: u64,
}

// ============================================================================
// In-memory implementation
// ============================================================================

struct SortedEntry {
    members: BTreeMap<i64, String>,
    expires_at: Instant,
}

impl SortedEntry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    fn touch(&mut self, ttl: Duration) {
        self.expires_at = Instant::now() + ttl;
    }
}

/// Process-local sorted-set store with lazy expiry plus a periodic purge.
pub struct MemoryTimelineStore {
    entries: RwLock<HashMap<String, SortedEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
    shutdown: AtomicBool,
}

impl Default for MemoryTimelineStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTimelineStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expired: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Drop every expired key. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired());
        let removed = before - entries.len();
        self.expired.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Spawn a task purging expired keys every `interval`.
    pub fn start_purge_task(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if store.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                let removed = store.purge_expired();
                if removed > 0 {
                    debug!(removed, "Purged expired timelines");
                }
            }
        })
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl TimelineStore for MemoryTimelineStore {
    async fn add(
        &self,
        key: &str,
        members: Vec<(i64, String)>,
        ttl: Duration,
        mode: AddMode,
    ) -> bool {
        if members.is_empty() {
            return false;
        }

        let mut entries = self.entries.write();
        let live = entries.get(key).is_some_and(|e| !e.is_expired());

        if !live {
            if mode == AddMode::ExistingOnly {
                return false;
            }
            entries.insert(
                key.to_string(),
                SortedEntry {
                    members: BTreeMap::new(),
                    expires_at: Instant::now() + ttl,
                },
            );
        }

        match entries.get_mut(key) {
            Some(entry) => {
                entry.members.extend(members);
                entry.touch(ttl);
                true
            }
            None => false,
        }
    }

    async fn range_by_score(
        &self,
        key: &str,
        min: i64,
        max: i64,
        ttl: Duration,
    ) -> Option<Vec<String>> {
        let mut entries = self.entries.write();

        match entries.get_mut(key) {
            Some(entry) if !entry.is_expired() => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                entry.touch(ttl);
                if min > max {
                    return Some(Vec::new());
                }
                Some(entry.members.range(min..=max).map(|(_, v)| v.clone()).collect())
            }
            Some(_) => {
                entries.remove(key);
                self.expired.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    async fn remove(&self, key: &str) {
        self.entries.write().remove(key);
    }

    fn stats(&self) -> TimelineStoreStats {
        TimelineStoreStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            keys: self.entries.read().len(),
            expired: self.expired.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_range_returns_sorted_members() {
        let store = MemoryTimelineStore::new();
        store
            .add(
                "k",
                vec![(3, "c".into()), (1, "a".into()), (2, "b".into())],
                TTL,
                AddMode::Create,
            )
            .await;

        let all = store.range_by_score("k", 1, i64::MAX, TTL).await.unwrap();
        assert_eq!(all, vec!["a", "b", "c"]);

        let tail = store.range_by_score("k", 3, i64::MAX, TTL).await.unwrap();
        assert_eq!(tail, vec!["c"]);
    }

    #[tokio::test]
    async fn test_same_score_replaces_member() {
        let store = MemoryTimelineStore::new();
        store.add("k", vec![(1, "old".into())], TTL, AddMode::Create).await;
        store.add("k", vec![(1, "new".into())], TTL, AddMode::Create).await;

        let all = store.range_by_score("k", 0, i64::MAX, TTL).await.unwrap();
        assert_eq!(all, vec!["new"]);
    }

    #[tokio::test]
    async fn test_existing_only_skips_cold_key() {
        let store = MemoryTimelineStore::new();
        let written = store
            .add("k", vec![(4, "d".into())], TTL, AddMode::ExistingOnly)
            .await;
        assert!(!written);
        assert!(store.range_by_score("k", 0, i64::MAX, TTL).await.is_none());
    }

    #[tokio::test]
    async fn test_expired_key_is_a_miss() {
        let store = MemoryTimelineStore::new();
        store
            .add("k", vec![(1, "a".into())], Duration::from_millis(10), AddMode::Create)
            .await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(store.range_by_score("k", 0, i64::MAX, TTL).await.is_none());
        let stats = store.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.expired, 1);
    }

    #[tokio::test]
    async fn test_purge_removes_only_expired() {
        let store = MemoryTimelineStore::new();
        store
            .add("short", vec![(1, "a".into())], Duration::from_millis(5), AddMode::Create)
            .await;
        store.add("long", vec![(1, "a".into())], TTL, AddMode::Create).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.stats().keys, 1);
    }
}
