//! In-process store.
//!
//! Keeps the latest position and chat row per participant; older rows are
//! superseded rather than retained. Used directly in tests and demos, and
//! as the index behind [`JournalStore`](crate::JournalStore).

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::client::{PersistenceClient, Subscription};
use crate::error::StoreError;
use crate::rows::{ChatRow, PositionRow, StoredEvent};

/// Default capacity of the subscription channel.
pub const DEFAULT_FEED_CAPACITY: usize = 1024;

#[derive(Default)]
struct Tables {
    positions: BTreeMap<String, PositionRow>,
    chats: BTreeMap<String, ChatRow>,
    rows_written: u64,
}

/// Store that lives only as long as the process.
pub struct MemoryStore {
    tables: RwLock<Tables>,
    feed: broadcast::Sender<StoredEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Empty store with the default feed capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_FEED_CAPACITY)
    }

    /// Empty store whose subscribers may fall `capacity` rows behind
    /// before they start losing rows.
    pub fn with_capacity(capacity: usize) -> Self {
        let (feed, _) = broadcast::channel(capacity.max(1));
        Self {
            tables: RwLock::new(Tables::default()),
            feed,
        }
    }

    /// Index a row without notifying subscribers. Used for journal replay.
    pub(crate) fn index(&self, event: &StoredEvent) {
        let mut tables = self.tables.write();
        tables.rows_written += 1;
        match event {
            StoredEvent::Position(row) => {
                let newer = tables
                    .positions
                    .get(&row.participant_id)
                    .is_none_or(|existing| existing.timestamp <= row.timestamp);
                if newer {
                    tables.positions.insert(row.participant_id.clone(), row.clone());
                }
            }
            StoredEvent::Chat(row) => {
                let newer = tables
                    .chats
                    .get(&row.participant_id)
                    .is_none_or(|existing| existing.timestamp <= row.timestamp);
                if newer {
                    tables.chats.insert(row.participant_id.clone(), row.clone());
                }
            }
        }
    }

    /// Index a row and notify subscribers.
    pub(crate) fn publish(&self, event: StoredEvent) {
        self.index(&event);
        // No subscribers is fine.
        let _ = self.feed.send(event);
    }

    /// Total rows accepted since creation, including superseded ones.
    pub fn rows_written(&self) -> u64 {
        self.tables.read().rows_written
    }

    /// Latest chat row of `participant_id`, if any.
    pub fn latest_chat(&self, participant_id: &str) -> Option<ChatRow> {
        self.tables.read().chats.get(participant_id).cloned()
    }

    pub(crate) fn latest_positions(&self, window: Duration, now_ms: u64) -> Vec<PositionRow> {
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        let cutoff = now_ms.saturating_sub(window_ms);
        self.tables
            .read()
            .positions
            .values()
            .filter(|row| row.timestamp >= cutoff)
            .cloned()
            .collect()
    }

    pub(crate) fn feed(&self) -> broadcast::Receiver<StoredEvent> {
        self.feed.subscribe()
    }
}

#[async_trait]
impl PersistenceClient for MemoryStore {
    async fn insert_position(&self, row: PositionRow) -> Result<(), StoreError> {
        self.publish(StoredEvent::Position(row));
        Ok(())
    }

    async fn insert_chat(&self, row: ChatRow) -> Result<(), StoreError> {
        self.publish(StoredEvent::Chat(row));
        Ok(())
    }

    async fn query_latest_per_participant(
        &self,
        window: Duration,
        now_ms: u64,
    ) -> Result<Vec<PositionRow>, StoreError> {
        Ok(self.latest_positions(window, now_ms))
    }

    fn subscribe(&self, exclude_id: Option<String>) -> Subscription {
        Subscription::new(self.feed(), exclude_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(id: &str, x: f32, timestamp: u64) -> PositionRow {
        PositionRow {
            participant_id: id.to_string(),
            x,
            y: 0.0,
            z: 0.0,
            source_x: x,
            source_y: 0.0,
            source_z: 0.0,
            direction: 0.0,
            appearance_ref: String::new(),
            display_name: id.to_string(),
            timestamp,
        }
    }

    fn chat(id: &str, message: &str, timestamp: u64) -> ChatRow {
        ChatRow {
            participant_id: id.to_string(),
            message: message.to_string(),
            x: 0.0,
            y: 0.0,
            z: 0.0,
            display_name: id.to_string(),
            timestamp,
        }
    }

    #[tokio::test]
    async fn test_query_returns_latest_row_per_participant() {
        let store = MemoryStore::new();
        store.insert_position(position("a", 1.0, 1_000)).await.unwrap();
        store.insert_position(position("a", 2.0, 2_000)).await.unwrap();
        store.insert_position(position("b", 9.0, 1_500)).await.unwrap();

        let rows = store
            .query_latest_per_participant(Duration::from_secs(60), 3_000)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].participant_id, "a");
        assert_eq!(rows[0].x, 2.0);
        assert_eq!(rows[1].participant_id, "b");
        assert_eq!(store.rows_written(), 3);
    }

    #[tokio::test]
    async fn test_out_of_order_insert_does_not_supersede() {
        let store = MemoryStore::new();
        store.insert_position(position("a", 2.0, 2_000)).await.unwrap();
        store.insert_position(position("a", 1.0, 1_000)).await.unwrap();

        let rows = store
            .query_latest_per_participant(Duration::from_secs(60), 3_000)
            .await
            .unwrap();
        assert_eq!(rows[0].x, 2.0);
    }

    #[tokio::test]
    async fn test_query_respects_recency_window() {
        let store = MemoryStore::new();
        store.insert_position(position("old", 0.0, 1_000)).await.unwrap();
        store.insert_position(position("new", 0.0, 290_000)).await.unwrap();

        let rows = store
            .query_latest_per_participant(Duration::from_secs(300), 302_000)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].participant_id, "new");
    }

    #[tokio::test]
    async fn test_subscription_excludes_own_rows() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe(Some("me".to_string()));

        store.insert_position(position("me", 0.0, 1)).await.unwrap();
        store.insert_chat(chat("other", "hey", 2)).await.unwrap();

        let event = sub.recv().await.unwrap();
        assert_eq!(event.participant_id(), "other");
        assert!(matches!(event, StoredEvent::Chat(_)));
    }

    #[tokio::test]
    async fn test_subscription_survives_lag() {
        let store = MemoryStore::with_capacity(2);
        let mut sub = store.subscribe(None);
        for t in 0..5 {
            store.insert_position(position("a", t as f32, t)).await.unwrap();
        }
        // The oldest rows were overwritten; the next receive skips ahead.
        let event = sub.recv().await.unwrap();
        assert!(event.timestamp() >= 3);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe(None);
        sub.unsubscribe();
        assert!(!sub.is_active());

        store.insert_position(position("a", 0.0, 1)).await.unwrap();
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_latest_chat_kept() {
        let store = MemoryStore::new();
        store.insert_chat(chat("a", "first", 1)).await.unwrap();
        store.insert_chat(chat("a", "second", 2)).await.unwrap();
        assert_eq!(store.latest_chat("a").unwrap().message, "second");
        assert!(store.latest_chat("b").is_none());
    }
}
