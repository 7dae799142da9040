//! Fire-and-forget writes.
//!
//! The presence tick must never wait on the store. [`StoreWriter`] owns a
//! background task that performs inserts in order; the tick only enqueues.
//! A failed insert is logged and dropped. The next heartbeat or movement
//! row supersedes it anyway.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::client::PersistenceClient;
use crate::error::StoreError;
use crate::rows::{ChatRow, PositionRow, StoredEvent};

/// Handle to the background write task.
pub struct StoreWriter {
    tx: mpsc::UnboundedSender<StoredEvent>,
    task: JoinHandle<WriterStats>,
}

/// Outcome counts reported when the writer closes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WriterStats {
    pub written: u64,
    pub failed: u64,
}

impl StoreWriter {
    /// Spawn the write task. Must be called inside a tokio runtime.
    pub fn spawn(store: Arc<dyn PersistenceClient>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<StoredEvent>();
        let task = tokio::spawn(async move {
            let mut stats = WriterStats::default();
            while let Some(event) = rx.recv().await {
                let kind = match &event {
                    StoredEvent::Position(_) => "position",
                    StoredEvent::Chat(_) => "chat",
                };
                let result = match event {
                    StoredEvent::Position(row) => store.insert_position(row).await,
                    StoredEvent::Chat(row) => store.insert_chat(row).await,
                };
                match result {
                    Ok(()) => stats.written += 1,
                    Err(e) => {
                        stats.failed += 1;
                        tracing::warn!(kind, "Persistence write failed: {e}");
                    }
                }
            }
            stats
        });
        Self { tx, task }
    }

    /// Queue a position row.
    pub fn write_position(&self, row: PositionRow) -> Result<(), StoreError> {
        self.tx
            .send(StoredEvent::Position(row))
            .map_err(|_| StoreError::Closed)
    }

    /// Queue a chat row.
    pub fn write_chat(&self, row: ChatRow) -> Result<(), StoreError> {
        self.tx
            .send(StoredEvent::Chat(row))
            .map_err(|_| StoreError::Closed)
    }

    /// Stop accepting rows, finish the queued ones, and report counts.
    pub async fn close(self) -> WriterStats {
        drop(self.tx);
        match self.task.await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::warn!("Store writer task ended abnormally: {e}");
                WriterStats::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use async_trait::async_trait;
    use std::time::Duration;

    fn position(id: &str, timestamp: u64) -> PositionRow {
        PositionRow {
            participant_id: id.to_string(),
            x: 0.0,
            y: 0.0,
            z: 0.0,
            source_x: 0.0,
            source_y: 0.0,
            source_z: 0.0,
            direction: 0.0,
            appearance_ref: String::new(),
            display_name: id.to_string(),
            timestamp,
        }
    }

    /// Store whose writes always fail.
    struct BrokenStore;

    #[async_trait]
    impl PersistenceClient for BrokenStore {
        async fn insert_position(&self, _row: PositionRow) -> Result<(), StoreError> {
            Err(StoreError::Io(std::io::Error::other("disk gone")))
        }

        async fn insert_chat(&self, _row: ChatRow) -> Result<(), StoreError> {
            Err(StoreError::Io(std::io::Error::other("disk gone")))
        }

        async fn query_latest_per_participant(
            &self,
            _window: Duration,
            _now_ms: u64,
        ) -> Result<Vec<PositionRow>, StoreError> {
            Ok(Vec::new())
        }

        fn subscribe(&self, exclude_id: Option<String>) -> crate::Subscription {
            MemoryStore::new().subscribe(exclude_id)
        }
    }

    #[tokio::test]
    async fn test_queued_rows_are_written_in_order() {
        let store = Arc::new(MemoryStore::new());
        let writer = StoreWriter::spawn(store.clone());

        writer.write_position(position("a", 1)).unwrap();
        writer.write_position(position("a", 2)).unwrap();
        let stats = writer.close().await;

        assert_eq!(stats.written, 2);
        let rows = store
            .query_latest_per_participant(Duration::from_secs(60), 10)
            .await
            .unwrap();
        assert_eq!(rows[0].timestamp, 2);
    }

    #[tokio::test]
    async fn test_failures_are_counted_not_fatal() {
        let writer = StoreWriter::spawn(Arc::new(BrokenStore));
        writer.write_position(position("a", 1)).unwrap();
        writer.write_position(position("a", 2)).unwrap();

        let stats = writer.close().await;
        assert_eq!(
            stats,
            WriterStats {
                written: 0,
                failed: 2
            }
        );
    }
}
