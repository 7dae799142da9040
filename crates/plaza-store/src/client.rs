//! The persistence contract and its change subscription.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::error::StoreError;
use crate::rows::{ChatRow, PositionRow, StoredEvent};

/// Durable append-only store for presence rows.
///
/// Serves three purposes: cold-start bootstrap through
/// [`query_latest_per_participant`](Self::query_latest_per_participant),
/// fallback delivery through [`subscribe`](Self::subscribe), and a sink for
/// the local participant's heartbeat rows.
#[async_trait]
pub trait PersistenceClient: Send + Sync {
    /// Append a movement row and notify subscribers.
    async fn insert_position(&self, row: PositionRow) -> Result<(), StoreError>;

    /// Append a chat row and notify subscribers.
    async fn insert_chat(&self, row: ChatRow) -> Result<(), StoreError>;

    /// Most recent position row per participant written within `window`
    /// before `now_ms`, ordered by participant id.
    async fn query_latest_per_participant(
        &self,
        window: Duration,
        now_ms: u64,
    ) -> Result<Vec<PositionRow>, StoreError>;

    /// Subscribe to rows inserted from now on, skipping those whose
    /// participant id equals `exclude_id`.
    fn subscribe(&self, exclude_id: Option<String>) -> Subscription;
}

/// Live feed of inserted rows.
///
/// Dropping the subscription or calling [`unsubscribe`](Self::unsubscribe)
/// stops delivery.
pub struct Subscription {
    rx: Option<broadcast::Receiver<StoredEvent>>,
    exclude_id: Option<String>,
}

impl Subscription {
    pub(crate) fn new(rx: broadcast::Receiver<StoredEvent>, exclude_id: Option<String>) -> Self {
        Self {
            rx: Some(rx),
            exclude_id,
        }
    }

    /// Wait for the next row that is not from the excluded participant.
    ///
    /// Returns `None` once unsubscribed or when the store is gone. Rows
    /// missed because this subscriber fell behind are skipped with a
    /// warning.
    pub async fn recv(&mut self) -> Option<StoredEvent> {
        loop {
            let rx = self.rx.as_mut()?;
            match rx.recv().await {
                Ok(event) => {
                    if self.exclude_id.as_deref() == Some(event.participant_id()) {
                        continue;
                    }
                    return Some(event);
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Persistence subscriber lagged, rows dropped");
                }
                Err(RecvError::Closed) => {
                    self.rx = None;
                    return None;
                }
            }
        }
    }

    /// Stop receiving rows.
    pub fn unsubscribe(&mut self) {
        if self.rx.take().is_some() {
            tracing::debug!("Persistence subscription cancelled");
        }
    }

    /// `true` while rows can still arrive.
    pub fn is_active(&self) -> bool {
        self.rx.is_some()
    }
}
