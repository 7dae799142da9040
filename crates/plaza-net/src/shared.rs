//! Reference-counted ownership of the room connection.
//!
//! Several consumers in one process (the presence session, a chat panel, a
//! diagnostics view) may need the same [`TransportClient`]. The
//! [`ConnectionManager`] creates it on the first [`acquire`] and shuts it
//! down when the last [`TransportLease`] is released. Room membership
//! belongs to the connection, so only that last release leaves the room.
//!
//! [`acquire`]: ConnectionManager::acquire

use std::ops::Deref;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::transport::{TransportClient, TransportConfig};

#[derive(Default)]
struct Shared {
    client: Option<Arc<TransportClient>>,
    leases: usize,
}

/// Owner of the shared transport connection.
pub struct ConnectionManager {
    config: TransportConfig,
    shared: Mutex<Shared>,
}

impl ConnectionManager {
    /// Create a manager; no connection is opened until the first
    /// [`acquire`](Self::acquire).
    pub fn new(config: TransportConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            shared: Mutex::new(Shared::default()),
        })
    }

    /// Take a lease on the connection, spawning it if this is the first
    /// lease. Must be called inside a tokio runtime.
    pub fn acquire(self: &Arc<Self>) -> TransportLease {
        let mut shared = self.shared.lock();
        let client = match &shared.client {
            Some(client) => Arc::clone(client),
            None => {
                tracing::info!(addr = %self.config.server_addr, "Opening shared connection");
                let client = Arc::new(TransportClient::spawn(self.config.clone()));
                shared.client = Some(Arc::clone(&client));
                client
            }
        };
        shared.leases += 1;

        TransportLease {
            manager: Arc::clone(self),
            client,
            released: false,
        }
    }

    /// Number of outstanding leases.
    pub fn lease_count(&self) -> usize {
        self.shared.lock().leases
    }

    /// `true` while a connection exists.
    pub fn is_open(&self) -> bool {
        self.shared.lock().client.is_some()
    }

    fn release_one(&self) {
        let mut shared = self.shared.lock();
        shared.leases = shared.leases.saturating_sub(1);
        if shared.leases == 0
            && let Some(client) = shared.client.take()
        {
            tracing::info!("Last lease released, closing shared connection");
            if let Err(e) = client.leave() {
                tracing::debug!("Leave not sent: {e}");
            }
            client.shutdown();
        }
    }
}

/// A counted handle to the shared [`TransportClient`].
///
/// Dereferences to the client. Dropping the lease releases it.
pub struct TransportLease {
    manager: Arc<ConnectionManager>,
    client: Arc<TransportClient>,
    released: bool,
}

impl TransportLease {
    /// Release the lease now instead of at drop.
    pub fn release(mut self) {
        self.release_inner();
    }

    /// The leased client.
    pub fn client(&self) -> &Arc<TransportClient> {
        &self.client
    }

    fn release_inner(&mut self) {
        if !self.released {
            self.released = true;
            self.manager.release_one();
        }
    }
}

impl Deref for TransportLease {
    type Target = TransportClient;

    fn deref(&self) -> &TransportClient {
        &self.client
    }
}

impl Drop for TransportLease {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{ParticipantDescriptor, WirePosition};
    use crate::reconnection::ReconnectConfig;
    use crate::room_server::{RoomServer, RoomServerConfig};
    use crate::transport::{ConnectionState, TransportEvent};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::sync::broadcast;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    fn manager() -> Arc<ConnectionManager> {
        // Nothing listens on port 1; the client just keeps retrying.
        ConnectionManager::new(TransportConfig {
            server_addr: "127.0.0.1:1".to_string(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_first_acquire_opens_connection() {
        let manager = manager();
        assert!(!manager.is_open());

        let lease = manager.acquire();
        assert!(manager.is_open());
        assert_eq!(manager.lease_count(), 1);
        assert_ne!(lease.state().current(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_leases_share_one_client() {
        let manager = manager();
        let a = manager.acquire();
        let b = manager.acquire();
        assert!(Arc::ptr_eq(a.client(), b.client()));
        assert_eq!(manager.lease_count(), 2);
    }

    #[tokio::test]
    async fn test_connection_closed_only_at_zero() {
        let manager = manager();
        let a = manager.acquire();
        let b = manager.acquire();
        let client = Arc::clone(a.client());

        a.release();
        assert!(manager.is_open());
        assert_eq!(manager.lease_count(), 1);

        drop(b);
        assert!(!manager.is_open());
        assert_eq!(client.state().current(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_reacquire_after_close_opens_fresh_client() {
        let manager = manager();
        let first = manager.acquire();
        let old = Arc::clone(first.client());
        first.release();

        let second = manager.acquire();
        assert!(!Arc::ptr_eq(&old, second.client()));
    }

    fn descriptor(id: &str) -> ParticipantDescriptor {
        ParticipantDescriptor {
            id: id.to_string(),
            display_name: id.to_uppercase(),
            position: WirePosition::default(),
            direction: 0.0,
            appearance_ref: String::new(),
        }
    }

    async fn next(rx: &mut broadcast::Receiver<TransportEvent>) -> TransportEvent {
        timeout(WAIT, rx.recv()).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_room_membership_survives_until_last_lease() {
        let server = Arc::new(RoomServer::new(RoomServerConfig::default()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let srv = Arc::clone(&server);
        tokio::spawn(async move { srv.run_with_listener(listener).await });

        let config = TransportConfig {
            server_addr: addr,
            reconnect: ReconnectConfig {
                initial_delay: Duration::from_millis(20),
                jitter: 0.0,
                ..Default::default()
            },
            ..Default::default()
        };
        let manager = ConnectionManager::new(config.clone());
        let session = manager.acquire();
        let panel = manager.acquire();
        let mut events = session.subscribe();
        session.join("lobby", descriptor("alice"), 1_000).unwrap();
        assert!(matches!(next(&mut events).await, TransportEvent::Snapshot(_)));

        let observer = TransportClient::spawn(config);
        let mut seen = observer.subscribe();
        observer.join("lobby", descriptor("olly"), 1_000).unwrap();
        assert!(matches!(next(&mut seen).await, TransportEvent::Snapshot(_)));

        panel.release();
        assert_eq!(manager.lease_count(), 1);

        // Chat is only relayed for members, so this arriving proves alice
        // is still in the room.
        session.send_chat("still here", 2_000).unwrap();
        let TransportEvent::Chat(chat) = next(&mut seen).await else {
            panic!("expected chat from the remaining lease");
        };
        assert_eq!(chat.id, "alice");
        assert_eq!(server.rooms.member_count("lobby").await, 2);

        session.release();
        assert!(!manager.is_open());
        assert_eq!(next(&mut seen).await, TransportEvent::Left("alice".to_string()));
        observer.shutdown();
    }
}
