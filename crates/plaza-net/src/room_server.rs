//! Room relay server.
//!
//! Accepts transport clients, groups them into rooms, and relays movement
//! and chat between members of the same room. The server keeps only the
//! last reported state of each member, which it hands to new joiners as a
//! [`RoomSnapshot`]. It does not persist anything.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::{RwLock, mpsc, watch};

use crate::clock::unix_millis;
use crate::framing::{FrameConfig, FrameError, read_message, write_message};
use crate::messages::{
    ChatBroadcast, JoinRoom, Left, Message, MoveIntent, Moved, Pong, RoomSnapshot, SayIntent,
    SnapshotEntry,
};

/// Unique identifier for a TCP connection within a server session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

/// Atomic generator for monotonically increasing [`ConnectionId`]s.
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    /// Create a new generator starting at 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Return the next unique [`ConnectionId`].
    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for [`RoomServer`].
#[derive(Debug, Clone)]
pub struct RoomServerConfig {
    /// Address to bind to. Default: `0.0.0.0:7878`.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections. Default: 256.
    pub max_connections: usize,
    /// Frame size limits.
    pub frame: FrameConfig,
    /// Messages buffered per connection before new ones are dropped.
    pub outbox_capacity: usize,
}

impl Default for RoomServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 7878)),
            max_connections: 256,
            frame: FrameConfig::default(),
            outbox_capacity: 256,
        }
    }
}

struct Member {
    entry: SnapshotEntry,
    outbox: mpsc::Sender<Message>,
}

impl Member {
    fn deliver(&self, msg: Message) {
        if let Err(e) = self.outbox.try_send(msg) {
            tracing::warn!(participant = %self.entry.id, "Dropping outbound message: {e}");
        }
    }
}

/// Membership of every room, keyed by room id then connection.
#[derive(Default)]
pub struct RoomTable {
    rooms: RwLock<HashMap<String, HashMap<ConnectionId, Member>>>,
}

impl RoomTable {
    /// Add `conn` to the requested room. The joiner receives a snapshot of
    /// everyone else; everyone else receives a `Joined` announcement.
    ///
    /// A previous connection claiming the same participant id is replaced
    /// silently, which happens when a client reconnects before the server
    /// noticed the old socket died.
    async fn join(&self, conn: ConnectionId, join: JoinRoom, outbox: mpsc::Sender<Message>) {
        let entry = SnapshotEntry {
            id: join.participant.id,
            display_name: join.participant.display_name,
            position: join.participant.position,
            direction: join.participant.direction,
            appearance_ref: join.participant.appearance_ref,
            timestamp: join.timestamp,
        };

        let mut rooms = self.rooms.write().await;
        let room = rooms.entry(join.room_id.clone()).or_default();
        room.retain(|other, m| *other == conn || m.entry.id != entry.id);

        let snapshot = RoomSnapshot {
            room_id: join.room_id.clone(),
            participants: room
                .iter()
                .filter(|(other, _)| **other != conn)
                .map(|(_, m)| m.entry.clone())
                .collect(),
            issued_at: unix_millis(),
        };
        let member = Member { entry, outbox };
        member.deliver(Message::Snapshot(snapshot));

        for (_, other) in room.iter().filter(|(other, _)| **other != conn) {
            other.deliver(Message::Joined(member.entry.clone()));
        }
        tracing::info!(room = %join.room_id, participant = %member.entry.id, "Joined room");
        room.insert(conn, member);
    }

    /// Remove `conn` from `room_id` and announce the departure.
    async fn leave(&self, room_id: &str, conn: ConnectionId) {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get_mut(room_id) else {
            return;
        };
        let Some(member) = room.remove(&conn) else {
            return;
        };
        for other in room.values() {
            other.deliver(Message::Left(Left {
                id: member.entry.id.clone(),
            }));
        }
        tracing::info!(room = %room_id, participant = %member.entry.id, "Left room");
        if room.is_empty() {
            rooms.remove(room_id);
        }
    }

    /// Record a member's movement and relay it to the rest of the room.
    async fn relay_move(&self, room_id: &str, conn: ConnectionId, intent: MoveIntent) {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get_mut(room_id) else {
            return;
        };
        let Some(member) = room.get_mut(&conn) else {
            return;
        };
        member.entry.position = intent.position;
        member.entry.direction = intent.direction;
        member.entry.timestamp = intent.timestamp;

        let moved = Moved::from_intent(member.entry.id.clone(), &intent);
        for (_, other) in room.iter().filter(|(other, _)| **other != conn) {
            other.deliver(Message::Moved(moved.clone()));
        }
    }

    /// Relay a member's chat message to the rest of the room.
    async fn relay_chat(&self, room_id: &str, conn: ConnectionId, say: SayIntent) {
        let rooms = self.rooms.read().await;
        let Some(room) = rooms.get(room_id) else {
            return;
        };
        let Some(member) = room.get(&conn) else {
            return;
        };
        let chat = ChatBroadcast {
            id: member.entry.id.clone(),
            text: say.text,
            timestamp: say.timestamp,
        };
        for (_, other) in room.iter().filter(|(other, _)| **other != conn) {
            other.deliver(Message::Chat(chat.clone()));
        }
    }

    /// Number of members in `room_id`.
    pub async fn member_count(&self, room_id: &str) -> usize {
        self.rooms.read().await.get(room_id).map_or(0, HashMap::len)
    }
}

/// Room relay server that accepts connections and manages their lifecycle.
pub struct RoomServer {
    config: RoomServerConfig,
    /// Room membership (public for test inspection).
    pub rooms: Arc<RoomTable>,
    connections: Arc<AtomicU64>,
    id_gen: Arc<IdGenerator>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl RoomServer {
    /// Create a new server with the given configuration.
    pub fn new(config: RoomServerConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            config,
            rooms: Arc::new(RoomTable::default()),
            connections: Arc::new(AtomicU64::new(0)),
            id_gen: Arc::new(IdGenerator::new()),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Bind to the configured address and run the accept loop.
    pub async fn run(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!("Room server listening on {}", self.config.bind_addr);
        self.run_with_listener(listener).await
    }

    /// Run the accept loop with a pre-bound listener (useful for tests).
    pub async fn run_with_listener(&self, listener: TcpListener) -> std::io::Result<()> {
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    let (stream, peer_addr) = result?;
                    stream.set_nodelay(true)?;

                    let active = self.connections.load(Ordering::Relaxed);
                    if active >= self.config.max_connections as u64 {
                        tracing::warn!("Connection limit reached, rejecting {peer_addr}");
                        continue;
                    }
                    self.connections.fetch_add(1, Ordering::Relaxed);

                    let id = self.id_gen.next_id();
                    tracing::info!("Accepted connection {id:?} from {peer_addr}");

                    let rooms = Arc::clone(&self.rooms);
                    let connections = Arc::clone(&self.connections);
                    let config = self.config.clone();
                    let mut task_shutdown = self.shutdown_rx.clone();

                    tokio::spawn(async move {
                        Self::handle_connection(id, stream, &rooms, &config, &mut task_shutdown).await;
                        connections.fetch_sub(1, Ordering::Relaxed);
                        tracing::info!("Connection {id:?} closed");
                    });
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!("Room server shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Signal the server to shut down gracefully.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }

    /// Per-connection loop: decode client messages and apply them to the
    /// room table. Outbound traffic goes through a writer task fed by the
    /// connection's outbox.
    async fn handle_connection(
        id: ConnectionId,
        stream: TcpStream,
        rooms: &RoomTable,
        config: &RoomServerConfig,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) {
        let (mut reader, mut writer) = stream.into_split();
        let (outbox, mut outbox_rx) = mpsc::channel::<Message>(config.outbox_capacity.max(1));

        let frame = config.frame.clone();
        let writer_task = tokio::spawn(async move {
            while let Some(msg) = outbox_rx.recv().await {
                if let Err(e) = write_message(&mut writer, &msg, &frame).await {
                    tracing::debug!("Connection {id:?} write failed: {e}");
                    break;
                }
            }
        });

        let mut room_id: Option<String> = None;
        loop {
            tokio::select! {
                result = read_message(&mut reader, &config.frame) => {
                    match result {
                        Ok(Message::Join(join)) => {
                            if let Some(previous) = room_id.take() {
                                rooms.leave(&previous, id).await;
                            }
                            room_id = Some(join.room_id.clone());
                            rooms.join(id, join, outbox.clone()).await;
                        }
                        Ok(Message::Leave) => {
                            if let Some(previous) = room_id.take() {
                                rooms.leave(&previous, id).await;
                            }
                        }
                        Ok(Message::Move(intent)) => {
                            if let Some(room) = &room_id {
                                rooms.relay_move(room, id, intent).await;
                            }
                        }
                        Ok(Message::Say(say)) => {
                            if let Some(room) = &room_id {
                                rooms.relay_chat(room, id, say).await;
                            }
                        }
                        Ok(Message::Ping(ping)) => {
                            let pong = Message::Pong(Pong {
                                timestamp_ms: ping.timestamp_ms,
                                sequence: ping.sequence,
                            });
                            let _ = outbox.try_send(pong);
                        }
                        Ok(Message::Pong(_)) => {}
                        Ok(other) => {
                            tracing::debug!(?other, "Connection {id:?} sent a server-only message");
                        }
                        Err(FrameError::Message(e)) => {
                            tracing::debug!("Connection {id:?} sent an undecodable frame: {e}");
                        }
                        Err(FrameError::ConnectionClosed) => break,
                        Err(e) => {
                            tracing::debug!("Connection {id:?} read failed: {e}");
                            break;
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        if let Some(room) = room_id {
            rooms.leave(&room, id).await;
        }
        writer_task.abort();
    }
}
