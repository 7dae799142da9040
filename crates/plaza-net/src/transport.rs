//! Room transport client.
//!
//! Manages the full connection lifecycle: connecting, joining a room,
//! heartbeat keepalive, reconnection with backoff and clean shutdown.
//! Connection state changes are published through a [`watch`] channel and
//! room events are fanned out through a [`broadcast`] channel so any number
//! of consumers can react without polling.
//!
//! All socket I/O happens on one background task. The public handle only
//! queues commands, so every method is synchronous and cheap.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::clock::unix_millis;
use crate::framing::{FrameConfig, FrameError, read_message, write_message};
use crate::messages::{
    ChatBroadcast, JoinRoom, Message, MoveIntent, Moved, ParticipantDescriptor, Ping, Pong,
    RoomSnapshot, SayIntent, SnapshotEntry,
};
use crate::reconnection::{ReconnectConfig, ReconnectError, ReconnectState};
use crate::throttle::{MovementThrottle, ThrottleConfig};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Attempting to establish a TCP connection.
    Connecting,
    /// TCP connection established, ready for communication.
    Connected,
    /// Connection lost or intentionally closed.
    Disconnected,
}

/// Observable connection state backed by a [`watch`] channel.
///
/// Multiple subscribers can observe state transitions without polling.
pub struct ConnectionStateWatch {
    tx: watch::Sender<ConnectionState>,
    rx: watch::Receiver<ConnectionState>,
}

impl Default for ConnectionStateWatch {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateWatch {
    /// Create a new watch initialized to [`ConnectionState::Disconnected`].
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(ConnectionState::Disconnected);
        Self { tx, rx }
    }

    /// Set the current connection state, notifying all subscribers.
    pub fn set(&self, state: ConnectionState) {
        let _ = self.tx.send(state);
    }

    /// Return a new subscriber receiver.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.rx.clone()
    }

    /// Return the current state without blocking.
    pub fn current(&self) -> ConnectionState {
        *self.rx.borrow()
    }
}

/// Transport client settings.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Server address as `host:port`.
    pub server_addr: String,
    /// Frame size limits.
    pub frame: FrameConfig,
    /// Backoff used after a lost or failed connection.
    pub reconnect: ReconnectConfig,
    /// Outbound movement throttle.
    pub throttle: ThrottleConfig,
    /// How often a keepalive ping is sent.
    pub ping_interval: Duration,
    /// Connection is considered lost after this long without inbound traffic.
    pub inbound_timeout: Duration,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:7878".to_string(),
            frame: FrameConfig::default(),
            reconnect: ReconnectConfig::default(),
            throttle: ThrottleConfig::default(),
            ping_interval: Duration::from_secs(5),
            inbound_timeout: Duration::from_secs(15),
            event_capacity: 1024,
        }
    }
}

/// Something that happened on the room connection.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// An established connection was lost.
    Disconnected,
    /// A connection was re-established and the stored join re-sent.
    Reconnected,
    /// Full room membership, sent by the server after each join.
    Snapshot(RoomSnapshot),
    /// Another participant joined the room.
    Joined(SnapshotEntry),
    /// A participant moved.
    Moved(Moved),
    /// A participant said something.
    Chat(ChatBroadcast),
    /// A participant left the room.
    Left(String),
}

/// Errors surfaced by the transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The background task is gone; nothing more can be sent.
    #[error("transport is shut down")]
    Closed,

    /// Reading or writing a frame failed.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// No inbound traffic for longer than the configured timeout.
    #[error("no inbound traffic for {0:?}")]
    HeartbeatTimeout(Duration),

    /// Reconnection gave up.
    #[error(transparent)]
    Reconnect(#[from] ReconnectError),
}

enum Command {
    Join(JoinRoom),
    Send(Message),
    /// Local movement that was not sent; only updates the stored join.
    Track(MoveIntent),
    Leave,
}

/// Why a connected session ended.
enum SessionEnd {
    Shutdown,
    Lost(TransportError),
}

/// Handle to the room connection.
///
/// Created via [`TransportClient::spawn`]. Owns the command queue into the
/// connection task, the event broadcaster, the connection state watch, and
/// a shutdown signal for the background task.
pub struct TransportClient {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<TransportEvent>,
    state: Arc<ConnectionStateWatch>,
    throttle: Arc<Mutex<MovementThrottle>>,
    /// Sending `true` causes the connection task to exit.
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TransportClient {
    /// Start the connection task. Must be called inside a tokio runtime.
    ///
    /// Returns immediately; the task connects in the background and keeps
    /// reconnecting until [`shutdown`](Self::shutdown) or drop.
    pub fn spawn(config: TransportConfig) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let state = Arc::new(ConnectionStateWatch::new());
        let throttle = Arc::new(Mutex::new(MovementThrottle::new(config.throttle.clone())));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(run_connection(
            config,
            command_rx,
            events.clone(),
            Arc::clone(&state),
            Arc::clone(&throttle),
            shutdown_rx,
        ));

        Self {
            commands,
            events,
            state,
            throttle,
            shutdown_tx,
            task: Mutex::new(Some(task)),
        }
    }

    /// Join `room_id` as `participant`, described as of local time
    /// `timestamp`. The join is remembered and re-sent after every
    /// reconnect, carrying the latest reported position.
    pub fn join(
        &self,
        room_id: impl Into<String>,
        participant: ParticipantDescriptor,
        timestamp: u64,
    ) -> Result<(), TransportError> {
        self.command(Command::Join(JoinRoom {
            room_id: room_id.into(),
            participant,
            timestamp,
        }))
    }

    /// Report local movement. Returns `false` if the report was suppressed
    /// by the throttle, the position is not finite, or the connection is
    /// down. Suppressed reports still update the join re-sent on reconnect.
    pub fn send_movement(&self, intent: MoveIntent) -> bool {
        if !intent.position.is_finite() {
            return false;
        }
        let admitted = self.state.current() == ConnectionState::Connected
            && self.throttle.lock().admit(
                intent.timestamp,
                intent.position,
                intent.direction,
                intent.moving,
            );
        let command = if admitted {
            Command::Send(Message::Move(intent))
        } else {
            Command::Track(intent)
        };
        self.command(command).is_ok() && admitted
    }

    /// Say `text` in the current room.
    pub fn send_chat(&self, text: impl Into<String>, timestamp: u64) -> Result<(), TransportError> {
        self.command(Command::Send(Message::Say(SayIntent {
            text: text.into(),
            timestamp,
        })))
    }

    /// Leave the current room and forget the stored join.
    pub fn leave(&self) -> Result<(), TransportError> {
        self.command(Command::Leave)
    }

    /// Subscribe to room events. Events emitted before this call are not
    /// replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    /// Return the connection state watch.
    pub fn state(&self) -> &Arc<ConnectionStateWatch> {
        &self.state
    }

    /// Stop the connection task.
    ///
    /// Signals the task to close the socket and transitions state to
    /// [`ConnectionState::Disconnected`] immediately. Commands already
    /// queued on a live connection are written before it closes.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        self.state.set(ConnectionState::Disconnected);
    }

    fn command(&self, command: Command) -> Result<(), TransportError> {
        self.commands.send(command).map_err(|_| TransportError::Closed)
    }
}

impl Drop for TransportClient {
    fn drop(&mut self) {
        // After an explicit shutdown the task is left to flush and exit.
        let graceful = *self.shutdown_tx.borrow();
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.lock().take()
            && !graceful
        {
            task.abort();
        }
    }
}

/// Connect, run a session, and reconnect with backoff until shutdown.
async fn run_connection(
    config: TransportConfig,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: broadcast::Sender<TransportEvent>,
    state: Arc<ConnectionStateWatch>,
    throttle: Arc<Mutex<MovementThrottle>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut reconnect = ReconnectState::new(config.reconnect.clone());
    let mut join: Option<JoinRoom> = None;
    let mut was_connected = false;

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        state.set(ConnectionState::Connecting);
        match TcpStream::connect(&config.server_addr).await {
            Ok(_) if *shutdown_rx.borrow() => break,
            Ok(stream) => {
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!("set_nodelay failed: {e}");
                }
                reconnect.reset();
                throttle.lock().reset();
                state.set(ConnectionState::Connected);
                tracing::info!(addr = %config.server_addr, "Connected to room server");

                let end = run_session(
                    stream,
                    &config,
                    &mut commands,
                    &events,
                    &mut join,
                    was_connected,
                    &mut shutdown_rx,
                )
                .await;
                was_connected = true;

                match end {
                    SessionEnd::Shutdown => break,
                    SessionEnd::Lost(err) => {
                        tracing::warn!("Connection lost: {err}");
                        state.set(ConnectionState::Disconnected);
                        let _ = events.send(TransportEvent::Disconnected);
                    }
                }
            }
            Err(e) => {
                tracing::debug!(addr = %config.server_addr, "Connect failed: {e}");
                state.set(ConnectionState::Disconnected);
            }
        }

        let Some(delay) = reconnect.next_delay() else {
            let err = TransportError::from(ReconnectError::MaxAttemptsExhausted(
                reconnect.attempts(),
            ));
            tracing::error!("{err}");
            break;
        };
        tracing::debug!(attempt = reconnect.attempts(), ?delay, "Reconnecting");

        if !wait_offline(delay, &mut commands, &mut join, &mut shutdown_rx).await {
            break;
        }
    }

    state.set(ConnectionState::Disconnected);
}

/// Sleep for `delay` while absorbing commands. Returns `false` if the task
/// should exit.
async fn wait_offline(
    delay: Duration,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    join: &mut Option<JoinRoom>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            cmd = commands.recv() => match cmd {
                Some(Command::Join(j)) => *join = Some(j),
                Some(Command::Leave) => *join = None,
                Some(Command::Track(intent) | Command::Send(Message::Move(intent))) => {
                    remember_move(join, &intent);
                }
                // Nothing to deliver to while offline.
                Some(Command::Send(_)) => {}
                None => return false,
            },
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    return false;
                }
            }
        }
    }
}

/// Drive one established connection until it is lost or shut down.
async fn run_session(
    stream: TcpStream,
    config: &TransportConfig,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    events: &broadcast::Sender<TransportEvent>,
    join: &mut Option<JoinRoom>,
    is_reconnect: bool,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let (reader, mut writer) = stream.into_split();

    // `read_message` is not cancel-safe, so reads live on their own task
    // and arrive here through a channel that `select!` can poll safely.
    let (inbound_tx, mut inbound_rx) = mpsc::channel(256);
    let reader_task = tokio::spawn(read_loop(reader, config.frame.clone(), inbound_tx));
    let _reader_guard = AbortOnDrop(reader_task);

    if let Some(j) = join.as_ref()
        && let Err(e) = write_message(&mut writer, &Message::Join(j.clone()), &config.frame).await
    {
        return SessionEnd::Lost(e.into());
    }
    if is_reconnect {
        let _ = events.send(TransportEvent::Reconnected);
    }

    let mut ping = tokio::time::interval_at(Instant::now() + config.ping_interval, config.ping_interval);
    let mut last_inbound = Instant::now();
    let mut sequence: u32 = 0;

    loop {
        tokio::select! {
            inbound = inbound_rx.recv() => {
                let Some(inbound) = inbound else {
                    return SessionEnd::Lost(FrameError::ConnectionClosed.into());
                };
                let msg = match inbound {
                    Ok(msg) => msg,
                    Err(e) => return SessionEnd::Lost(e.into()),
                };
                last_inbound = Instant::now();
                if let Some(reply) = dispatch_inbound(msg, events)
                    && let Err(e) = write_message(&mut writer, &reply, &config.frame).await
                {
                    return SessionEnd::Lost(e.into());
                }
            }
            cmd = commands.recv() => {
                let outbound = match cmd {
                    Some(Command::Join(j)) => {
                        let msg = Message::Join(j.clone());
                        *join = Some(j);
                        Some(msg)
                    }
                    Some(Command::Send(msg)) => {
                        if let Message::Move(intent) = &msg {
                            remember_move(join, intent);
                        }
                        Some(msg)
                    }
                    Some(Command::Track(intent)) => {
                        remember_move(join, &intent);
                        None
                    }
                    Some(Command::Leave) => {
                        *join = None;
                        Some(Message::Leave)
                    }
                    None => return SessionEnd::Shutdown,
                };
                if let Some(outbound) = outbound
                    && let Err(e) = write_message(&mut writer, &outbound, &config.frame).await
                {
                    return SessionEnd::Lost(e.into());
                }
            }
            _ = ping.tick() => {
                if last_inbound.elapsed() > config.inbound_timeout {
                    return SessionEnd::Lost(TransportError::HeartbeatTimeout(config.inbound_timeout));
                }
                sequence = sequence.wrapping_add(1);
                let msg = Message::Ping(Ping { timestamp_ms: unix_millis(), sequence });
                if let Err(e) = write_message(&mut writer, &msg, &config.frame).await {
                    return SessionEnd::Lost(e.into());
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    flush_queued(commands, &mut writer, &config.frame).await;
                    return SessionEnd::Shutdown;
                }
            }
        }
    }
}

/// Write commands that were queued before shutdown, such as a final leave.
async fn flush_queued(
    commands: &mut mpsc::UnboundedReceiver<Command>,
    writer: &mut OwnedWriteHalf,
    frame: &FrameConfig,
) {
    while let Ok(cmd) = commands.try_recv() {
        let msg = match cmd {
            Command::Join(j) => Message::Join(j),
            Command::Send(msg) => msg,
            Command::Leave => Message::Leave,
            Command::Track(_) => continue,
        };
        if let Err(e) = write_message(writer, &msg, frame).await {
            tracing::debug!("Flush on shutdown stopped: {e}");
            break;
        }
    }
}

/// Fold local movement into the stored join so a reconnect announces where
/// the participant is now. Older reports are ignored.
fn remember_move(join: &mut Option<JoinRoom>, intent: &MoveIntent) {
    if let Some(j) = join.as_mut()
        && intent.timestamp >= j.timestamp
    {
        j.participant.position = intent.position;
        j.participant.direction = intent.direction;
        j.timestamp = intent.timestamp;
    }
}

/// Publish a server message as an event. Returns a reply to write, if any.
fn dispatch_inbound(msg: Message, events: &broadcast::Sender<TransportEvent>) -> Option<Message> {
    let event = match msg {
        Message::Snapshot(s) => TransportEvent::Snapshot(s),
        Message::Joined(entry) => TransportEvent::Joined(entry),
        Message::Moved(m) => TransportEvent::Moved(m),
        Message::Chat(c) => TransportEvent::Chat(c),
        Message::Left(l) => TransportEvent::Left(l.id),
        Message::Ping(p) => {
            return Some(Message::Pong(Pong {
                timestamp_ms: p.timestamp_ms,
                sequence: p.sequence,
            }));
        }
        Message::Pong(_) => return None,
        other => {
            tracing::debug!(?other, "Ignoring client-only message from server");
            return None;
        }
    };
    // No subscribers is not an error.
    let _ = events.send(event);
    None
}

/// Read messages until the connection fails or the receiver goes away.
/// Undecodable frames are skipped; the frame boundary is still intact.
async fn read_loop(
    mut reader: OwnedReadHalf,
    config: FrameConfig,
    tx: mpsc::Sender<Result<Message, FrameError>>,
) {
    loop {
        match read_message(&mut reader, &config).await {
            Ok(msg) => {
                if tx.send(Ok(msg)).await.is_err() {
                    break;
                }
            }
            Err(FrameError::Message(e)) => {
                tracing::debug!("Skipping undecodable frame: {e}");
            }
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                break;
            }
        }
    }
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::WirePosition;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    fn descriptor(id: &str) -> ParticipantDescriptor {
        ParticipantDescriptor {
            id: id.to_string(),
            display_name: id.to_string(),
            position: WirePosition::default(),
            direction: 0.0,
            appearance_ref: String::new(),
        }
    }

    fn config(addr: std::net::SocketAddr) -> TransportConfig {
        TransportConfig {
            server_addr: addr.to_string(),
            reconnect: ReconnectConfig {
                initial_delay: Duration::from_millis(20),
                max_delay: Duration::from_millis(100),
                jitter: 0.0,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn snapshot(issued_at: u64) -> Message {
        Message::Snapshot(RoomSnapshot {
            room_id: "lobby".to_string(),
            participants: Vec::new(),
            issued_at,
        })
    }

    async fn wait_connected(client: &TransportClient) {
        let mut rx = client.state().subscribe();
        timeout(WAIT, rx.wait_for(|s| *s == ConnectionState::Connected))
            .await
            .unwrap()
            .unwrap();
    }

    async fn next_event(rx: &mut broadcast::Receiver<TransportEvent>) -> TransportEvent {
        timeout(WAIT, rx.recv()).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_connection_state_transitions() {
        let watch = ConnectionStateWatch::new();
        assert_eq!(watch.current(), ConnectionState::Disconnected);

        watch.set(ConnectionState::Connecting);
        assert_eq!(watch.current(), ConnectionState::Connecting);

        watch.set(ConnectionState::Connected);
        assert_eq!(watch.current(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_join_is_sent_and_snapshot_delivered() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let frame = FrameConfig::default();

        let client = TransportClient::spawn(config(addr));
        let mut events = client.subscribe();
        client.join("lobby", descriptor("alice"), 1_000).unwrap();

        let (mut stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        let Message::Join(join) = read_message(&mut stream, &frame).await.unwrap() else {
            panic!("expected join");
        };
        assert_eq!(join.room_id, "lobby");
        assert_eq!(join.participant.id, "alice");
        assert_eq!(join.timestamp, 1_000);

        write_message(&mut stream, &snapshot(42), &frame).await.unwrap();
        let TransportEvent::Snapshot(s) = next_event(&mut events).await else {
            panic!("expected snapshot");
        };
        assert_eq!(s.issued_at, 42);
    }

    #[tokio::test]
    async fn test_reconnect_resends_join() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let frame = FrameConfig::default();

        let client = TransportClient::spawn(config(addr));
        let mut events = client.subscribe();
        client.join("lobby", descriptor("alice"), 1_000).unwrap();

        // First connection: accept the join, then hang up.
        let (mut first, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        assert!(matches!(
            read_message(&mut first, &frame).await.unwrap(),
            Message::Join(_)
        ));
        drop(first);

        assert_eq!(next_event(&mut events).await, TransportEvent::Disconnected);

        let (mut second, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        let Message::Join(join) = read_message(&mut second, &frame).await.unwrap() else {
            panic!("expected re-sent join");
        };
        assert_eq!(join.participant.id, "alice");
        assert_eq!(next_event(&mut events).await, TransportEvent::Reconnected);

        write_message(&mut second, &snapshot(7), &frame).await.unwrap();
        assert!(matches!(
            next_event(&mut events).await,
            TransportEvent::Snapshot(_)
        ));
    }

    #[tokio::test]
    async fn test_reconnect_join_carries_last_reported_position() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let frame = FrameConfig::default();

        let client = TransportClient::spawn(config(addr));
        let mut events = client.subscribe();
        client.join("lobby", descriptor("alice"), 1_000).unwrap();

        let (mut first, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        let Message::Join(join) = read_message(&mut first, &frame).await.unwrap() else {
            panic!("expected join");
        };
        assert_eq!(join.participant.position, WirePosition::default());
        wait_connected(&client).await;

        let intent = MoveIntent {
            position: WirePosition::new(5.0, 0.0, 0.0),
            direction: 1.5,
            moving: false,
            anim_phase: 0.0,
            timestamp: 2_000,
        };
        assert!(client.send_movement(intent));
        let Message::Move(sent) = read_message(&mut first, &frame).await.unwrap() else {
            panic!("expected move");
        };
        assert_eq!(sent.position.x, 5.0);
        drop(first);
        assert_eq!(next_event(&mut events).await, TransportEvent::Disconnected);

        let (mut second, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        let Message::Join(join) = read_message(&mut second, &frame).await.unwrap() else {
            panic!("expected re-sent join");
        };
        assert_eq!(join.participant.position, WirePosition::new(5.0, 0.0, 0.0));
        assert_eq!(join.participant.direction, 1.5);
        assert_eq!(join.timestamp, 2_000);
    }

    #[test]
    fn test_remember_move_ignores_older_reports() {
        let mut join = Some(JoinRoom {
            room_id: "lobby".to_string(),
            participant: descriptor("alice"),
            timestamp: 5_000,
        });
        let mut intent = MoveIntent {
            position: WirePosition::new(9.0, 0.0, 0.0),
            direction: 0.0,
            moving: true,
            anim_phase: 0.0,
            timestamp: 4_000,
        };
        remember_move(&mut join, &intent);
        let stored = join.as_ref().unwrap();
        assert_eq!(stored.participant.position, WirePosition::default());
        assert_eq!(stored.timestamp, 5_000);

        intent.timestamp = 6_000;
        remember_move(&mut join, &intent);
        let stored = join.as_ref().unwrap();
        assert_eq!(stored.participant.position.x, 9.0);
        assert_eq!(stored.timestamp, 6_000);

        let mut left = None;
        remember_move(&mut left, &intent);
        assert!(left.is_none());
    }

    #[tokio::test]
    async fn test_send_movement_is_throttled() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TransportClient::spawn(config(addr));
        let (_stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        wait_connected(&client).await;

        let mut intent = MoveIntent {
            position: WirePosition::new(1.0, 0.0, 0.0),
            direction: 0.0,
            moving: true,
            anim_phase: 0.0,
            timestamp: 10_000,
        };
        assert!(client.send_movement(intent));

        intent.position.x = 2.0;
        intent.timestamp = 10_010;
        assert!(!client.send_movement(intent), "inside the send interval");

        intent.timestamp = 10_060;
        assert!(client.send_movement(intent));

        intent.timestamp = 10_200;
        assert!(!client.send_movement(intent), "unchanged report");
    }

    #[tokio::test]
    async fn test_send_movement_rejected_while_disconnected() {
        let client = TransportClient::spawn(TransportConfig {
            server_addr: "127.0.0.1:1".to_string(),
            ..Default::default()
        });
        let intent = MoveIntent {
            position: WirePosition::default(),
            direction: 0.0,
            moving: false,
            anim_phase: 0.0,
            timestamp: 1,
        };
        assert!(!client.send_movement(intent));
        client.shutdown();
    }

    #[tokio::test]
    async fn test_server_ping_is_answered() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let frame = FrameConfig::default();
        let _client = TransportClient::spawn(config(addr));

        let (mut stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        let ping = Ping {
            timestamp_ms: 99,
            sequence: 3,
        };
        write_message(&mut stream, &Message::Ping(ping), &frame).await.unwrap();

        let reply = timeout(WAIT, read_message(&mut stream, &frame))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            reply,
            Message::Pong(Pong {
                timestamp_ms: 99,
                sequence: 3
            })
        );
    }

    #[tokio::test]
    async fn test_shutdown_is_immediate() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TransportClient::spawn(config(addr));
        let (_stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        wait_connected(&client).await;

        client.shutdown();
        assert_eq!(client.state().current(), ConnectionState::Disconnected);
    }
}
