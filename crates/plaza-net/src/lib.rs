//! Room networking: wire protocol, message framing, the reconnecting
//! transport client, a shared connection manager and the relay server.

pub mod clock;
pub mod framing;
pub mod messages;
pub mod reconnection;
pub mod room_server;
pub mod shared;
pub mod throttle;
pub mod transport;

pub use clock::unix_millis;
pub use framing::{FrameConfig, FrameError, read_frame, read_message, write_frame, write_message};
pub use messages::{
    ChatBroadcast, JoinRoom, Left, Message, MessageError, MoveIntent, Moved,
    PROTOCOL_VERSION, ParticipantDescriptor, Ping, Pong, RoomSnapshot, SayIntent, SnapshotEntry,
    WirePosition, deserialize_message, serialize_message,
};
pub use reconnection::{ReconnectConfig, ReconnectError, ReconnectState};
pub use room_server::{ConnectionId, IdGenerator, RoomServer, RoomServerConfig, RoomTable};
pub use shared::{ConnectionManager, TransportLease};
pub use throttle::{MovementThrottle, ThrottleConfig, angle_delta};
pub use transport::{
    ConnectionState, ConnectionStateWatch, TransportClient, TransportConfig, TransportError,
    TransportEvent,
};
