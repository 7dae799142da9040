//! Room protocol message types and serialization.
//!
//! All messages are serialized with [`postcard`] and prefixed with a protocol
//! version byte. Use [`serialize_message`] and [`deserialize_message`] for
//! encoding/decoding.
//!
//! Client-originated movement and chat messages ([`MoveIntent`],
//! [`SayIntent`]) carry no participant id: the server attributes them by
//! connection and rebroadcasts them as [`Moved`] / [`ChatBroadcast`].

use serde::{Deserialize, Serialize};

/// Current wire-protocol version. Prepended to every serialized message.
pub const PROTOCOL_VERSION: u8 = 1;

// ---------------------------------------------------------------------------
// Top-level enum
// ---------------------------------------------------------------------------

/// Top-level network message. The enum discriminant is the type tag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Message {
    // --- Room membership ---
    /// Client joins a room with its local descriptor.
    Join(JoinRoom),
    /// Server sends the full room membership to a (re)joining client.
    Snapshot(RoomSnapshot),
    /// Server announces a newly joined participant to the rest of the room.
    Joined(SnapshotEntry),
    /// Client leaves its current room.
    Leave,
    /// Server announces that a participant left the room.
    Left(Left),

    // --- Movement ---
    /// Client reports its own movement.
    Move(MoveIntent),
    /// Server relays a participant's movement.
    Moved(Moved),

    // --- Chat ---
    /// Client says something in the room.
    Say(SayIntent),
    /// Server relays a participant's chat message.
    Chat(ChatBroadcast),

    // --- System ---
    /// Keepalive ping. Sender expects a Pong in response.
    Ping(Ping),
    /// Keepalive pong. Response to a Ping.
    Pong(Pong),
}

// ---------------------------------------------------------------------------
// Payload structs
// ---------------------------------------------------------------------------

/// A world-space position on the wire.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct WirePosition {
    /// X coordinate.
    pub x: f32,
    /// Y coordinate (up).
    pub y: f32,
    /// Z coordinate.
    pub z: f32,
}

impl WirePosition {
    /// Creates a position from its components.
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance to `other`.
    pub fn distance(&self, other: &WirePosition) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// `true` if every component is a finite number.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// The local participant as announced to a room on join.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParticipantDescriptor {
    /// Stable participant id.
    pub id: String,
    /// Name shown above the avatar.
    pub display_name: String,
    /// Current position.
    pub position: WirePosition,
    /// Facing angle in radians.
    pub direction: f32,
    /// Opaque appearance reference for renderers.
    pub appearance_ref: String,
}

/// Client request to join a room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JoinRoom {
    /// Room to join.
    pub room_id: String,
    /// The joining participant.
    pub participant: ParticipantDescriptor,
    /// Sender clock (ms) at which `participant` was last current. Relayed
    /// as the entry timestamp so later movement from the same clock orders
    /// after it.
    pub timestamp: u64,
}

/// One participant inside a [`RoomSnapshot`] or a [`Message::Joined`]
/// announcement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotEntry {
    /// Participant id.
    pub id: String,
    /// Name shown above the avatar.
    pub display_name: String,
    /// Last known position.
    pub position: WirePosition,
    /// Last known facing angle in radians.
    pub direction: f32,
    /// Opaque appearance reference.
    pub appearance_ref: String,
    /// Timestamp (Unix ms) of the participant's last movement.
    pub timestamp: u64,
}

/// Full room membership, sent to a client when it (re)joins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomSnapshot {
    /// Room the snapshot describes.
    pub room_id: String,
    /// Every other participant currently in the room.
    pub participants: Vec<SnapshotEntry>,
    /// Server time (Unix ms) at which the snapshot was taken.
    pub issued_at: u64,
}

/// Departure notice for a participant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Left {
    /// Participant that left.
    pub id: String,
}

/// Client → server movement report.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MoveIntent {
    /// Position the sender is moving to (or standing at).
    pub position: WirePosition,
    /// Facing angle in radians.
    pub direction: f32,
    /// Whether the sender is walking.
    pub moving: bool,
    /// Walk-cycle phase in `[0, 1)`.
    pub anim_phase: f32,
    /// Sender timestamp (Unix ms).
    pub timestamp: u64,
}

/// Server → client movement relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Moved {
    /// Participant that moved.
    pub id: String,
    /// Position the participant is moving to (or standing at).
    pub position: WirePosition,
    /// Facing angle in radians.
    pub direction: f32,
    /// Whether the participant is walking.
    pub moving: bool,
    /// Walk-cycle phase in `[0, 1)`.
    pub anim_phase: f32,
    /// Sender timestamp (Unix ms).
    pub timestamp: u64,
}

impl Moved {
    /// Attributes a client's [`MoveIntent`] to participant `id`.
    pub fn from_intent(id: String, intent: &MoveIntent) -> Self {
        Self {
            id,
            position: intent.position,
            direction: intent.direction,
            moving: intent.moving,
            anim_phase: intent.anim_phase,
            timestamp: intent.timestamp,
        }
    }
}

/// Client → server chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SayIntent {
    /// Message text.
    pub text: String,
    /// Sender timestamp (Unix ms).
    pub timestamp: u64,
}

/// Server → client chat relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatBroadcast {
    /// Participant that spoke.
    pub id: String,
    /// Message text.
    pub text: String,
    /// Sender timestamp (Unix ms).
    pub timestamp: u64,
}

/// Keepalive ping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ping {
    /// Sender timestamp in milliseconds.
    pub timestamp_ms: u64,
    /// Sequence number.
    pub sequence: u32,
}

/// Keepalive pong (response to [`Ping`]).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pong {
    /// Echoed timestamp in milliseconds.
    pub timestamp_ms: u64,
    /// Echoed sequence number.
    pub sequence: u32,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during message deserialization.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    /// The payload was empty (no version byte).
    #[error("empty payload — no version byte")]
    EmptyPayload,

    /// The version byte does not match [`PROTOCOL_VERSION`].
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Postcard (de)serialization failed.
    #[error("postcard error: {0}")]
    Postcard(#[from] postcard::Error),
}

// ---------------------------------------------------------------------------
// Serialization helpers
// ---------------------------------------------------------------------------

/// Serialize a [`Message`] into a versioned binary payload.
///
/// Wire format: `[version: u8] [postcard-encoded Message]`
pub fn serialize_message(msg: &Message) -> Result<Vec<u8>, MessageError> {
    let body = postcard::to_allocvec(msg)?;
    let mut out = Vec::with_capacity(1 + body.len());
    out.push(PROTOCOL_VERSION);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Deserialize a versioned binary payload into a [`Message`].
///
/// Returns an error if the version is unsupported or the payload is malformed.
pub fn deserialize_message(data: &[u8]) -> Result<Message, MessageError> {
    let Some((&version, body)) = data.split_first() else {
        return Err(MessageError::EmptyPayload);
    };
    if version != PROTOCOL_VERSION {
        return Err(MessageError::UnsupportedVersion(version));
    }

    Ok(postcard::from_bytes(body)?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(id: &str) -> ParticipantDescriptor {
        ParticipantDescriptor {
            id: id.to_string(),
            display_name: id.to_uppercase(),
            position: WirePosition::new(1.0, 0.0, -2.5),
            direction: 0.5,
            appearance_ref: "robe-blue".to_string(),
        }
    }

    #[test]
    fn test_join_roundtrip() {
        let msg = Message::Join(JoinRoom {
            room_id: "lobby".to_string(),
            participant: descriptor("alice"),
            timestamp: 1_700_000_000_000,
        });
        let bytes = serialize_message(&msg).unwrap();
        assert_eq!(deserialize_message(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_snapshot_preserves_entry_order_and_timestamps() {
        let msg = Message::Snapshot(RoomSnapshot {
            room_id: "lobby".to_string(),
            participants: vec![
                SnapshotEntry {
                    id: "b".to_string(),
                    display_name: "B".to_string(),
                    position: WirePosition::new(3.0, 0.0, 4.0),
                    direction: 0.0,
                    appearance_ref: String::new(),
                    timestamp: 90,
                },
                SnapshotEntry {
                    id: "c".to_string(),
                    display_name: "C".to_string(),
                    position: WirePosition::default(),
                    direction: -1.0,
                    appearance_ref: "hat".to_string(),
                    timestamp: 100,
                },
            ],
            issued_at: 123,
        });
        let bytes = serialize_message(&msg).unwrap();
        let Message::Snapshot(decoded) = deserialize_message(&bytes).unwrap() else {
            panic!("expected snapshot");
        };
        assert_eq!(decoded.participants[0].id, "b");
        assert_eq!(decoded.participants[1].timestamp, 100);
        assert_eq!(decoded.issued_at, 123);
    }

    #[test]
    fn test_moved_from_intent_attributes_id() {
        let intent = MoveIntent {
            position: WirePosition::new(10.0, 0.0, 0.0),
            direction: 1.57,
            moving: true,
            anim_phase: 0.25,
            timestamp: 1_700_000_000_000,
        };
        let moved = Moved::from_intent("alice".to_string(), &intent);
        assert_eq!(moved.id, "alice");
        assert_eq!(moved.position, intent.position);
        assert_eq!(moved.timestamp, intent.timestamp);
        assert!(moved.moving);
    }

    #[test]
    fn test_leave_is_compact() {
        let bytes = serialize_message(&Message::Leave).unwrap();
        assert!(bytes.len() <= 2, "Leave should be tiny, got {}", bytes.len());
    }

    #[test]
    fn test_wire_position_distance() {
        let a = WirePosition::new(0.0, 0.0, 0.0);
        let b = WirePosition::new(3.0, 0.0, 4.0);
        assert!((a.distance(&b) - 5.0).abs() < 1e-6);
        assert!(!WirePosition::new(f32::NAN, 0.0, 0.0).is_finite());
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let mut bytes = serialize_message(&Message::Leave).unwrap();
        bytes[0] = 255;
        let result = deserialize_message(&bytes);
        assert!(matches!(result, Err(MessageError::UnsupportedVersion(255))));
    }

    #[test]
    fn test_empty_payload_rejected() {
        let result = deserialize_message(&[]);
        assert!(matches!(result, Err(MessageError::EmptyPayload)));
    }

    #[test]
    fn test_corrupted_payload_rejected() {
        let result = deserialize_message(&[PROTOCOL_VERSION, 0xFF, 0xFF, 0xFF]);
        assert!(result.is_err(), "Corrupted payload should fail deserialization");
    }

    #[test]
    fn test_version_byte_is_first_byte() {
        let msg = Message::Left(Left {
            id: "alice".to_string(),
        });
        let bytes = serialize_message(&msg).unwrap();
        assert_eq!(bytes[0], PROTOCOL_VERSION);
    }
}
