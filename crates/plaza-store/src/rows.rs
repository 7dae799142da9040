//! Row types shared by every backend.
//!
//! Field names follow the store's two tables, `position_events` and
//! `chat_events`. Rows are plain data: validation happens where they are
//! turned into presence events, not here.

use serde::{Deserialize, Serialize};

/// One movement record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRow {
    pub participant_id: String,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    /// Start of the segment the participant was walking when the row was
    /// written. Equal to `x/y/z` while stationary.
    pub source_x: f32,
    pub source_y: f32,
    pub source_z: f32,
    /// Facing angle in radians.
    pub direction: f32,
    pub appearance_ref: String,
    pub display_name: String,
    /// Unix milliseconds.
    pub timestamp: u64,
}

/// One chat record. Carries the speaker's position so a participant first
/// seen through chat can still be placed in the world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRow {
    pub participant_id: String,
    pub message: String,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub display_name: String,
    /// Unix milliseconds.
    pub timestamp: u64,
}

/// A row delivered through a [`Subscription`](crate::Subscription) or
/// stored in the journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoredEvent {
    Position(PositionRow),
    Chat(ChatRow),
}

impl StoredEvent {
    /// Participant the row belongs to.
    pub fn participant_id(&self) -> &str {
        match self {
            StoredEvent::Position(row) => &row.participant_id,
            StoredEvent::Chat(row) => &row.participant_id,
        }
    }

    /// Row timestamp in Unix milliseconds.
    pub fn timestamp(&self) -> u64 {
        match self {
            StoredEvent::Position(row) => row.timestamp,
            StoredEvent::Chat(row) => row.timestamp,
        }
    }
}
