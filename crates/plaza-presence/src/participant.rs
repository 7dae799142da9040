//! The participant record and the small value types around it.

use std::f32::consts::{FRAC_PI_4, TAU};
use std::fmt;
use std::time::Duration;

use glam::Vec3;

/// Stable identity of a participant, unique within a room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Wraps `id`. Emptiness is checked at ingest, not here.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Which source produced the most recently accepted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// Live room connection.
    Transport,
    /// Durable store (bootstrap query or subscription).
    Persistence,
}

/// The one chat message a participant currently shows.
///
/// `timestamp` is the sender's clock and only orders messages from the same
/// speaker. How long the overlay stays up is measured from `shown_at`, the
/// local time it was received.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatOverlay {
    pub text: String,
    /// Unix milliseconds the message was sent, on the sender's clock.
    pub timestamp: u64,
    /// Local Unix milliseconds the message was received.
    pub shown_at: u64,
}

impl ChatOverlay {
    /// `true` if `other` is the same message, whenever it was received.
    pub fn same_message(&self, other: &ChatOverlay) -> bool {
        self.timestamp == other.timestamp && self.text == other.text
    }

    /// Visible during `[shown_at, shown_at + ttl)`.
    pub fn is_visible(&self, now_ms: u64, ttl: Duration) -> bool {
        now_ms >= self.shown_at && now_ms - self.shown_at < duration_ms(ttl)
    }

    /// Expired once `ttl` has fully elapsed since it was shown.
    pub fn is_expired(&self, now_ms: u64, ttl: Duration) -> bool {
        now_ms.saturating_sub(self.shown_at) >= duration_ms(ttl)
    }
}

/// One of eight facing buckets, clockwise from +Z.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compass {
    North,
    NorthEast,
    East,
    SouthEast,
    South,
    SouthWest,
    West,
    NorthWest,
}

impl Compass {
    const ALL: [Compass; 8] = [
        Compass::North,
        Compass::NorthEast,
        Compass::East,
        Compass::SouthEast,
        Compass::South,
        Compass::SouthWest,
        Compass::West,
        Compass::NorthWest,
    ];

    /// Nearest bucket to `angle`, where 0 faces +Z and `PI / 2` faces +X.
    pub fn from_angle(angle: f32) -> Self {
        if !angle.is_finite() {
            return Compass::North;
        }
        let bucket = (angle.rem_euclid(TAU) / FRAC_PI_4).round() as usize % 8;
        Self::ALL[bucket]
    }

    /// Centre angle of the bucket.
    pub fn angle(self) -> f32 {
        let index = Self::ALL.iter().position(|c| *c == self).unwrap_or(0);
        index as f32 * FRAC_PI_4
    }
}

/// Where a participant is in its lifecycle, as seen by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceState {
    Stationary,
    Moving,
    /// No accepted event for the stale threshold. Still tracked and drawn.
    Stale,
    /// Past the eviction threshold; removed at the next reaper run.
    Evicted,
}

/// A remote participant as tracked by the registry.
///
/// Every field is always populated. A participant exists from its first
/// valid sighting until eviction or an explicit leave.
#[derive(Debug, Clone, PartialEq)]
pub struct Participant {
    pub id: ParticipantId,
    pub display_name: String,
    /// Position currently rendered. Advanced by the interpolator.
    pub position: Vec3,
    /// Start of the current movement segment.
    pub source: Vec3,
    /// End of the current movement segment.
    pub target: Vec3,
    /// Local wall-clock time (Unix ms) the current segment began.
    pub movement_start: u64,
    /// Facing angle in radians, 0 toward +Z. Kept while stationary.
    pub direction: f32,
    /// `true` while the current segment is still being walked.
    pub moving: bool,
    pub anim_phase: f32,
    pub appearance_ref: String,
    /// Sender timestamp (Unix ms) of the most recently accepted event.
    /// Orders events; never compared with the local clock.
    pub last_update: u64,
    /// Local time (Unix ms) the most recently accepted event was applied.
    /// Staleness and eviction are measured from here.
    pub last_seen: u64,
    /// Moving flag of the last accepted movement report. `moving` itself
    /// is cleared locally on arrival.
    pub reported_moving: bool,
    pub provenance: Provenance,
    pub chat: Option<ChatOverlay>,
}

impl Participant {
    /// A participant standing still at `position`.
    pub fn stationary(
        id: ParticipantId,
        display_name: String,
        position: Vec3,
        direction: f32,
        appearance_ref: String,
        timestamp: u64,
        provenance: Provenance,
    ) -> Self {
        Self {
            id,
            display_name,
            position,
            source: position,
            target: position,
            movement_start: 0,
            direction,
            moving: false,
            anim_phase: 0.0,
            appearance_ref,
            last_update: timestamp,
            last_seen: timestamp,
            reported_moving: false,
            provenance,
            chat: None,
        }
    }

    /// Record that the participant was heard from at local time `now_ms`.
    pub fn seen_at(mut self, now_ms: u64) -> Self {
        self.last_seen = now_ms;
        self
    }

    /// Local milliseconds since the last accepted event.
    pub fn idle_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_seen)
    }

    /// Lifecycle state at `now_ms` for the given thresholds.
    pub fn presence_state(&self, now_ms: u64, stale: Duration, evict: Duration) -> PresenceState {
        let idle = self.idle_ms(now_ms);
        if idle > duration_ms(evict) {
            PresenceState::Evicted
        } else if idle > duration_ms(stale) {
            PresenceState::Stale
        } else if self.moving {
            PresenceState::Moving
        } else {
            PresenceState::Stationary
        }
    }
}

/// Whole milliseconds in `d`, saturating.
pub(crate) fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn bob(last_update: u64) -> Participant {
        Participant::stationary(
            "bob".into(),
            "Bob".to_string(),
            Vec3::new(3.0, 0.0, 4.0),
            0.0,
            String::new(),
            last_update,
            Provenance::Transport,
        )
    }

    #[test]
    fn test_compass_buckets() {
        assert_eq!(Compass::from_angle(0.0), Compass::North);
        assert_eq!(Compass::from_angle(PI / 2.0), Compass::East);
        assert_eq!(Compass::from_angle(PI), Compass::South);
        assert_eq!(Compass::from_angle(-PI / 2.0), Compass::West);
        assert_eq!(Compass::from_angle(-PI / 4.0), Compass::NorthWest);
        // Just under half a bucket still rounds to North.
        assert_eq!(Compass::from_angle(0.39), Compass::North);
        assert_eq!(Compass::from_angle(TAU - 0.1), Compass::North);
        assert_eq!(Compass::from_angle(f32::NAN), Compass::North);
    }

    #[test]
    fn test_compass_angle_roundtrip() {
        for c in Compass::ALL {
            assert_eq!(Compass::from_angle(c.angle()), c);
        }
    }

    #[test]
    fn test_chat_visibility_window() {
        let ttl = Duration::from_secs(5);
        // Sender clock far behind; only the receipt time matters.
        let chat = ChatOverlay {
            text: "gg".to_string(),
            timestamp: 1,
            shown_at: 10_000,
        };
        assert!(!chat.is_visible(9_999, ttl));
        assert!(chat.is_visible(10_000, ttl));
        assert!(chat.is_visible(14_999, ttl));
        assert!(!chat.is_visible(15_000, ttl));
        assert!(!chat.is_expired(14_999, ttl));
        assert!(chat.is_expired(15_000, ttl));
    }

    #[test]
    fn test_stationary_has_concrete_endpoints() {
        let p = bob(100);
        assert_eq!(p.position, p.source);
        assert_eq!(p.position, p.target);
        assert!(!p.moving);
    }

    #[test]
    fn test_presence_state_thresholds() {
        let stale = Duration::from_secs(30);
        let evict = Duration::from_secs(300);
        let mut p = bob(0);
        assert_eq!(p.presence_state(1_000, stale, evict), PresenceState::Stationary);
        p.moving = true;
        assert_eq!(p.presence_state(1_000, stale, evict), PresenceState::Moving);
        assert_eq!(p.presence_state(30_001, stale, evict), PresenceState::Stale);
        assert_eq!(p.presence_state(300_001, stale, evict), PresenceState::Evicted);
    }

    #[test]
    fn test_future_timestamp_is_not_idle() {
        let p = bob(5_000);
        assert_eq!(p.idle_ms(1_000), 0);
    }

    #[test]
    fn test_idle_time_ignores_sender_clock() {
        let p = bob(10).seen_at(500_000);
        assert_eq!(p.idle_ms(500_000), 0);
        assert_eq!(p.idle_ms(530_001), 30_001);
        assert_eq!(
            p.presence_state(500_000, Duration::from_secs(30), Duration::from_secs(300)),
            PresenceState::Stationary
        );
    }

    #[test]
    fn test_same_message_ignores_receipt_time() {
        let a = ChatOverlay {
            text: "hi".to_string(),
            timestamp: 7,
            shown_at: 100,
        };
        let b = ChatOverlay {
            shown_at: 900,
            ..a.clone()
        };
        assert!(a.same_message(&b));
        assert!(!a.same_message(&ChatOverlay {
            text: "yo".to_string(),
            ..b
        }));
    }
}
