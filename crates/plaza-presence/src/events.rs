//! Validated presence events and the queue that carries them to the tick.
//!
//! Network and store callbacks never touch the registry. They convert what
//! they receive into [`PresenceEvent`]s (see [`ingest`](crate::ingest)) and
//! push them through an [`EventSender`]; the tick drains the
//! [`EventQueue`] in arrival order.

use glam::Vec3;
use tokio::sync::mpsc;

use crate::participant::{ParticipantId, Provenance};

/// A participant seen as a whole: a snapshot entry, a join announcement, or
/// a bootstrap row.
#[derive(Debug, Clone, PartialEq)]
pub struct Sighting {
    pub id: ParticipantId,
    pub display_name: String,
    pub position: Vec3,
    pub direction: f32,
    pub appearance_ref: String,
    pub timestamp: u64,
    pub provenance: Provenance,
}

/// A movement report.
#[derive(Debug, Clone, PartialEq)]
pub struct Movement {
    pub id: ParticipantId,
    /// Where the participant is heading (or standing, once stopped).
    pub target: Vec3,
    /// Where the reported segment started, when the source knows it. Only
    /// used to place a participant seen for the first time.
    pub origin: Option<Vec3>,
    pub direction: f32,
    pub moving: bool,
    pub anim_phase: f32,
    /// Used when the movement is the first sighting.
    pub display_name: Option<String>,
    pub appearance_ref: Option<String>,
    pub timestamp: u64,
    pub provenance: Provenance,
}

/// A chat message.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatEvent {
    pub id: ParticipantId,
    pub text: String,
    pub timestamp: u64,
    /// Speaker placement for sources that carry one. Lets a participant
    /// first seen through chat be created; without it, chat for an unknown
    /// participant is dropped.
    pub placement: Option<(Vec3, String)>,
    pub provenance: Provenance,
}

/// Everything the registry can be told.
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceEvent {
    /// Full room membership from the server. Authoritative for
    /// transport-sourced participants older than `issued_at`.
    Snapshot {
        entries: Vec<Sighting>,
        issued_at: u64,
    },
    Sighted(Sighting),
    Moved(Movement),
    Chat(ChatEvent),
    Left(ParticipantId),
    /// The room connection dropped. Nothing is removed; the snapshot that
    /// follows a reconnect settles membership.
    ConnectionLost,
    ConnectionRestored,
}

/// Cloneable producer side of the [`EventQueue`].
#[derive(Debug, Clone)]
pub struct EventSender(mpsc::UnboundedSender<PresenceEvent>);

impl EventSender {
    /// Queue `event`. Returns `false` if the queue is gone.
    pub fn send(&self, event: PresenceEvent) -> bool {
        self.0.send(event).is_ok()
    }
}

/// Unbounded FIFO of events awaiting the next tick.
#[derive(Debug)]
pub struct EventQueue {
    tx: mpsc::UnboundedSender<PresenceEvent>,
    rx: mpsc::UnboundedReceiver<PresenceEvent>,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    /// A new producer handle.
    pub fn sender(&self) -> EventSender {
        EventSender(self.tx.clone())
    }

    /// Take every event queued so far, oldest first. Never waits.
    pub fn drain(&mut self) -> Vec<PresenceEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_preserves_arrival_order() {
        let mut queue = EventQueue::new();
        let a = queue.sender();
        let b = queue.sender();

        assert!(a.send(PresenceEvent::Left("one".into())));
        assert!(b.send(PresenceEvent::ConnectionLost));
        assert!(a.send(PresenceEvent::Left("two".into())));

        let drained = queue.drain();
        assert_eq!(
            drained,
            vec![
                PresenceEvent::Left("one".into()),
                PresenceEvent::ConnectionLost,
                PresenceEvent::Left("two".into()),
            ]
        );
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn test_sender_fails_after_queue_dropped() {
        let queue = EventQueue::new();
        let sender = queue.sender();
        drop(queue);
        assert!(!sender.send(PresenceEvent::ConnectionRestored));
    }
}
