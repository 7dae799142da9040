//! Conversion of wire messages and stored rows into [`PresenceEvent`]s, and
//! the async pumps that feed them into the tick's queue.
//!
//! This is the only place raw input is validated. An empty id or a
//! non-finite coordinate stops the event here; everything past this module
//! can rely on well-formed data.

use std::sync::Arc;
use std::time::Duration;

use glam::Vec3;
use plaza_net::{SnapshotEntry, TransportEvent, WirePosition};
use plaza_store::{PersistenceClient, PositionRow, StoredEvent, Subscription};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::events::{ChatEvent, EventSender, Movement, PresenceEvent, Sighting};
use crate::interpolation::MIN_SEGMENT_LENGTH;
use crate::participant::{ParticipantId, Provenance};

/// Why an incoming message or row was not turned into an event.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IngestError {
    #[error("participant id is empty")]
    EmptyId,

    #[error("position for {0} is not finite")]
    NonFinitePosition(String),
}

fn participant_id(id: String) -> Result<ParticipantId, IngestError> {
    if id.trim().is_empty() {
        Err(IngestError::EmptyId)
    } else {
        Ok(ParticipantId::new(id))
    }
}

fn position(id: &ParticipantId, x: f32, y: f32, z: f32) -> Result<Vec3, IngestError> {
    let v = Vec3::new(x, y, z);
    if v.is_finite() {
        Ok(v)
    } else {
        Err(IngestError::NonFinitePosition(id.to_string()))
    }
}

fn wire_position(id: &ParticipantId, p: WirePosition) -> Result<Vec3, IngestError> {
    position(id, p.x, p.y, p.z)
}

fn finite_or_zero(angle: f32) -> f32 {
    if angle.is_finite() { angle } else { 0.0 }
}

fn sighting_from_entry(entry: SnapshotEntry) -> Result<Sighting, IngestError> {
    let id = participant_id(entry.id)?;
    let position = wire_position(&id, entry.position)?;
    Ok(Sighting {
        id,
        display_name: entry.display_name,
        position,
        direction: finite_or_zero(entry.direction),
        appearance_ref: entry.appearance_ref,
        timestamp: entry.timestamp,
        provenance: Provenance::Transport,
    })
}

/// Validate a transport event.
///
/// Invalid snapshot entries are dropped individually; the rest of the
/// snapshot still applies.
pub fn from_transport(event: TransportEvent) -> Result<PresenceEvent, IngestError> {
    Ok(match event {
        TransportEvent::Disconnected => PresenceEvent::ConnectionLost,
        TransportEvent::Reconnected => PresenceEvent::ConnectionRestored,
        TransportEvent::Snapshot(snapshot) => {
            let entries = snapshot
                .participants
                .into_iter()
                .filter_map(|entry| match sighting_from_entry(entry) {
                    Ok(s) => Some(s),
                    Err(e) => {
                        tracing::debug!("Dropped snapshot entry: {e}");
                        None
                    }
                })
                .collect();
            PresenceEvent::Snapshot {
                entries,
                issued_at: snapshot.issued_at,
            }
        }
        TransportEvent::Joined(entry) => PresenceEvent::Sighted(sighting_from_entry(entry)?),
        TransportEvent::Moved(m) => {
            let id = participant_id(m.id)?;
            let target = wire_position(&id, m.position)?;
            PresenceEvent::Moved(Movement {
                id,
                target,
                origin: None,
                direction: finite_or_zero(m.direction),
                moving: m.moving,
                anim_phase: finite_or_zero(m.anim_phase),
                display_name: None,
                appearance_ref: None,
                timestamp: m.timestamp,
                provenance: Provenance::Transport,
            })
        }
        TransportEvent::Chat(c) => PresenceEvent::Chat(ChatEvent {
            id: participant_id(c.id)?,
            text: c.text,
            timestamp: c.timestamp,
            placement: None,
            provenance: Provenance::Transport,
        }),
        TransportEvent::Left(id) => PresenceEvent::Left(participant_id(id)?),
    })
}

/// Validate a row delivered by the persistence subscription.
///
/// A position row becomes a movement from its source to its target. A
/// chat row carries the speaker's placement so an unseen speaker can be
/// created.
pub fn from_stored(event: StoredEvent) -> Result<PresenceEvent, IngestError> {
    Ok(match event {
        StoredEvent::Position(row) => {
            let id = participant_id(row.participant_id)?;
            let target = position(&id, row.x, row.y, row.z)?;
            let origin = position(&id, row.source_x, row.source_y, row.source_z)?;
            PresenceEvent::Moved(Movement {
                id,
                target,
                origin: Some(origin),
                direction: finite_or_zero(row.direction),
                moving: origin.distance(target) > MIN_SEGMENT_LENGTH,
                anim_phase: 0.0,
                display_name: Some(row.display_name),
                appearance_ref: Some(row.appearance_ref),
                timestamp: row.timestamp,
                provenance: Provenance::Persistence,
            })
        }
        StoredEvent::Chat(row) => {
            let id = participant_id(row.participant_id)?;
            let at = position(&id, row.x, row.y, row.z)?;
            PresenceEvent::Chat(ChatEvent {
                id,
                text: row.message,
                timestamp: row.timestamp,
                placement: Some((at, row.display_name)),
                provenance: Provenance::Persistence,
            })
        }
    })
}

/// Validate a cold-start row. The participant is placed standing at its
/// last known position.
pub fn from_bootstrap_row(row: PositionRow) -> Result<PresenceEvent, IngestError> {
    let id = participant_id(row.participant_id)?;
    let at = position(&id, row.x, row.y, row.z)?;
    Ok(PresenceEvent::Sighted(Sighting {
        id,
        display_name: row.display_name,
        position: at,
        direction: finite_or_zero(row.direction),
        appearance_ref: row.appearance_ref,
        timestamp: row.timestamp,
        provenance: Provenance::Persistence,
    }))
}

/// Forward transport events into the queue until the transport or the
/// queue goes away.
pub fn spawn_transport_pump(
    mut events: broadcast::Receiver<TransportEvent>,
    sender: EventSender,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match from_transport(event) {
                    Ok(event) => {
                        if !sender.send(event) {
                            break;
                        }
                    }
                    Err(e) => tracing::debug!("Dropped transport event: {e}"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Transport pump lagged, events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
        tracing::debug!("Transport pump stopped");
    })
}

/// Forward persistence rows into the queue. Aborting the task drops the
/// subscription.
pub fn spawn_store_pump(mut subscription: Subscription, sender: EventSender) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(row) = subscription.recv().await {
            match from_stored(row) {
                Ok(event) => {
                    if !sender.send(event) {
                        break;
                    }
                }
                Err(e) => tracing::debug!("Dropped persisted row: {e}"),
            }
        }
        subscription.unsubscribe();
        tracing::debug!("Persistence pump stopped");
    })
}

/// Query the most recent row per participant and queue each as a
/// sighting. A failed query is logged and leaves the registry to the live
/// sources.
pub fn spawn_bootstrap(
    store: Arc<dyn PersistenceClient>,
    window: Duration,
    now_ms: u64,
    sender: EventSender,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match store.query_latest_per_participant(window, now_ms).await {
            Ok(rows) => {
                let mut queued = 0usize;
                for row in rows {
                    match from_bootstrap_row(row) {
                        Ok(event) => {
                            if !sender.send(event) {
                                return;
                            }
                            queued += 1;
                        }
                        Err(e) => tracing::debug!("Dropped bootstrap row: {e}"),
                    }
                }
                tracing::info!(participants = queued, "Cold-start bootstrap loaded");
            }
            Err(e) => tracing::warn!("Cold-start bootstrap failed: {e}"),
        }
    })
}
