//! Canonical map of remote participants.
//!
//! Both sources feed the same map and compete on recency alone: an event is
//! applied only if its timestamp is not older than the participant's
//! `last_update`, and an event equal in timestamp and payload to what was
//! already applied is a duplicate. Which source produced it does not
//! matter.
//!
//! The map lives behind an `Arc`. [`PresenceRegistry::apply_batch`] takes a
//! whole tick's events and mutates through `Arc::make_mut`, so a
//! [`RegistrySnapshot`] taken before the tick keeps the previous map intact.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Deref;
use std::sync::Arc;

use crate::chat::supersedes;
use crate::events::{ChatEvent, Movement, PresenceEvent, Sighting};
use crate::interpolation::{MIN_SEGMENT_LENGTH, begin_segment};
use crate::participant::{ChatOverlay, Participant, ParticipantId, Provenance};

/// Participants keyed by id.
pub type ParticipantMap = BTreeMap<ParticipantId, Participant>;

/// Immutable view of the registry as of the last completed tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistrySnapshot(Arc<ParticipantMap>);

impl Deref for RegistrySnapshot {
    type Target = ParticipantMap;

    fn deref(&self) -> &ParticipantMap {
        &self.0
    }
}

/// What an applied event did to the map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryChange {
    Joined(ParticipantId),
    Updated(ParticipantId),
    Left(ParticipantId),
}

impl RegistryChange {
    pub fn id(&self) -> &ParticipantId {
        match self {
            RegistryChange::Joined(id) | RegistryChange::Updated(id) | RegistryChange::Left(id) => {
                id
            }
        }
    }
}

/// Why an event left the map untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Older than the participant's last accepted event.
    Stale,
    /// Same timestamp and payload as what is already applied.
    Duplicate,
    /// Refers to a participant that is not tracked and cannot be created
    /// from this event.
    Unknown,
    /// About the local participant.
    Local,
}

type Outcome = Result<RegistryChange, Rejection>;

/// The merged participant map and its reconciliation rules.
#[derive(Debug, Clone, Default)]
pub struct PresenceRegistry {
    map: Arc<ParticipantMap>,
    local_id: Option<ParticipantId>,
}

impl PresenceRegistry {
    /// An empty registry. Events about `local_id` are ignored.
    pub fn new(local_id: Option<ParticipantId>) -> Self {
        Self {
            map: Arc::new(ParticipantMap::new()),
            local_id,
        }
    }

    /// Cheap immutable view of the current map.
    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot(Arc::clone(&self.map))
    }

    pub fn get(&self, id: &ParticipantId) -> Option<&Participant> {
        self.map.get(id)
    }

    pub fn participants(&self) -> &ParticipantMap {
        &self.map
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn local_id(&self) -> Option<&ParticipantId> {
        self.local_id.as_ref()
    }

    /// Apply one event. See [`apply_batch`](Self::apply_batch).
    pub fn apply(&mut self, event: PresenceEvent, now_ms: u64) -> Vec<RegistryChange> {
        self.apply_batch(std::iter::once(event), now_ms)
    }

    /// Apply events in order and report every change. `now_ms` is the
    /// local time recorded as the start of any movement segment begun here
    /// and as the receipt time of every accepted event.
    pub fn apply_batch(
        &mut self,
        events: impl IntoIterator<Item = PresenceEvent>,
        now_ms: u64,
    ) -> Vec<RegistryChange> {
        let mut events = events.into_iter().peekable();
        if events.peek().is_none() {
            return Vec::new();
        }

        let local_id = self.local_id.clone();
        let map = Arc::make_mut(&mut self.map);
        let mut changes = Vec::new();
        for event in events {
            match event {
                PresenceEvent::Snapshot { entries, issued_at } => {
                    apply_snapshot(map, local_id.as_ref(), entries, issued_at, now_ms, &mut changes);
                }
                PresenceEvent::Sighted(s) => {
                    let id = s.id.clone();
                    record(
                        &id,
                        check_local(&id, local_id.as_ref())
                            .and_then(|()| apply_sighting(map, s, now_ms)),
                        &mut changes,
                    );
                }
                PresenceEvent::Moved(m) => {
                    let id = m.id.clone();
                    record(
                        &id,
                        check_local(&id, local_id.as_ref())
                            .and_then(|()| apply_movement(map, m, now_ms)),
                        &mut changes,
                    );
                }
                PresenceEvent::Chat(c) => {
                    let id = c.id.clone();
                    record(
                        &id,
                        check_local(&id, local_id.as_ref()).and_then(|()| apply_chat(map, c, now_ms)),
                        &mut changes,
                    );
                }
                PresenceEvent::Left(id) => {
                    let outcome = match map.remove(&id) {
                        Some(_) => Ok(RegistryChange::Left(id.clone())),
                        None => Err(Rejection::Unknown),
                    };
                    record(&id, outcome, &mut changes);
                }
                PresenceEvent::ConnectionLost => {
                    tracing::info!(tracked = map.len(), "Room connection lost, keeping participants");
                }
                PresenceEvent::ConnectionRestored => {
                    tracing::info!("Room connection restored");
                }
            }
        }
        changes
    }

    /// Remove `id` outright.
    pub fn remove(&mut self, id: &ParticipantId) -> Option<Participant> {
        if !self.map.contains_key(id) {
            return None;
        }
        Arc::make_mut(&mut self.map).remove(id)
    }

    /// Mutable access for the per-tick passes (interpolation, reaping).
    pub(crate) fn participants_mut(&mut self) -> &mut ParticipantMap {
        Arc::make_mut(&mut self.map)
    }
}

fn check_local(id: &ParticipantId, local_id: Option<&ParticipantId>) -> Result<(), Rejection> {
    if local_id == Some(id) {
        Err(Rejection::Local)
    } else {
        Ok(())
    }
}

fn record(id: &ParticipantId, outcome: Outcome, changes: &mut Vec<RegistryChange>) {
    match outcome {
        Ok(change) => changes.push(change),
        Err(reason) => tracing::debug!(id = %id, ?reason, "Presence event rejected"),
    }
}

/// Recency check shared by every event kind.
fn admit(p: &Participant, timestamp: u64, same_payload: impl FnOnce() -> bool) -> Result<(), Rejection> {
    if timestamp < p.last_update {
        Err(Rejection::Stale)
    } else if timestamp == p.last_update && same_payload() {
        Err(Rejection::Duplicate)
    } else {
        Ok(())
    }
}

fn apply_snapshot(
    map: &mut ParticipantMap,
    local_id: Option<&ParticipantId>,
    entries: Vec<Sighting>,
    issued_at: u64,
    now_ms: u64,
    changes: &mut Vec<RegistryChange>,
) {
    let mut listed = BTreeSet::new();
    for entry in entries {
        let id = entry.id.clone();
        listed.insert(id.clone());
        let outcome = check_local(&id, local_id).and_then(|()| apply_sighting(map, entry, now_ms));
        record(&id, outcome, changes);
    }

    let departed: Vec<ParticipantId> = map
        .values()
        .filter(|p| {
            p.provenance == Provenance::Transport
                && p.last_update < issued_at
                && !listed.contains(&p.id)
        })
        .map(|p| p.id.clone())
        .collect();
    for id in departed {
        map.remove(&id);
        tracing::debug!(id = %id, issued_at, "Dropped participant missing from room snapshot");
        changes.push(RegistryChange::Left(id));
    }
}

fn apply_sighting(map: &mut ParticipantMap, s: Sighting, now_ms: u64) -> Outcome {
    let Some(p) = map.get_mut(&s.id) else {
        let id = s.id.clone();
        map.insert(
            id.clone(),
            Participant::stationary(
                s.id,
                s.display_name,
                s.position,
                s.direction,
                s.appearance_ref,
                s.timestamp,
                s.provenance,
            )
            .seen_at(now_ms),
        );
        return Ok(RegistryChange::Joined(id));
    };

    admit(p, s.timestamp, || {
        p.target == s.position
            && p.display_name == s.display_name
            && p.appearance_ref == s.appearance_ref
    })?;

    p.display_name = s.display_name;
    p.appearance_ref = s.appearance_ref;
    p.last_update = s.timestamp;
    p.last_seen = now_ms;
    p.reported_moving = false;
    p.provenance = s.provenance;
    if p.target.distance(s.position) > MIN_SEGMENT_LENGTH {
        begin_segment(p, s.position, s.direction, now_ms);
    } else if !p.moving {
        p.direction = s.direction;
    }
    Ok(RegistryChange::Updated(s.id))
}

fn apply_movement(map: &mut ParticipantMap, m: Movement, now_ms: u64) -> Outcome {
    if let Some(p) = map.get_mut(&m.id) {
        admit(p, m.timestamp, || {
            p.target == m.target && p.reported_moving == m.moving && p.anim_phase == m.anim_phase
        })?;

        if let Some(name) = m.display_name {
            p.display_name = name;
        }
        if let Some(appearance) = m.appearance_ref {
            p.appearance_ref = appearance;
        }
        p.last_update = m.timestamp;
        p.last_seen = now_ms;
        p.reported_moving = m.moving;
        p.provenance = m.provenance;
        p.anim_phase = m.anim_phase;
        begin_segment(p, m.target, m.direction, now_ms);
        return Ok(RegistryChange::Updated(m.id));
    }

    let start = m.origin.unwrap_or(m.target);
    let mut p = Participant::stationary(
        m.id.clone(),
        m.display_name.unwrap_or_else(|| m.id.to_string()),
        start,
        m.direction,
        m.appearance_ref.unwrap_or_default(),
        m.timestamp,
        m.provenance,
    )
    .seen_at(now_ms);
    p.anim_phase = m.anim_phase;
    p.reported_moving = m.moving;
    begin_segment(&mut p, m.target, m.direction, now_ms);
    let id = m.id;
    map.insert(id.clone(), p);
    Ok(RegistryChange::Joined(id))
}

fn apply_chat(map: &mut ParticipantMap, c: ChatEvent, now_ms: u64) -> Outcome {
    let overlay = ChatOverlay {
        text: c.text,
        timestamp: c.timestamp,
        shown_at: now_ms,
    };

    if let Some(p) = map.get_mut(&c.id) {
        if p.chat.as_ref().is_some_and(|current| current.same_message(&overlay)) {
            return Err(Rejection::Duplicate);
        }
        if !supersedes(p.chat.as_ref(), &overlay) {
            return Err(Rejection::Stale);
        }
        p.last_update = p.last_update.max(overlay.timestamp);
        p.last_seen = now_ms;
        if overlay.timestamp >= p.last_update {
            p.provenance = c.provenance;
        }
        p.chat = Some(overlay);
        return Ok(RegistryChange::Updated(c.id));
    }

    let Some((position, display_name)) = c.placement else {
        return Err(Rejection::Unknown);
    };
    let mut p = Participant::stationary(
        c.id.clone(),
        display_name,
        position,
        0.0,
        String::new(),
        overlay.timestamp,
        c.provenance,
    )
    .seen_at(now_ms);
    p.chat = Some(overlay);
    let id = c.id;
    map.insert(id.clone(), p);
    Ok(RegistryChange::Joined(id))
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
