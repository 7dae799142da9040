//! The presence tick.
//!
//! [`PresenceSession`] is the single owner of presence state. Async sources
//! (the transport pump, the persistence subscription, the cold-start query)
//! only push [`PresenceEvent`](crate::PresenceEvent)s into its queue; every
//! mutation happens inside [`PresenceSession::tick`], in this order:
//!
//! 1. drain the queue and reconcile the batch into the registry
//! 2. advance remote participants along their segments
//! 3. run the reaper if its interval has elapsed
//! 4. advance the local participant
//! 5. send local movement to the room and persist it (throttled, with a
//!    heartbeat row when nothing else was written)
//! 6. build the [`Frame`] for the renderer

use std::sync::Arc;

use glam::Vec3;
use plaza_net::{MoveIntent, MovementThrottle, ParticipantDescriptor, TransportError, TransportLease, WirePosition};
use plaza_store::{ChatRow, PersistenceClient, PositionRow, StoreWriter, WriterStats};
use tokio::task::JoinHandle;

use crate::chat::{ChatOverlayManager, ChatRejection};
use crate::events::{EventQueue, EventSender};
use crate::ingest::{spawn_bootstrap, spawn_store_pump, spawn_transport_pump};
use crate::interpolation::MovementInterpolator;
use crate::local::{HeartbeatTimer, LocalMotion, LocalMovementController, MovementIntent};
use crate::participant::{ChatOverlay, Compass, ParticipantId, PresenceState};
use crate::reaper::StalenessReaper;
use crate::registry::{PresenceRegistry, RegistryChange, RegistrySnapshot};
use crate::settings::PresenceConfig;

/// What the renderer needs to draw one remote participant.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderState {
    pub id: ParticipantId,
    pub display_name: String,
    /// Smoothed display position.
    pub position: Vec3,
    pub direction: f32,
    pub compass: Compass,
    pub moving: bool,
    pub anim_phase: f32,
    /// Chat text while visible, else the display name.
    pub label: String,
    pub chat_text: Option<String>,
    pub appearance_ref: String,
    pub state: PresenceState,
}

/// Output of one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub timestamp: u64,
    pub participants: Vec<RenderState>,
    /// Participants first seen this tick.
    pub joined: Vec<ParticipantId>,
    /// Participants that left or were evicted this tick.
    pub left: Vec<ParticipantId>,
    pub local: LocalMotion,
    /// The local participant's own chat while visible.
    pub local_chat: Option<String>,
}

/// Owner of every piece of presence state for one local participant.
pub struct PresenceSession {
    config: PresenceConfig,
    queue: EventQueue,
    registry: PresenceRegistry,
    interpolator: MovementInterpolator,
    reaper: StalenessReaper,
    chat: ChatOverlayManager,
    local: LocalMovementController,
    local_chat: Option<ChatOverlay>,
    heartbeat: HeartbeatTimer,
    persist_throttle: MovementThrottle,
    transport: Option<TransportLease>,
    writer: Option<StoreWriter>,
    pumps: Vec<JoinHandle<()>>,
}

impl PresenceSession {
    /// A session with the local participant standing at `start`. No source
    /// is attached yet.
    pub fn new(config: PresenceConfig, start: Vec3) -> Self {
        let registry = PresenceRegistry::new(Some(config.local_id.clone()));
        let local = LocalMovementController::new(start, 0.0, config.interpolation.nominal_speed);
        Self {
            queue: EventQueue::new(),
            registry,
            interpolator: MovementInterpolator::new(config.interpolation.clone()),
            reaper: StalenessReaper::new(config.reaper.clone()),
            chat: ChatOverlayManager::new(config.chat_ttl, config.chat_rules.clone()),
            local,
            local_chat: None,
            heartbeat: HeartbeatTimer::new(config.heartbeat_interval),
            persist_throttle: MovementThrottle::new(config.persist_throttle.clone()),
            transport: None,
            writer: None,
            pumps: Vec::new(),
            config,
        }
    }

    pub fn config(&self) -> &PresenceConfig {
        &self.config
    }

    /// Producer handle for feeding events from custom sources.
    pub fn sender(&self) -> EventSender {
        self.queue.sender()
    }

    /// Start receiving room events from `lease` and join the configured
    /// room as of local time `now_ms`.
    ///
    /// The event subscription is taken before the join so the snapshot the
    /// server answers with is not missed.
    pub fn attach_transport(&mut self, lease: TransportLease, now_ms: u64) -> Result<(), TransportError> {
        self.pumps
            .push(spawn_transport_pump(lease.subscribe(), self.queue.sender()));

        let position = self.local.position();
        lease.join(
            self.config.room_id.clone(),
            ParticipantDescriptor {
                id: self.config.local_id.to_string(),
                display_name: self.config.display_name.clone(),
                position: wire(position),
                direction: self.local.direction(),
                appearance_ref: self.config.appearance_ref.clone(),
            },
            now_ms,
        )?;
        tracing::info!(room = %self.config.room_id, id = %self.config.local_id, "Joining room");
        self.transport = Some(lease);
        Ok(())
    }

    /// Subscribe to `store`, start the cold-start query, and route local
    /// writes to it. Must be called inside a tokio runtime.
    pub fn attach_store(&mut self, store: Arc<dyn PersistenceClient>, now_ms: u64) {
        let subscription = store.subscribe(Some(self.config.local_id.to_string()));
        self.pumps
            .push(spawn_store_pump(subscription, self.queue.sender()));
        self.pumps.push(spawn_bootstrap(
            Arc::clone(&store),
            self.config.bootstrap_window,
            now_ms,
            self.queue.sender(),
        ));
        self.writer = Some(StoreWriter::spawn(store));
    }

    pub fn set_intent(&mut self, intent: MovementIntent) {
        self.local.set_intent(intent);
    }

    /// Say `text` as the local participant.
    ///
    /// Rejected text is not sent anywhere. Transport and store failures are
    /// logged; the message is still shown locally.
    pub fn say(&mut self, text: &str, now_ms: u64) -> Result<(), ChatRejection> {
        let text = self.chat.validate_outbound(text, now_ms)?;

        if let Some(transport) = &self.transport
            && let Err(e) = transport.send_chat(text.clone(), now_ms)
        {
            tracing::warn!("Chat not sent to room: {e}");
        }
        if let Some(writer) = &self.writer {
            let at = self.local.position();
            let row = ChatRow {
                participant_id: self.config.local_id.to_string(),
                message: text.clone(),
                x: at.x,
                y: at.y,
                z: at.z,
                display_name: self.config.display_name.clone(),
                timestamp: now_ms,
            };
            if let Err(e) = writer.write_chat(row) {
                tracing::warn!("Chat not persisted: {e}");
            }
        }
        self.local_chat = Some(ChatOverlay {
            text,
            timestamp: now_ms,
            shown_at: now_ms,
        });
        Ok(())
    }

    /// Run one tick at local time `now_ms`.
    pub fn tick(&mut self, now_ms: u64) -> Frame {
        let events = self.queue.drain();
        let changes = self.registry.apply_batch(events, now_ms);

        if self.registry.participants().values().any(|p| p.moving) {
            self.interpolator
                .advance(self.registry.participants_mut(), now_ms);
        }

        let reaped = self
            .reaper
            .maybe_run(&mut self.registry, &self.chat, now_ms);

        let mut joined = Vec::new();
        let mut left = Vec::new();
        for change in changes {
            match change {
                RegistryChange::Joined(id) => {
                    tracing::debug!(id = %id, "Participant joined");
                    joined.push(id);
                }
                RegistryChange::Left(id) => {
                    tracing::debug!(id = %id, "Participant left");
                    left.push(id);
                }
                RegistryChange::Updated(_) => {}
            }
        }
        if let Some(report) = reaped {
            left.extend(report.evicted);
        }
        for id in &left {
            self.interpolator.forget(id);
        }

        let local = self.local.tick(now_ms);
        self.publish_local(&local);

        let frame = self.build_frame(now_ms, joined, left, local);
        tracing::trace!(
            participants = frame.participants.len(),
            joined = frame.joined.len(),
            left = frame.left.len(),
            "Presence tick"
        );
        frame
    }

    /// The registry as of the last tick.
    pub fn registry(&self) -> &PresenceRegistry {
        &self.registry
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        self.registry.snapshot()
    }

    /// Tear the session down: stop the pumps (which cancels the
    /// persistence subscription), release the transport lease and flush
    /// queued writes. The room is left when the last lease on the shared
    /// connection goes.
    pub async fn shutdown(mut self) -> Option<WriterStats> {
        for pump in self.pumps.drain(..) {
            pump.abort();
        }
        if let Some(lease) = self.transport.take() {
            lease.release();
        }
        self.heartbeat.reset();
        self.persist_throttle.reset();

        let stats = match self.writer.take() {
            Some(writer) => Some(writer.close().await),
            None => None,
        };
        tracing::info!(id = %self.config.local_id, "Presence session closed");
        stats
    }

    fn publish_local(&mut self, motion: &LocalMotion) {
        let target = wire(motion.target);
        if let Some(transport) = &self.transport {
            transport.send_movement(MoveIntent {
                position: target,
                direction: motion.direction,
                moving: motion.moving,
                anim_phase: motion.anim_phase,
                timestamp: motion.timestamp,
            });
        }

        let Some(writer) = &self.writer else {
            return;
        };
        let changed = self
            .persist_throttle
            .admit(motion.timestamp, target, motion.direction, motion.moving);
        if !changed && !self.heartbeat.is_due(motion.timestamp) {
            return;
        }
        let row = PositionRow {
            participant_id: self.config.local_id.to_string(),
            x: motion.target.x,
            y: motion.target.y,
            z: motion.target.z,
            source_x: motion.source.x,
            source_y: motion.source.y,
            source_z: motion.source.z,
            direction: motion.direction,
            appearance_ref: self.config.appearance_ref.clone(),
            display_name: self.config.display_name.clone(),
            timestamp: motion.timestamp,
        };
        match writer.write_position(row) {
            Ok(()) => self.heartbeat.record(motion.timestamp),
            Err(e) => tracing::warn!("Position not persisted: {e}"),
        }
    }

    fn build_frame(
        &mut self,
        now_ms: u64,
        joined: Vec<ParticipantId>,
        left: Vec<ParticipantId>,
        local: LocalMotion,
    ) -> Frame {
        let dt = self.interpolator.frame_dt(now_ms);
        let stale = self.config.stale_threshold;
        let evict = self.config.reaper.eviction_threshold;

        let participants = self
            .registry
            .participants()
            .values()
            .map(|p| {
                let chat_text = self.chat.visible_text(p, now_ms).map(str::to_string);
                RenderState {
                    id: p.id.clone(),
                    display_name: p.display_name.clone(),
                    position: self.interpolator.smoothed(&p.id, p.position, dt),
                    direction: p.direction,
                    compass: Compass::from_angle(p.direction),
                    moving: p.moving,
                    anim_phase: p.anim_phase,
                    label: self.chat.label(p, now_ms).to_string(),
                    chat_text,
                    appearance_ref: p.appearance_ref.clone(),
                    state: p.presence_state(now_ms, stale, evict),
                }
            })
            .collect();

        let local_chat = self
            .local_chat
            .as_ref()
            .filter(|c| c.is_visible(now_ms, self.chat.ttl()))
            .map(|c| c.text.clone());

        Frame {
            timestamp: now_ms,
            participants,
            joined,
            left,
            local,
            local_chat,
        }
    }
}

fn wire(v: Vec3) -> WirePosition {
    WirePosition::new(v.x, v.y, v.z)
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
