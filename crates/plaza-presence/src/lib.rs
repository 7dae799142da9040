//! Remote presence for a shared world: reconciliation of room and store
//! events into one participant map, dead reckoning, staleness eviction,
//! chat overlays, and the local participant's own movement.
//!
//! [`PresenceSession`] ties the pieces together behind a single tick.

pub mod chat;
pub mod events;
pub mod ingest;
pub mod interpolation;
pub mod local;
pub mod participant;
pub mod reaper;
pub mod registry;
pub mod session;
pub mod settings;

pub use chat::{ChatOverlayManager, ChatRejection, ChatRules, RateTracker, supersedes};
pub use events::{ChatEvent, EventQueue, EventSender, Movement, PresenceEvent, Sighting};
pub use ingest::{
    IngestError, from_bootstrap_row, from_stored, from_transport, spawn_bootstrap,
    spawn_store_pump, spawn_transport_pump,
};
pub use interpolation::{
    InterpolationConfig, MovementInterpolator, Smoother, begin_segment, progress,
    segment_direction,
};
pub use local::{HeartbeatTimer, LocalMotion, LocalMovementController, MovementIntent};
pub use participant::{ChatOverlay, Compass, Participant, ParticipantId, PresenceState, Provenance};
pub use reaper::{ReapReport, ReaperConfig, StalenessReaper};
pub use registry::{ParticipantMap, PresenceRegistry, Rejection, RegistryChange, RegistrySnapshot};
pub use session::{Frame, PresenceSession, RenderState};
pub use settings::{PresenceConfig, transport_config};
