use std::time::Duration;

use plaza_store::MemoryStore;

use super::*;
use crate::events::{ChatEvent, Movement, PresenceEvent, Sighting};
use crate::participant::Provenance;

fn config() -> PresenceConfig {
    let mut config = PresenceConfig::default();
    config.local_id = "me".into();
    config.display_name = "Me".to_string();
    config.interpolation.smoothing_rate = 0.0;
    config
}

fn sighting(id: &str, position: Vec3, timestamp: u64) -> PresenceEvent {
    PresenceEvent::Sighted(Sighting {
        id: id.into(),
        display_name: id.to_uppercase(),
        position,
        direction: 0.0,
        appearance_ref: String::new(),
        timestamp,
        provenance: Provenance::Transport,
    })
}

fn moved(id: &str, target: Vec3, timestamp: u64) -> PresenceEvent {
    PresenceEvent::Moved(Movement {
        id: id.into(),
        target,
        origin: None,
        direction: 0.0,
        moving: true,
        anim_phase: 0.0,
        display_name: None,
        appearance_ref: None,
        timestamp,
        provenance: Provenance::Transport,
    })
}

#[test]
fn test_tick_applies_queued_events() {
    let mut session = PresenceSession::new(config(), Vec3::ZERO);
    let sender = session.sender();
    sender.send(sighting("a", Vec3::ZERO, 10));
    sender.send(moved("a", Vec3::new(15.0, 0.0, 0.0), 20));

    let frame = session.tick(1_000);
    assert_eq!(frame.joined, vec![ParticipantId::from("a")]);
    assert_eq!(frame.participants.len(), 1);
    let a = &frame.participants[0];
    assert!(a.moving);
    assert_eq!(a.state, PresenceState::Moving);
    assert_eq!(a.compass, Compass::East);

    // One second at 15 units/s covers the whole segment.
    let frame = session.tick(2_000);
    let a = &frame.participants[0];
    assert_eq!(a.position, Vec3::new(15.0, 0.0, 0.0));
    assert!(!a.moving);
    assert!(frame.joined.is_empty());
}

#[test]
fn test_events_about_local_participant_are_ignored() {
    let mut session = PresenceSession::new(config(), Vec3::ZERO);
    session.sender().send(sighting("me", Vec3::ONE, 10));
    let frame = session.tick(100);
    assert!(frame.participants.is_empty());
    assert!(frame.joined.is_empty());
}

#[test]
fn test_eviction_is_reported_as_left() {
    let mut config = config();
    config.reaper.eviction_threshold = Duration::from_secs(10);
    let mut session = PresenceSession::new(config, Vec3::ZERO);
    session.sender().send(sighting("a", Vec3::ZERO, 1_000));

    session.tick(1_000);
    let frame = session.tick(11_500);
    assert_eq!(frame.left, vec![ParticipantId::from("a")]);
    assert!(frame.participants.is_empty());
}

#[test]
fn test_chat_label_replaces_name_until_ttl() {
    let mut session = PresenceSession::new(config(), Vec3::ZERO);
    let sender = session.sender();
    sender.send(sighting("b", Vec3::ZERO, 1_000));
    sender.send(PresenceEvent::Chat(ChatEvent {
        id: "b".into(),
        text: "hello".to_string(),
        timestamp: 1_000,
        placement: None,
        provenance: Provenance::Transport,
    }));

    let frame = session.tick(1_100);
    assert_eq!(frame.participants[0].label, "hello");
    assert_eq!(frame.participants[0].chat_text.as_deref(), Some("hello"));

    let frame = session.tick(6_100);
    assert_eq!(frame.participants[0].label, "B");
    assert_eq!(frame.participants[0].chat_text, None);
}

#[test]
fn test_say_validates_and_shows_locally() {
    let mut session = PresenceSession::new(config(), Vec3::ZERO);
    assert_eq!(session.say("   ", 0), Err(ChatRejection::Empty));
    session.say(" hi there ", 1_000).unwrap();

    assert_eq!(session.tick(1_500).local_chat.as_deref(), Some("hi there"));
    assert_eq!(session.tick(6_000).local_chat, None);
}

#[test]
fn test_local_motion_follows_intent() {
    let mut session = PresenceSession::new(config(), Vec3::ZERO);
    session.tick(0);
    session.set_intent(MovementIntent::MoveTo(Vec3::new(0.0, 0.0, 3.0)));

    let frame = session.tick(100);
    assert!(frame.local.moving);
    assert!((frame.local.position.z - 1.5).abs() < 1e-4);
    assert_eq!(frame.local.target, Vec3::new(0.0, 0.0, 3.0));
}

#[tokio::test]
async fn test_heartbeat_rows_written_while_stationary() {
    let store = Arc::new(MemoryStore::new());
    let mut session = PresenceSession::new(config(), Vec3::ONE);
    session.attach_store(store.clone(), 0);

    session.tick(0);
    session.tick(1_000);
    session.tick(10_000);
    session.tick(20_000);

    let stats = session.shutdown().await.unwrap();
    assert_eq!(stats.written, 2);
    assert_eq!(store.rows_written(), 2);
}

#[tokio::test]
async fn test_movement_rows_are_throttled() {
    let store = Arc::new(MemoryStore::new());
    let mut session = PresenceSession::new(config(), Vec3::ZERO);
    session.attach_store(store.clone(), 0);

    session.tick(0);
    session.set_intent(MovementIntent::Steer(Vec3::X));
    for now in (100..=1_000).step_by(100) {
        session.tick(now);
    }

    let stats = session.shutdown().await.unwrap();
    // The first row, then one more once the persist interval elapsed.
    assert_eq!(stats.written, 2);
}

#[tokio::test]
async fn test_say_persists_chat_row() {
    let store = Arc::new(MemoryStore::new());
    let mut session = PresenceSession::new(config(), Vec3::new(2.0, 0.0, 2.0));
    session.attach_store(store.clone(), 0);

    session.say("gg", 500).unwrap();
    session.shutdown().await;

    let row = store.latest_chat("me").unwrap();
    assert_eq!(row.message, "gg");
    assert_eq!(row.x, 2.0);
}
