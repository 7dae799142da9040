//! Headless Plaza client.
//!
//! Joins the configured room, wanders around, chats now and then, and logs
//! what a renderer would draw each tick. Useful for populating a room while
//! developing against a relay server.

mod wander;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use glam::Vec3;
use plaza_config::{CliArgs, Config};
use plaza_net::{ConnectionManager, unix_millis};
use plaza_presence::{Frame, PresenceConfig, PresenceSession, transport_config};
use plaza_store::{JournalStore, MemoryStore, PersistenceClient, StoreError};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::time::MissedTickBehavior;

use crate::wander::{WanderConfig, Wanderer};

/// Fill in a random guest identity when none was configured.
fn ensure_identity(config: &mut Config) {
    if config.identity.participant_id.is_empty() {
        config.identity.participant_id = format!("guest-{:08x}", rand::random::<u32>());
        tracing::info!(id = %config.identity.participant_id, "No participant id configured, using a guest id");
    }
}

async fn open_store(config: &Config) -> Result<Arc<dyn PersistenceClient>, StoreError> {
    let path = &config.persistence.journal_path;
    if path.is_empty() {
        tracing::info!("No journal configured, persisting in memory");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let store = JournalStore::open(path).await?;
    tracing::info!("Persisting to {path}");
    Ok(Arc::new(store))
}

fn tick_period(config: &Config) -> Duration {
    Duration::from_secs_f64(1.0 / f64::from(config.presence.tick_rate_hz.max(1)))
}

fn report(frame: &Frame) {
    for id in &frame.joined {
        tracing::info!(participant = %id, "Joined");
    }
    for id in &frame.left {
        tracing::info!(participant = %id, "Left");
    }
    for p in &frame.participants {
        if let Some(text) = &p.chat_text {
            tracing::debug!(participant = %p.id, "{}: {text}", p.display_name);
        }
        tracing::trace!(
            participant = %p.id,
            x = p.position.x,
            z = p.position.z,
            compass = ?p.compass,
            moving = p.moving,
            state = ?p.state,
            "Render"
        );
    }
}

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    let mut config = match Config::resolve(&args) {
        Ok(config) => config,
        Err(e) => {
            plaza_log::init_logging(None, false, None);
            tracing::error!("Failed to load config: {e}");
            std::process::exit(1);
        }
    };
    let log_dir = (!config.debug.log_dir.is_empty()).then(|| PathBuf::from(&config.debug.log_dir));
    plaza_log::init_logging(log_dir.as_deref(), cfg!(debug_assertions), Some(&config));
    ensure_identity(&mut config);

    let store = match open_store(&config).await {
        Ok(store) => store,
        Err(e) => {
            tracing::error!("Failed to open journal: {e}");
            std::process::exit(1);
        }
    };
    let manager = ConnectionManager::new(transport_config(&config));

    let mut session = PresenceSession::new(PresenceConfig::from(&config), Vec3::ZERO);
    session.attach_store(store, unix_millis());
    if let Err(e) = session.attach_transport(manager.acquire(), unix_millis()) {
        tracing::error!("Failed to join room: {e}");
        std::process::exit(1);
    }

    let mut wanderer = Wanderer::new(WanderConfig::default(), StdRng::from_os_rng());
    let mut ticker = tokio::time::interval(tick_period(&config));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = unix_millis();
                let frame = session.tick(now);
                report(&frame);
                if let Some(intent) = wanderer.next_intent(&frame.local) {
                    session.set_intent(intent);
                }
                if let Some(line) = wanderer.next_line(now)
                    && let Err(e) = session.say(line, now)
                {
                    tracing::debug!("Chat line dropped: {e}");
                }
            }
            _ = &mut shutdown => {
                tracing::info!("Interrupted, leaving room");
                break;
            }
        }
    }

    if let Some(stats) = session.shutdown().await {
        tracing::info!(written = stats.written, failed = stats.failed, "Store writer closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guest_identity_only_when_missing() {
        let mut config = Config::default();
        ensure_identity(&mut config);
        assert!(config.identity.participant_id.starts_with("guest-"));

        config.identity.participant_id = "ann".to_string();
        ensure_identity(&mut config);
        assert_eq!(config.identity.participant_id, "ann");
    }

    #[test]
    fn test_tick_period_follows_rate() {
        let mut config = Config::default();
        config.presence.tick_rate_hz = 20;
        assert_eq!(tick_period(&config), Duration::from_millis(50));
        config.presence.tick_rate_hz = 0;
        assert_eq!(tick_period(&config), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_empty_journal_path_uses_memory_store() {
        let config = Config::default();
        assert!(open_store(&config).await.is_ok());

        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.persistence.journal_path = dir.path().join("app.journal").display().to_string();
        assert!(open_store(&config).await.is_ok());
    }
}
