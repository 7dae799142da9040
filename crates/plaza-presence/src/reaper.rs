//! Periodic removal of silent participants and expired chat overlays.

use std::time::Duration;

use crate::chat::ChatOverlayManager;
use crate::participant::{ParticipantId, duration_ms};
use crate::registry::PresenceRegistry;

#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// A participant with no accepted event for longer than this is removed.
    pub eviction_threshold: Duration,
    /// Time between passes.
    pub interval: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            eviction_threshold: Duration::from_secs(300),
            interval: Duration::from_secs(1),
        }
    }
}

/// What one pass removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub evicted: Vec<ParticipantId>,
    pub chats_expired: usize,
}

impl ReapReport {
    pub fn is_empty(&self) -> bool {
        self.evicted.is_empty() && self.chats_expired == 0
    }
}

/// Runs eviction and chat expiry on its own fixed interval, independent of
/// how often the caller ticks.
#[derive(Debug, Clone)]
pub struct StalenessReaper {
    config: ReaperConfig,
    last_run: Option<u64>,
}

impl StalenessReaper {
    pub fn new(config: ReaperConfig) -> Self {
        Self {
            config,
            last_run: None,
        }
    }

    pub fn config(&self) -> &ReaperConfig {
        &self.config
    }

    /// `true` if a pass is due at `now_ms`. The first call is always due.
    pub fn is_due(&self, now_ms: u64) -> bool {
        self.last_run
            .is_none_or(|last| now_ms.saturating_sub(last) >= duration_ms(self.config.interval))
    }

    /// Run a pass if one is due.
    pub fn maybe_run(
        &mut self,
        registry: &mut PresenceRegistry,
        chat: &ChatOverlayManager,
        now_ms: u64,
    ) -> Option<ReapReport> {
        self.is_due(now_ms).then(|| self.run(registry, chat, now_ms))
    }

    /// Evict silent participants and clear expired overlays now.
    ///
    /// The registry map is only copied when something is actually removed.
    pub fn run(
        &mut self,
        registry: &mut PresenceRegistry,
        chat: &ChatOverlayManager,
        now_ms: u64,
    ) -> ReapReport {
        self.last_run = Some(now_ms);
        let threshold = duration_ms(self.config.eviction_threshold);

        let evicted: Vec<ParticipantId> = registry
            .participants()
            .values()
            .filter(|p| p.idle_ms(now_ms) > threshold)
            .map(|p| p.id.clone())
            .collect();
        let expiring = chat.expired_count(registry.participants(), now_ms);
        if evicted.is_empty() && expiring == 0 {
            return ReapReport::default();
        }

        let participants = registry.participants_mut();
        for id in &evicted {
            if let Some(p) = participants.remove(id) {
                tracing::info!(id = %id, idle_ms = p.idle_ms(now_ms), "Evicted silent participant");
            }
        }
        let chats_expired = chat.expire(participants, now_ms);
        tracing::trace!(chats_expired, "Chat overlays expired");

        ReapReport {
            evicted,
            chats_expired,
        }
    }
}
