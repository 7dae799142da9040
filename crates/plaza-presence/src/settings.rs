//! Runtime settings derived from the on-disk [`Config`].

use std::time::Duration;

use plaza_config::Config;
use plaza_net::{FrameConfig, ReconnectConfig, ThrottleConfig, TransportConfig};

use crate::chat::ChatRules;
use crate::interpolation::InterpolationConfig;
use crate::participant::ParticipantId;
use crate::reaper::ReaperConfig;

/// Everything a [`PresenceSession`](crate::PresenceSession) needs.
#[derive(Debug, Clone)]
pub struct PresenceConfig {
    pub local_id: ParticipantId,
    pub display_name: String,
    pub appearance_ref: String,
    pub room_id: String,
    pub interpolation: InterpolationConfig,
    pub reaper: ReaperConfig,
    /// Idle time after which a participant is reported stale.
    pub stale_threshold: Duration,
    pub chat_ttl: Duration,
    pub chat_rules: ChatRules,
    /// How far back the cold-start query looks.
    pub bootstrap_window: Duration,
    /// Longest gap between persisted local position rows.
    pub heartbeat_interval: Duration,
    /// Throttle for persisted movement rows. Slower than the transport's.
    pub persist_throttle: ThrottleConfig,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for PresenceConfig {
    fn from(config: &Config) -> Self {
        let presence = &config.presence;
        Self {
            local_id: ParticipantId::new(config.identity.participant_id.clone()),
            display_name: config.identity.display_name.clone(),
            appearance_ref: config.identity.appearance_ref.clone(),
            room_id: config.network.room_id.clone(),
            interpolation: InterpolationConfig {
                nominal_speed: presence.nominal_speed,
                smoothing_rate: presence.smoothing_rate,
                max_smoothing_step: Duration::from_millis(presence.max_smoothing_step_ms),
                snap_distance: presence.snap_distance,
            },
            reaper: ReaperConfig {
                eviction_threshold: Duration::from_secs(presence.eviction_threshold_secs),
                interval: Duration::from_millis(presence.reaper_interval_ms),
            },
            stale_threshold: Duration::from_secs(presence.stale_threshold_secs),
            chat_ttl: Duration::from_millis(presence.chat_ttl_ms),
            chat_rules: ChatRules {
                max_message_length: config.chat.max_message_length,
                rate_limit_messages: config.chat.rate_limit_messages,
                rate_limit_window: Duration::from_secs(config.chat.rate_limit_window_secs),
            },
            bootstrap_window: Duration::from_secs(config.persistence.bootstrap_window_secs),
            heartbeat_interval: Duration::from_secs(config.persistence.heartbeat_interval_secs),
            persist_throttle: ThrottleConfig {
                interval: Duration::from_millis(config.persistence.persist_interval_ms),
                position_epsilon: config.network.position_epsilon,
                direction_epsilon: config.network.direction_epsilon,
            },
        }
    }
}

/// Transport client settings for the configured server.
pub fn transport_config(config: &Config) -> TransportConfig {
    let network = &config.network;
    TransportConfig {
        server_addr: config.server_endpoint(),
        frame: FrameConfig {
            max_payload_size: network.max_frame_bytes,
        },
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(network.reconnect_initial_ms),
            max_delay: Duration::from_millis(network.reconnect_max_ms),
            max_attempts: network.reconnect_max_attempts,
            ..ReconnectConfig::default()
        },
        throttle: ThrottleConfig {
            interval: Duration::from_millis(network.send_interval_ms),
            position_epsilon: network.position_epsilon,
            direction_epsilon: network.direction_epsilon,
        },
        ..TransportConfig::default()
    }
}
