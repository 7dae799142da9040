//! Configuration structs with sensible defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// File name of the persisted configuration inside the config directory.
pub const CONFIG_FILE_NAME: &str = "config.ron";

/// Top-level configuration shared by the client and the relay server.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Local participant identity, supplied by the session provider.
    pub identity: IdentityConfig,
    /// Transport settings.
    pub network: NetworkConfig,
    /// Remote presence tracking settings.
    pub presence: PresenceSettings,
    /// Durable store settings.
    pub persistence: PersistenceConfig,
    /// Outbound chat rules.
    pub chat: ChatSettings,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Identity of the local participant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IdentityConfig {
    /// Stable participant id, unique within a room.
    pub participant_id: String,
    /// Name shown above the local avatar on peers.
    pub display_name: String,
    /// Opaque appearance reference forwarded to peers' renderers.
    pub appearance_ref: String,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Relay server address.
    pub server_address: String,
    /// Relay server port.
    pub server_port: u16,
    /// Room to join.
    pub room_id: String,
    /// Minimum interval between outbound movement sends.
    pub send_interval_ms: u64,
    /// Displacement below which a movement send is suppressed.
    pub position_epsilon: f32,
    /// Direction change (radians) below which a movement send is suppressed.
    pub direction_epsilon: f32,
    /// First reconnect delay.
    pub reconnect_initial_ms: u64,
    /// Upper bound for the reconnect delay.
    pub reconnect_max_ms: u64,
    /// Reconnect attempts before giving up (0 = retry forever).
    pub reconnect_max_attempts: u32,
    /// Largest accepted frame payload in bytes.
    pub max_frame_bytes: u32,
}

/// Remote presence tracking configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PresenceSettings {
    /// Dead-reckoning speed in world units per second. Must match peers.
    pub nominal_speed: f32,
    /// Seconds without an accepted event before a participant is evicted.
    pub eviction_threshold_secs: u64,
    /// Seconds without an accepted event before a participant is reported stale.
    pub stale_threshold_secs: u64,
    /// How long a chat overlay stays visible.
    pub chat_ttl_ms: u64,
    /// Interval between reaper passes.
    pub reaper_interval_ms: u64,
    /// Exponential smoothing rate (per second) for rendered positions.
    pub smoothing_rate: f32,
    /// Largest elapsed time fed into one smoothing step.
    pub max_smoothing_step_ms: u64,
    /// Gap beyond which smoothing snaps instead of easing.
    pub snap_distance: f32,
    /// Update tick rate of the host loop.
    pub tick_rate_hz: u32,
}

/// Durable store configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Journal file path. Empty selects the in-memory store.
    pub journal_path: String,
    /// Recency window for the cold-start query.
    pub bootstrap_window_secs: u64,
    /// Interval between forced heartbeat writes.
    pub heartbeat_interval_secs: u64,
    /// Minimum interval between persisted movement rows.
    pub persist_interval_ms: u64,
}

/// Outbound chat rules.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChatSettings {
    /// Maximum message length in characters.
    pub max_message_length: usize,
    /// Messages allowed per rate-limit window.
    pub rate_limit_messages: u32,
    /// Length of the sliding rate-limit window.
    pub rate_limit_window_secs: u64,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
    /// Directory for JSON log files in debug builds. Empty disables them.
    pub log_dir: String,
}

// --- Default implementations ---

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            participant_id: String::new(),
            display_name: "Guest".to_string(),
            appearance_ref: "default".to_string(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1".to_string(),
            server_port: 7878,
            room_id: "lobby".to_string(),
            send_interval_ms: 50,
            position_epsilon: 0.01,
            direction_epsilon: 0.01,
            reconnect_initial_ms: 500,
            reconnect_max_ms: 10_000,
            reconnect_max_attempts: 0,
            max_frame_bytes: 1_048_576,
        }
    }
}

impl Default for PresenceSettings {
    fn default() -> Self {
        Self {
            nominal_speed: 15.0,
            eviction_threshold_secs: 300,
            stale_threshold_secs: 30,
            chat_ttl_ms: 5_000,
            reaper_interval_ms: 1_000,
            smoothing_rate: 12.0,
            max_smoothing_step_ms: 100,
            snap_distance: 10.0,
            tick_rate_hz: 30,
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            journal_path: String::new(),
            bootstrap_window_secs: 300,
            heartbeat_interval_secs: 20,
            persist_interval_ms: 1_000,
        }
    }
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            max_message_length: 200,
            rate_limit_messages: 5,
            rate_limit_window_secs: 10,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: String::new(),
        }
    }
}

// --- Load / Save / Reload ---

impl Config {
    /// Platform config directory for Plaza (`<config_dir>/plaza`), if the
    /// platform has one.
    pub fn default_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("plaza"))
    }

    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE_NAME);

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let config_path = config_dir.join(CONFIG_FILE_NAME);
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }

    /// Hot-reload: returns `Some(new_config)` if the file changed, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE_NAME);
        let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
        let new_config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }

    /// `host:port` of the relay server.
    pub fn server_endpoint(&self) -> String {
        format!(
            "{}:{}",
            self.network.server_address, self.network.server_port
        )
    }
}
