//! Command-line argument parsing shared by the Plaza binaries.

use std::path::PathBuf;

use clap::Parser;

use crate::{Config, ConfigError};

/// Plaza command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "plaza", about = "Plaza shared-world presence")]
pub struct CliArgs {
    /// Relay server address.
    #[arg(long)]
    pub server: Option<String>,

    /// Relay server port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Room to join.
    #[arg(long)]
    pub room: Option<String>,

    /// Local participant id.
    #[arg(long)]
    pub id: Option<String>,

    /// Local display name.
    #[arg(long)]
    pub name: Option<String>,

    /// Journal file for the durable store.
    #[arg(long)]
    pub journal: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Load the config from `--config` (or the platform default directory)
    /// and apply the remaining CLI overrides on top.
    pub fn resolve(args: &CliArgs) -> Result<Self, ConfigError> {
        let dir = match args.config {
            Some(ref dir) => dir.clone(),
            None => Config::default_dir().ok_or(ConfigError::NoConfigDir)?,
        };
        let mut config = Config::load_or_create(&dir)?;
        config.apply_cli_overrides(args);
        Ok(config)
    }

    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref addr) = args.server {
            self.network.server_address = addr.clone();
        }
        if let Some(port) = args.port {
            self.network.server_port = port;
        }
        if let Some(ref room) = args.room {
            self.network.room_id = room.clone();
        }
        if let Some(ref id) = args.id {
            self.identity.participant_id = id.clone();
        }
        if let Some(ref name) = args.name {
            self.identity.display_name = name.clone();
        }
        if let Some(ref journal) = args.journal {
            self.persistence.journal_path = journal.display().to_string();
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_override() {
        let mut config = Config::default();
        let args = CliArgs {
            server: Some("192.168.1.1".to_string()),
            room: Some("garden".to_string()),
            id: Some("bob".to_string()),
            ..Default::default()
        };
        config.apply_cli_overrides(&args);
        assert_eq!(config.network.server_address, "192.168.1.1");
        assert_eq!(config.network.room_id, "garden");
        assert_eq!(config.identity.participant_id, "bob");
        // Non-overridden fields retain defaults
        assert_eq!(config.network.server_port, 7878);
        assert_eq!(config.identity.display_name, "Guest");
    }

    #[test]
    fn test_cli_no_override() {
        let original = Config::default();
        let mut config = Config::default();
        config.apply_cli_overrides(&CliArgs::default());
        assert_eq!(config, original);
    }

    #[test]
    fn test_resolve_uses_explicit_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let args = CliArgs {
            config: Some(dir.path().to_path_buf()),
            room: Some("atrium".to_string()),
            ..Default::default()
        };
        let config = Config::resolve(&args).unwrap();
        assert_eq!(config.network.room_id, "atrium");
        assert!(dir.path().join(crate::CONFIG_FILE_NAME).exists());
    }

    #[test]
    fn test_cli_parses_flags() {
        let args = CliArgs::parse_from([
            "plaza",
            "--port",
            "9000",
            "--name",
            "Carol",
            "--journal",
            "/tmp/plaza.journal",
        ]);
        let mut config = Config::default();
        config.apply_cli_overrides(&args);
        assert_eq!(config.network.server_port, 9000);
        assert_eq!(config.identity.display_name, "Carol");
        assert_eq!(config.persistence.journal_path, "/tmp/plaza.journal");
    }
}
