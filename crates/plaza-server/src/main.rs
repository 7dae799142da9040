//! Room relay server.
//!
//! Listens on the configured port on every interface and relays presence
//! traffic between the members of each room until interrupted.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use plaza_config::{CliArgs, Config};
use plaza_net::{FrameConfig, RoomServer, RoomServerConfig};

fn server_config(config: &Config) -> RoomServerConfig {
    RoomServerConfig {
        bind_addr: SocketAddr::from(([0, 0, 0, 0], config.network.server_port)),
        frame: FrameConfig {
            max_payload_size: config.network.max_frame_bytes,
        },
        ..RoomServerConfig::default()
    }
}

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    let config = match Config::resolve(&args) {
        Ok(config) => config,
        Err(e) => {
            plaza_log::init_logging(None, false, None);
            tracing::error!("Failed to load config: {e}");
            std::process::exit(1);
        }
    };
    let log_dir = (!config.debug.log_dir.is_empty()).then(|| PathBuf::from(&config.debug.log_dir));
    plaza_log::init_logging(log_dir.as_deref(), cfg!(debug_assertions), Some(&config));

    let server = Arc::new(RoomServer::new(server_config(&config)));
    let srv = Arc::clone(&server);
    let mut accept = tokio::spawn(async move { srv.run().await });

    tokio::select! {
        result = &mut accept => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!("Room server failed: {e}");
                    std::process::exit(1);
                }
                Err(e) => {
                    tracing::error!("Room server task panicked: {e}");
                    std::process::exit(1);
                }
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, shutting down");
            server.shutdown();
            let _ = accept.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_binds_configured_port() {
        let mut config = Config::default();
        config.network.server_port = 9123;
        config.network.max_frame_bytes = 4_096;
        let server = server_config(&config);
        assert_eq!(server.bind_addr.port(), 9123);
        assert!(server.bind_addr.ip().is_unspecified());
        assert_eq!(server.frame.max_payload_size, 4_096);
    }
}
