//! Startup configuration: CLI flags via `clap`, merged with an optional
//! JSON file, read once at startup. A missing config file just means
//! defaults apply.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use thiserror::Error;

#[derive(Parser, Debug)]
#[command(
    name = "relay-server",
    version,
    about = "Authoritative session server for the underwater creature game"
)]
pub struct Cli {
    /// Address to bind the websocket listener on.
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub listen: SocketAddr,
    /// Maximum participants per room.
    #[arg(long, default_value_t = 32)]
    pub room_capacity: usize,
    /// BATCH_POSITIONS broadcast rate in Hz.
    #[arg(long, default_value_t = 20)]
    pub tick_rate: u32,
    /// Optional JSON file overriding the flags above.
    #[arg(long, default_value = "RelayConfig.json")]
    pub config: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct ConfigFile {
    room_capacity: Option<usize>,
    tick_rate: Option<u32>,
    bad_frame_threshold: Option<u32>,
    bad_frame_window_secs: Option<u64>,
}

/// Per-room limits, threaded from [`RelayConfig`] into every [`crate::room::Room`].
#[derive(Debug, Clone, Copy)]
pub struct RoomConfig {
    pub capacity: usize,
    pub tick_rate_hz: u32,
    /// Bad frames allowed within `bad_frame_window` before the connection
    /// that sent them is closed for sustained abuse.
    pub bad_frame_threshold: u32,
    pub bad_frame_window: Duration,
}

impl RoomConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate_hz as f64)
    }
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub listen: SocketAddr,
    pub room: RoomConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("tick_rate must be within [1, 60], got {0}")]
    TickRateOutOfRange(u32),
}

impl RelayConfig {
    /// Loads the config file named by `cli.config` if it exists, falling
    /// back to defaults when it doesn't. CLI flags win over file-absent
    /// defaults but lose to values explicitly present in the file, matching
    /// "flags are the floor, the file is the override" in SPEC_FULL.
    pub async fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let file = match tokio::fs::read_to_string(&cli.config).await {
            Ok(contents) => serde_json::from_str::<ConfigFile>(&contents).map_err(|source| {
                ConfigError::Parse {
                    path: cli.config.clone(),
                    source,
                }
            })?,
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => ConfigFile::default(),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: cli.config.clone(),
                    source,
                });
            }
        };

        let tick_rate_hz = file.tick_rate.unwrap_or(cli.tick_rate);
        if !(1..=60).contains(&tick_rate_hz) {
            return Err(ConfigError::TickRateOutOfRange(tick_rate_hz));
        }

        Ok(RelayConfig {
            listen: cli.listen,
            room: RoomConfig {
                capacity: file.room_capacity.unwrap_or(cli.room_capacity),
                tick_rate_hz,
                bad_frame_threshold: file.bad_frame_threshold.unwrap_or(16),
                bad_frame_window: Duration::from_secs(file.bad_frame_window_secs.unwrap_or(10)),
            },
        })
    }
}
