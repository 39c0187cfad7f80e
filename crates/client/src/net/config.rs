use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use pulse::{DEFAULT_HOST, DEFAULT_PORT};

pub const DEFAULT_RECONNECT_DELAYS_SECS: [f32; 6] = [5.0, 10.0, 15.0, 20.0, 25.0, 30.0];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub client_name: String,
    pub handshake_timeout_secs: f32,
    pub heartbeat_interval_secs: f32,
    pub connection_timeout_secs: f32,
    pub session_timeout_secs: f32,
    pub reconnect_delays_secs: Vec<f32>,
    pub auto_reconnect: bool,
    pub session_reconnect: bool,
    pub inbox_capacity: usize,
    pub move_speed: f32,
    pub correction_threshold: f32,
    pub max_local_history: usize,
    pub interpolation_rate: f32,
    pub extrapolation_limit_secs: f32,
    pub max_snapshots: usize,
    pub snapshot_max_age_secs: f32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            client_name: "pulse-client".to_string(),
            handshake_timeout_secs: 3.0,
            heartbeat_interval_secs: 5.0,
            connection_timeout_secs: 15.0,
            session_timeout_secs: 30.0,
            reconnect_delays_secs: DEFAULT_RECONNECT_DELAYS_SECS.to_vec(),
            auto_reconnect: true,
            session_reconnect: true,
            inbox_capacity: pulse::net::DEFAULT_INBOX_CAPACITY,
            move_speed: 5.0,
            correction_threshold: 0.5,
            max_local_history: 60,
            interpolation_rate: 10.0,
            extrapolation_limit_secs: 0.5,
            max_snapshots: 10,
            snapshot_max_age_secs: 2.0,
        }
    }
}

impl ClientConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    pub fn handshake_timeout(&self) -> Duration {
        secs(self.handshake_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        secs(self.heartbeat_interval_secs)
    }

    pub fn connection_timeout(&self) -> Duration {
        secs(self.connection_timeout_secs)
    }

    pub fn session_timeout(&self) -> Duration {
        secs(self.session_timeout_secs)
    }

    pub fn reconnect_delays(&self) -> Vec<Duration> {
        self.reconnect_delays_secs.iter().copied().map(secs).collect()
    }
}

fn secs(value: f32) -> Duration {
    Duration::try_from_secs_f32(value.max(0.0)).unwrap_or(Duration::ZERO)
}
