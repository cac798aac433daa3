use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;

pub type Degrees = f64;

/// Static configuration, effective at startup; never hot-reloaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub latitude: Degrees,
    pub longitude: Degrees,
    pub altitude: f64,

    pub serial_port: String,
    pub serial_baud: u32,
    pub serial_timeout_millis: u64,
    pub serial_retries: u32,

    pub steps_per_rotation: i64,
    pub home_azimuth: Degrees,
    pub park_azimuth: Degrees,

    pub tracking_max_separation: Degrees,

    pub idle_loop_delay_secs: u64,
    pub moving_loop_delay_secs: u64,

    pub azimuth_move_timeout_secs: u64,
    pub shutter_move_timeout_secs: u64,

    pub dome_radius_cm: f64,
    pub telescope_offset_x_cm: f64,

    pub control_ips: Vec<IpAddr>,
    pub telescope_ips: Vec<IpAddr>,

    /// Ambient, non-domain settings: logging and the remote surface's bind
    /// address. Not part of the dome's state machine.
    pub log_filter: String,
    pub bind_address: SocketAddr,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            latitude: 51.47,
            longitude: 0.0,
            altitude: 15.0,

            serial_port: "/dev/ttyUSB0".to_string(),
            serial_baud: 9600,
            serial_timeout_millis: 500,
            serial_retries: 5,

            steps_per_rotation: 1_000_000,
            home_azimuth: 0.0,
            park_azimuth: 0.0,

            tracking_max_separation: 2.0,

            idle_loop_delay_secs: 5,
            moving_loop_delay_secs: 1,

            azimuth_move_timeout_secs: 120,
            shutter_move_timeout_secs: 120,

            dome_radius_cm: 350.0,
            telescope_offset_x_cm: 0.0,

            control_ips: Vec::new(),
            telescope_ips: Vec::new(),

            log_filter: "info".to_string(),
            bind_address: "0.0.0.0:5555".parse().unwrap(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl Config {
    /// Loads configuration from a JSON file. Which path to read, hot reload,
    /// and env overrides belong to the process that owns startup; this is
    /// the thin, side-effect-free parse step.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let text = std::fs::read_to_string(path_ref).map_err(|source| ConfigError::Io {
            path: path_ref.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_ref.display().to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_authorised_callers() {
        let config = Config::default();
        assert!(config.control_ips.is_empty());
        assert!(config.telescope_ips.is_empty());
    }

    #[test]
    fn round_trips_through_json() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.home_azimuth, config.home_azimuth);
        assert_eq!(parsed.control_ips, config.control_ips);
    }
}
