//! Environment-driven configuration.
//!
//! Everything is read once at startup; tests construct the struct
//! directly. `DATABASE_URL` follows the usual combined connection
//! string convention.

use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    /// Default search radius for POI association, metres.
    pub association_radius_m: f64,
    /// Default elevation sampling resolution, metres.
    pub elevation_resolution_m: f64,
    /// Directory holding road graph snapshots.
    pub graph_snapshot_dir: String,
    /// Per-operation deadline.
    pub operation_timeout: Duration,
}

pub const DEFAULT_ASSOCIATION_RADIUS_M: f64 = 2000.0;
pub const DEFAULT_ELEVATION_RESOLUTION_M: f64 = 100.0;
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_GRAPH_SNAPSHOT_DIR: &str = "./graph_snapshots";

impl Config {
    pub fn from_env() -> Result<Config, crate::errors::EngineError> {
        let database_url = std::env::var("DATABASE_URL").map_err(|_| {
            crate::errors::EngineError::InvalidInput("DATABASE_URL must be set".to_string())
        })?;

        Ok(Config {
            database_url,
            association_radius_m: env_f64("ASSOCIATION_RADIUS_M", DEFAULT_ASSOCIATION_RADIUS_M)?,
            elevation_resolution_m: env_f64(
                "ELEVATION_RESOLUTION_M",
                DEFAULT_ELEVATION_RESOLUTION_M,
            )?,
            graph_snapshot_dir: std::env::var("GRAPH_SNAPSHOT_DIR")
                .unwrap_or_else(|_| DEFAULT_GRAPH_SNAPSHOT_DIR.to_string()),
            operation_timeout: Duration::from_secs(env_u64(
                "OPERATION_TIMEOUT_SECS",
                DEFAULT_OPERATION_TIMEOUT_SECS,
            )?),
        })
    }

    pub fn timeout_secs(&self) -> u64 {
        self.operation_timeout.as_secs()
    }
}

fn env_f64(key: &str, default: f64) -> Result<f64, crate::errors::EngineError> {
    match std::env::var(key) {
        Ok(raw) => raw.parse::<f64>().map_err(|_| {
            crate::errors::EngineError::InvalidInput(format!("{} must be a number, got {}", key, raw))
        }),
        Err(_) => Ok(default),
    }
}

fn env_u64(key: &str, default: u64) -> Result<u64, crate::errors::EngineError> {
    match std::env::var(key) {
        Ok(raw) => raw.parse::<u64>().map_err(|_| {
            crate::errors::EngineError::InvalidInput(format!("{} must be an integer, got {}", key, raw))
        }),
        Err(_) => Ok(default),
    }
}
