//! Configuration — engine timing knobs and server settings as TOML values
//!
//! Every constant that operators may want to tune is a field here
//! (20-minute redistribution interval, 8-second reconciliation budget
//! by default).
//!
//! ## Loading order
//!
//! 1. `ESKALA_CONFIG` environment variable (path to a TOML file)
//! 2. `eskala.toml` in the current working directory
//! 3. Built-in defaults

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Root configuration for one engine deployment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Engine timing knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Staleness window after which an unresolved assignment is reclaimed.
    #[serde(default = "default_redistribution_interval_secs")]
    pub redistribution_interval_secs: u64,
    /// Wall-clock budget for one reconciliation request.
    #[serde(default = "default_reconcile_budget_ms")]
    pub reconcile_budget_ms: u64,
}

fn default_redistribution_interval_secs() -> u64 {
    20 * 60
}

fn default_reconcile_budget_ms() -> u64 {
    8_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            redistribution_interval_secs: default_redistribution_interval_secs(),
            reconcile_budget_ms: default_reconcile_budget_ms(),
        }
    }
}

impl EngineConfig {
    pub fn redistribution_interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.redistribution_interval_secs as i64)
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Directory for the sled database.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("eskala_data")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            data_dir: default_data_dir(),
        }
    }
}

impl AppConfig {
    /// Load configuration using the documented search order. Falls back to
    /// defaults on a missing file; a present-but-malformed file also falls
    /// back, loudly, rather than killing startup.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("ESKALA_CONFIG") {
            info!(path = %path, "Loading config from ESKALA_CONFIG");
            return Self::load_from_path(Path::new(&path));
        }

        let local = Path::new("eskala.toml");
        if local.exists() {
            info!("Loading config from ./eskala.toml");
            return Self::load_from_path(local);
        }

        info!("No config file found, using built-in defaults");
        Self::default()
    }

    pub fn load_from_path(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => config,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Malformed config, using defaults");
                    Self::default()
                }
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not read config, using defaults");
                Self::default()
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
