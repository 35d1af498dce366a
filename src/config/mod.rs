//! Configuration for the LudoRush server
//!
//! Centralized configuration with file-based overrides:
//! - Turn-phase and reconnection timing budgets
//! - Matchmaking stake limits and debounce
//! - Gateway listen address

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub timing: TimingConfig,
    pub matchmaking: MatchmakingConfig,
}

/// Gateway-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen_address: String,
    pub listen_port: u16,
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0".to_string(),
            listen_port: 8090,
            log_level: "info".to_string(),
        }
    }
}

/// Wall-clock budgets for turn phases and the disconnect window.
///
/// Every bounded wait in the engine comes from here; the session cancels the
/// matching timer (by epoch) as soon as the awaited event arrives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Budget for the Roll phase before the server auto-rolls
    #[serde(with = "humantime_serde")]
    pub roll_timeout: Duration,
    /// Budget for the Move phase before the server picks the first legal move
    #[serde(with = "humantime_serde")]
    pub move_timeout: Duration,
    /// Reconnection window after a disconnect before the opponent wins
    #[serde(with = "humantime_serde")]
    pub reconnect_window: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            roll_timeout: Duration::from_secs(15),
            move_timeout: Duration::from_secs(15),
            reconnect_window: Duration::from_secs(60),
        }
    }
}

/// Matchmaking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchmakingConfig {
    /// Delay between enqueue and the scheduled matching attempt
    #[serde(with = "humantime_serde")]
    pub match_debounce: Duration,
    pub min_stake: u64,
    pub max_stake: u64,
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        Self {
            match_debounce: Duration::from_millis(250),
            min_stake: 10,
            max_stake: 100_000,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, falling back to defaults for
    /// missing sections.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("failed to read config file: {}", e)))?;
        let config: Config =
            toml::from_str(&raw).map_err(|e| Error::Config(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.matchmaking.min_stake == 0 {
            return Err(Error::Config("min_stake must be positive".to_string()));
        }
        if self.matchmaking.max_stake < self.matchmaking.min_stake {
            return Err(Error::Config(
                "max_stake must be at least min_stake".to_string(),
            ));
        }
        if self.timing.roll_timeout.is_zero() || self.timing.move_timeout.is_zero() {
            return Err(Error::Config("turn budgets must be positive".to_string()));
        }
        Ok(())
    }
}
