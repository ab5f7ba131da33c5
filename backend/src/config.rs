use std::env;
use std::path::PathBuf;

use santa_core::{valid_pin, DrawStrategy, DEFAULT_ADMIN_PIN, DEFAULT_MAX_ATTEMPTS};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind_addr: String,
    pub persist_path: Option<PathBuf>,
    /// Admin pin used when no draw state exists yet.
    pub default_admin_pin: String,
    pub strategy: DrawStrategy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            persist_path: None,
            default_admin_pin: DEFAULT_ADMIN_PIN.to_string(),
            strategy: DrawStrategy::default(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("DEFAULT_ADMIN_PIN must be 4-6 digits")]
    InvalidAdminPin,
    #[error("unknown DRAW_STRATEGY {0:?}, expected \"cycle\" or \"rejection\"")]
    UnknownStrategy(String),
    #[error("DRAW_MAX_ATTEMPTS must be an integer >= 1000, got {0:?}")]
    InvalidMaxAttempts(String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(addr) = lookup("BIND_ADDR") {
            config.bind_addr = addr;
        }
        config.persist_path = lookup("PERSIST_PATH")
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);

        if let Some(pin) = lookup("DEFAULT_ADMIN_PIN") {
            if !valid_pin(&pin) {
                return Err(ConfigError::InvalidAdminPin);
            }
            config.default_admin_pin = pin;
        }

        let max_attempts = match lookup("DRAW_MAX_ATTEMPTS") {
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(n) if n >= DEFAULT_MAX_ATTEMPTS => n,
                _ => return Err(ConfigError::InvalidMaxAttempts(raw)),
            },
            None => DEFAULT_MAX_ATTEMPTS,
        };

        config.strategy = match lookup("DRAW_STRATEGY").as_deref().map(str::trim) {
            None | Some("cycle") => DrawStrategy::Cycle,
            Some("rejection") => DrawStrategy::Rejection { max_attempts },
            Some(other) => return Err(ConfigError::UnknownStrategy(other.to_string())),
        };

        Ok(config)
    }
}
