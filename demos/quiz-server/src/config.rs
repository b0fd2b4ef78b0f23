//! Environment-driven server configuration.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use live_session_core::MasterConfig;

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key}: invalid value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("{0}")]
    Master(#[from] live_session_core::ConfigError),
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the HTTP/WebSocket server binds to.
    pub bind_addr: SocketAddr,
    /// Sessions this instance competes for.
    pub session_ids: Vec<String>,
    /// Directory holding one lock file per session.
    pub lock_dir: PathBuf,
    /// Per-client delivery deadline.
    pub send_timeout: Duration,
    /// Session master timings.
    pub master: MasterConfig,
}

impl ServerConfig {
    /// Read configuration from the process environment.
    ///
    /// # Errors
    /// Returns error if a variable is set to an unparsable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`, falling back to defaults.
    ///
    /// # Errors
    /// Returns error if a value cannot be parsed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = match lookup("QUIZ_BIND_ADDR") {
            Some(value) => value.parse().map_err(|e: std::net::AddrParseError| {
                ConfigError::Invalid {
                    key: "QUIZ_BIND_ADDR",
                    reason: e.to_string(),
                    value,
                }
            })?,
            None => SocketAddr::from(([127, 0, 0, 1], 3000)),
        };

        let mut session_ids: Vec<String> = Vec::new();
        let raw_ids = lookup("QUIZ_SESSION_IDS").unwrap_or_else(|| "session-101".to_string());
        for id in raw_ids.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            if !session_ids.iter().any(|known| known == id) {
                session_ids.push(id.to_string());
            }
        }

        let lock_dir = lookup("QUIZ_LOCK_DIR").map_or_else(|| PathBuf::from(".locks"), PathBuf::from);
        let send_timeout = seconds(&lookup, "QUIZ_SEND_TIMEOUT", 5.0)?;
        if send_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                key: "QUIZ_SEND_TIMEOUT",
                value: lookup("QUIZ_SEND_TIMEOUT").unwrap_or_default(),
                reason: "must be greater than zero".to_string(),
            });
        }
        let dispatch_interval = seconds(&lookup, "QUIZ_QUESTION_INTERVAL", 6.0)?;

        let master = MasterConfig::new(dispatch_interval);
        master.validate()?;

        Ok(Self {
            bind_addr,
            session_ids,
            lock_dir,
            send_timeout,
            master,
        })
    }
}

fn seconds(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: f64,
) -> Result<Duration, ConfigError> {
    let Some(value) = lookup(key) else {
        return Ok(Duration::from_secs_f64(default));
    };
    let secs: f64 = value.trim().parse().map_err(|e: std::num::ParseFloatError| {
        ConfigError::Invalid {
            key,
            value: value.clone(),
            reason: e.to_string(),
        }
    })?;
    Duration::try_from_secs_f64(secs).map_err(|e| ConfigError::Invalid {
        key,
        value,
        reason: e.to_string(),
    })
}
