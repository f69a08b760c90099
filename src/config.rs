//! Engine configuration parameters
//!
//! Tunables for client and service sessions.  Both structs deserialize from
//! JSON so a process entry point can load them from a file or environment.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Default per-request timeout when a session is built with 0.
pub const DEFAULT_TIMEOUT_MS: u32 = 4000;

/// Default total send attempts for a retriable request.
pub const DEFAULT_MAX_TRY_COUNT: u32 = 2;

/// Default ceiling on request and response payloads (10 MB).
pub const DEFAULT_MAX_PAYLOAD: usize = 10 * 1000 * 1000;

/// Client session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Timeout applied to requests that do not set their own (milliseconds)
    pub default_timeout_ms: u32,
    /// Total send attempts for requests without NoRetry/NeedAffinity
    pub max_try_count: u32,
    /// Largest payload accepted by `add_request` (bytes)
    pub max_request_size: usize,
    /// Largest response payload accepted from a service (bytes)
    pub max_response_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            max_try_count: DEFAULT_MAX_TRY_COUNT,
            max_request_size: DEFAULT_MAX_PAYLOAD,
            max_response_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_timeout_ms == 0 {
            return Err(ConfigError::ValidationFailed("default_timeout_ms must be > 0"));
        }
        if self.max_try_count == 0 {
            return Err(ConfigError::ValidationFailed("max_try_count must be >= 1"));
        }
        if self.max_request_size == 0 || self.max_response_size == 0 {
            return Err(ConfigError::ValidationFailed("payload limits must be > 0"));
        }
        Ok(())
    }

    /// Parse and validate a JSON document.  Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let c: Self = serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        c.validate()?;
        Ok(c)
    }
}

/// Service session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Largest response `send_response` will deliver (bytes)
    pub max_response_size: usize,
    /// Instance name reported to clients; empty means "<key>/<instance>"
    pub instance_name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_response_size: DEFAULT_MAX_PAYLOAD,
            instance_name: String::new(),
        }
    }
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_response_size == 0 {
            return Err(ConfigError::ValidationFailed("max_response_size must be > 0"));
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let c: Self = serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        c.validate()?;
        Ok(c)
    }
}

// ── Errors ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The document is not valid JSON for this struct.
    Parse(String),
    /// A field holds a value outside its legal range.
    ValidationFailed(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(msg) => write!(f, "config parse: {msg}"),
            Self::ValidationFailed(msg) => write!(f, "config invalid: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}
