//! Configuration schema definitions

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Root configuration for roomcast
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Bus configuration
    #[serde(default)]
    pub bus: BusConfig,
    /// Delivery identity configuration
    #[serde(default)]
    pub identity: IdentityConfig,
    /// End-to-end encryption configuration
    #[serde(default)]
    pub encryption: EncryptionConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
    /// Directory for log files
    #[serde(default = "default_log_dir")]
    pub dir: String,
    /// Days to keep rotated log files
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
    /// Module-specific overrides
    #[serde(default)]
    pub overrides: HashMap<String, String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_retention_days() -> u64 {
    7
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            dir: default_log_dir(),
            retention_days: default_retention_days(),
            overrides: HashMap::new(),
        }
    }
}

/// Bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Name stamped into the `sender` field of published envelopes
    #[serde(default = "default_component_name")]
    pub component_name: String,
    /// Soft bound on queued envelopes per subscriber
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// How long a request waits for its response; 0 waits forever
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_component_name() -> String {
    "roomcast".to_string()
}

fn default_channel_capacity() -> usize {
    crate::DEFAULT_CHANNEL_CAPACITY
}

fn default_request_timeout() -> u64 {
    30
}

impl BusConfig {
    /// Request deadline, `None` when waiting forever
    pub fn request_timeout(&self) -> Option<Duration> {
        match self.request_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            component_name: default_component_name(),
            channel_capacity: default_channel_capacity(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Delivery identity configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// System account used when a request names no sender
    #[serde(default = "default_identity")]
    pub default_identity: String,
    /// Display name for the system account
    #[serde(default)]
    pub default_display_name: Option<String>,
}

fn default_identity() -> String {
    "@roomcast:localhost".to_string()
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            default_identity: default_identity(),
            default_display_name: None,
        }
    }
}

/// End-to-end encryption configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct EncryptionConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Whether `notice` messages are encrypted too. Unset means yes.
    #[serde(
        default,
        alias = "encryptNotices",
        skip_serializing_if = "Option::is_none"
    )]
    pub encrypt_notices: Option<bool>,
}

impl EncryptionConfig {
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            encrypt_notices: None,
        }
    }

    pub fn with_encrypt_notices(mut self, encrypt: bool) -> Self {
        self.encrypt_notices = Some(encrypt);
        self
    }
}
