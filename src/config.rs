//! Broker configuration.
//!
//! Configuration is a JSON file naming one or more brokers and which of them
//! is the default:
//!
//! ```json
//! {
//!   "defaultBroker": "ci",
//!   "brokers": {
//!     "ci": {
//!       "url": "tcp://broker.example.com:61616",
//!       "user": "listener",
//!       "password": "secret",
//!       "messageTimeout": 300000,
//!       "messageMax": 1
//!     }
//!   }
//! }
//! ```
//!
//! `messageTimeout` is in milliseconds.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bus::Credentials;
use crate::error::{ListenerError, Result};

/// Environment variable overriding the default configuration path.
pub const CONFIG_PATH_ENV: &str = "BUS_LISTENER_CONFIG";

const CONFIG_DIR: &str = "bus-listener";
const CONFIG_FILE: &str = "broker-config.json";

fn default_message_timeout() -> u64 {
    300_000
}

fn default_message_max() -> u64 {
    1
}

/// Connection settings and listening defaults for one broker.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Broker {
    pub url: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// Default receive timeout in milliseconds
    #[serde(default = "default_message_timeout")]
    pub message_timeout: u64,
    /// Default message-count cap for listening
    #[serde(default = "default_message_max")]
    pub message_max: u64,
}

impl Broker {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user: String::new(),
            password: String::new(),
            message_timeout: default_message_timeout(),
            message_max: default_message_max(),
        }
    }

    pub fn with_credentials(
        mut self,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }

    pub fn with_message_timeout(mut self, timeout: Duration) -> Self {
        self.message_timeout = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_message_max(mut self, max: u64) -> Self {
        self.message_max = max;
        self
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(&self.user, &self.password)
    }

    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout)
    }

    pub fn message_max(&self) -> u64 {
        self.message_max
    }
}

impl fmt::Debug for Broker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broker")
            .field("url", &self.url)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("message_timeout", &self.message_timeout)
            .field("message_max", &self.message_max)
            .finish()
    }
}

/// A set of named brokers plus the name of the default one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerConfig {
    pub default_broker: String,
    pub brokers: BTreeMap<String, Broker>,
}

impl BrokerConfig {
    /// A configuration with a single broker, which is also the default.
    pub fn new(name: impl Into<String>, broker: Broker) -> Self {
        let name = name.into();
        let mut brokers = BTreeMap::new();
        brokers.insert(name.clone(), broker);
        Self {
            default_broker: name,
            brokers,
        }
    }

    /// Add (or replace) a named broker.
    pub fn with_broker(mut self, name: impl Into<String>, broker: Broker) -> Self {
        self.brokers.insert(name.into(), broker);
        self
    }

    /// Parse a configuration from JSON text.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ListenerError::ConfigNotFound(format!("invalid broker config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ListenerError::ConfigNotFound(format!(
                "could not read configuration file at {}: {}",
                path.display(),
                e
            ))
        })?;
        let config = Self::from_json(&text)?;
        debug!(path = %path.display(), brokers = config.brokers.len(), "loaded broker config");
        Ok(config)
    }

    /// `$BUS_LISTENER_CONFIG`, else `<config dir>/bus-listener/broker-config.json`.
    pub fn default_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            if !path.is_empty() {
                return Some(PathBuf::from(path));
            }
        }
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Load from [`default_path`](Self::default_path).
    pub fn load_default() -> Result<Self> {
        let path = Self::default_path().ok_or_else(|| {
            ListenerError::ConfigNotFound("no configuration directory available".into())
        })?;
        Self::from_path(path)
    }

    /// The broker named by `defaultBroker`.
    pub fn default_broker(&self) -> Result<&Broker> {
        self.broker(&self.default_broker).ok_or_else(|| {
            ListenerError::ConfigNotFound(format!(
                "default broker '{}' is not defined",
                self.default_broker
            ))
        })
    }

    pub fn broker(&self, name: &str) -> Option<&Broker> {
        self.brokers.get(name)
    }

    fn validate(&self) -> Result<()> {
        self.default_broker().map(|_| ())
    }
}
