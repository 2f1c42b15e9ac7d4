use crate::connection::{Endpoint, DEFAULT_PATH};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

/// Floor applied to the reconnect delay and subscribe retry interval
pub const MIN_INTERVAL_MS: u64 = 1;

/// Complete Livewire configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LivewireConfig {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub hub: HubConfig,
}

/// Client side: where to connect and how to recover
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Origin of the page / server the client talks to (e.g. "https://host:port")
    #[serde(default = "default_origin")]
    pub origin: String,
    /// Path of the real-time endpoint on that origin
    #[serde(default = "default_path")]
    pub path: String,
    /// Fixed delay before reconnecting after a close or failed attempt
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Retry interval for subscribe frames issued while still connecting
    #[serde(default = "default_subscribe_retry_ms")]
    pub subscribe_retry_ms: u64,
    /// Upper bound on a single connect attempt
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_origin() -> String {
    "http://localhost:8001".to_string()
}

fn default_path() -> String {
    DEFAULT_PATH.to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_subscribe_retry_ms() -> u64 {
    500
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            origin: default_origin(),
            path: default_path(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            subscribe_retry_ms: default_subscribe_retry_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl ClientConfig {
    pub fn endpoint(&self) -> Result<Endpoint> {
        Endpoint::from_origin(&self.origin, &self.path)
    }

    /// Never shorter than [`MIN_INTERVAL_MS`]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms.max(MIN_INTERVAL_MS))
    }

    /// Never shorter than [`MIN_INTERVAL_MS`]
    pub fn subscribe_retry(&self) -> Duration {
        Duration::from_millis(self.subscribe_retry_ms.max(MIN_INTERVAL_MS))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Hub side: the server end of the real-time channel
#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_path")]
    pub path: String,
    /// Publications buffered per connection before it starts lagging
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_bind() -> String {
    "127.0.0.1:8001".to_string()
}

fn default_channel_capacity() -> usize {
    1024
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            path: default_path(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl LivewireConfig {
    /// Apply LIVEWIRE_* environment overrides on top of file/default values.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(origin) = std::env::var("LIVEWIRE_ORIGIN") {
            self.client.origin = origin;
        }
        if let Ok(v) = std::env::var("LIVEWIRE_RECONNECT_DELAY_MS") {
            if let Ok(ms) = v.parse::<u64>() {
                self.client.reconnect_delay_ms = ms;
            }
        }
        if let Ok(bind) = std::env::var("LIVEWIRE_HUB_BIND") {
            self.hub.bind = bind;
        }
        self
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<LivewireConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path))?;
    let config: LivewireConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file '{}'", path))?;
    Ok(config)
}
