//! Client configuration.
//!
//! Configuration is layered:
//! - Built-in defaults
//! - TOML configuration file (`courier.toml`, `~/.config/courier/courier.toml`)
//! - Environment variables (`COURIER__SECTION__KEY`)

use anyhow::{Context, Result};
use courier_protocol::{CHAT_NAMESPACE, TRACKING_NAMESPACE};
use courier_transport::ReconnectPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default locations of the configuration file, in lookup order.
pub const CONFIG_PATHS: [&str; 2] = ["courier.toml", "~/.config/courier/courier.toml"];

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the realtime backend.
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Conversation channel settings.
    #[serde(default)]
    pub chat: ChatConfig,

    /// Tracking channel settings.
    #[serde(default)]
    pub tracking: TrackingConfig,

    /// Reconnection policy.
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Conversation channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Namespace path.
    #[serde(default = "default_chat_namespace")]
    pub namespace: String,

    /// Lifetime of a typing indicator in milliseconds.
    #[serde(default = "default_typing_timeout")]
    pub typing_timeout_ms: u64,

    /// Messages requested per history page.
    #[serde(default = "default_history_page_size")]
    pub history_page_size: u32,
}

/// Tracking channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Namespace path.
    #[serde(default = "default_tracking_namespace")]
    pub namespace: String,

    /// Seconds a driver has to answer an order request.
    #[serde(default = "default_order_request_secs")]
    pub order_request_secs: u64,

    /// Location report interval in milliseconds.
    #[serde(default = "default_location_interval")]
    pub location_interval_ms: u64,
}

/// Reconnection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Reconnect after an unexpected drop.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Attempts per outage.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First delay in milliseconds.
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Delay cap in milliseconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Delay growth factor.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable the Prometheus exporter.
    #[serde(default)]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_server_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_chat_namespace() -> String {
    CHAT_NAMESPACE.to_string()
}

fn default_typing_timeout() -> u64 {
    3_000 // 3 seconds
}

fn default_history_page_size() -> u32 {
    50
}

fn default_tracking_namespace() -> String {
    TRACKING_NAMESPACE.to_string()
}

fn default_order_request_secs() -> u64 {
    30
}

fn default_location_interval() -> u64 {
    10_000 // 10 seconds
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> u64 {
    1_000
}

fn default_max_delay() -> u64 {
    5_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            chat: ChatConfig::default(),
            tracking: TrackingConfig::default(),
            reconnect: ReconnectConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            namespace: default_chat_namespace(),
            typing_timeout_ms: default_typing_timeout(),
            history_page_size: default_history_page_size(),
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            namespace: default_tracking_namespace(),
            order_request_secs: default_order_request_secs(),
            location_interval_ms: default_location_interval(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            multiplier: default_multiplier(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl ChatConfig {
    #[must_use]
    pub fn typing_timeout(&self) -> Duration {
        Duration::from_millis(self.typing_timeout_ms)
    }
}

impl TrackingConfig {
    #[must_use]
    pub fn order_request_window(&self) -> Duration {
        Duration::from_secs(self.order_request_secs)
    }

    #[must_use]
    pub fn location_interval(&self) -> Duration {
        Duration::from_millis(self.location_interval_ms)
    }
}

impl ReconnectConfig {
    /// Build the transport reconnection policy.
    #[must_use]
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            enabled: self.enabled,
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            multiplier: self.multiplier,
        }
    }
}

impl ClientConfig {
    /// Load configuration from the first default path found, then apply
    /// environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// override has the wrong type.
    pub fn load() -> Result<Self> {
        let path = CONFIG_PATHS
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists());

        Self::load_layered(path.as_deref())
    }

    /// Load configuration from an optional file plus environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or an override
    /// has the wrong type.
    pub fn load_layered(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            let expanded = PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref());
            builder = builder.add_source(
                config::File::from(expanded.as_path())
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix("COURIER")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .context("Failed to assemble configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")?;

        Ok(config)
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: ClientConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }
}
