//! Configuration types for the telemetry relay.
//!
//! Configuration is loaded from YAML files and validated before use.
//! Addresses may reference environment variables as `${VAR_NAME}`.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};
use crate::network::codec::DEFAULT_MAX_FRAME_SIZE;
use crate::network::listener::{ListenerOptions, DEFAULT_MAX_CONNECTIONS};
use crate::tls::TlsMaterial;

/// Root configuration for the relay.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelayConfig {
    /// Ingestion listeners. Names must be unique.
    pub listeners: Vec<ListenerConfig>,

    /// Capacity of the channel shared by every listener.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Upstream to relay received envelopes to.
    #[serde(default)]
    pub forward: Option<ForwardConfig>,

    /// Prometheus metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// One ingestion listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenerConfig {
    /// Metric namespace, e.g. `ingest` gives `ingest.receivedMessageCount`.
    pub name: String,

    /// Address to bind to, e.g., "0.0.0.0:3457".
    pub address: String,

    /// Mutual TLS material. Plain TCP when absent.
    #[serde(default)]
    pub tls: Option<TlsMaterial>,

    /// TLS handshake deadline in milliseconds. 0 disables it.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    /// Per-frame read deadline in milliseconds. 0 disables it.
    #[serde(default)]
    pub read_timeout_ms: u64,

    /// Largest accepted payload in bytes.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// Maximum number of concurrent sender connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Transport used to reach the upstream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ForwardProtocol {
    /// Plain TCP.
    #[default]
    Tcp,
    /// Mutual TLS.
    Tls,
}

impl ForwardProtocol {
    /// Label used to namespace forwarder counters.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Tls => "tls",
        }
    }
}

/// Upstream relay target.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ForwardConfig {
    /// Upstream listener address, e.g., "relay.internal:3457".
    pub address: String,

    /// Transport protocol.
    #[serde(default)]
    pub protocol: ForwardProtocol,

    /// Certificate material, required for `tls`.
    #[serde(default)]
    pub tls: Option<TlsMaterial>,

    /// Name expected in the upstream certificate. Defaults to the peer IP.
    #[serde(default)]
    pub server_name: Option<String>,

    /// Connection timeout in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Per-frame write timeout in milliseconds. 0 disables it.
    #[serde(default)]
    pub write_timeout_ms: u64,
}

/// Prometheus metrics configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Whether to enable the metrics endpoint.
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,

    /// Address for the metrics HTTP server.
    #[serde(default = "default_metrics_address")]
    pub address: String,

    /// How often batched counter updates are flushed, in milliseconds.
    /// 0 publishes every update immediately.
    #[serde(default = "default_batch_interval_ms")]
    pub batch_interval_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output logs in JSON format (for production).
    #[serde(default)]
    pub json: bool,
}

/// Expand environment variables in a string.
///
/// Replaces `${VAR_NAME}` with the value of the environment variable `VAR_NAME`.
/// If the variable is not set, replaces with an empty string.
fn expand_env_vars(s: &str) -> String {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN
        .get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex"));
    re.replace_all(s, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .to_string()
}

/// Check that `addr` looks like `host:port`.
fn validate_address(addr: &str) -> ConfigResult<()> {
    let parts: Vec<&str> = addr.rsplitn(2, ':').collect();
    if parts.len() != 2 || parts[1].is_empty() || parts[0].parse::<u16>().is_err() {
        return Err(ConfigError::InvalidAddress(addr.to_string()));
    }
    Ok(())
}

fn optional_millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

// Default value functions

fn default_channel_capacity() -> usize {
    1024
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}

fn default_max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_address() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_batch_interval_ms() -> u64 {
    5_000
}

fn default_log_level() -> String {
    "info".to_string()
}

// Default implementations

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            address: default_metrics_address(),
            batch_interval_ms: default_batch_interval_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl ListenerConfig {
    /// A plain TCP listener with default limits.
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            tls: None,
            handshake_timeout_ms: default_handshake_timeout_ms(),
            read_timeout_ms: 0,
            max_frame_size: default_max_frame_size(),
            max_connections: default_max_connections(),
        }
    }

    /// Bind address with environment variables expanded.
    #[must_use]
    pub fn address(&self) -> String {
        expand_env_vars(&self.address)
    }

    /// Listener tuning derived from this configuration.
    #[must_use]
    pub fn options(&self) -> ListenerOptions {
        ListenerOptions {
            handshake_timeout: optional_millis(self.handshake_timeout_ms),
            read_timeout: optional_millis(self.read_timeout_ms),
            max_frame_size: self.max_frame_size,
            max_connections: self.max_connections,
        }
    }
}

impl ForwardConfig {
    /// Upstream address with environment variables expanded.
    #[must_use]
    pub fn address(&self) -> String {
        expand_env_vars(&self.address)
    }

    /// Connection timeout.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Per-frame write timeout, if any.
    #[must_use]
    pub fn write_timeout(&self) -> Option<Duration> {
        optional_millis(self.write_timeout_ms)
    }
}

impl MetricsConfig {
    /// Flush interval for batched counters, if batching is on.
    #[must_use]
    pub fn batch_interval(&self) -> Option<Duration> {
        optional_millis(self.batch_interval_ms)
    }
}

// Configuration loading and validation

impl RelayConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if
    /// validation fails.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;

        Self::from_str(&content)
    }

    /// Load configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing or validation fails.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> ConfigResult<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - no listener is configured, or names are empty or repeated
    /// - an address is not `host:port`
    /// - a listener's `max_frame_size` is zero
    /// - `channel_capacity` is zero
    /// - TLS forwarding has no certificate material
    pub fn validate(&self) -> ConfigResult<()> {
        if self.listeners.is_empty() {
            return Err(ConfigError::NoListeners);
        }

        let mut names = HashSet::new();
        for listener in &self.listeners {
            if listener.name.trim().is_empty() {
                return Err(ConfigError::EmptyListenerName);
            }
            if !names.insert(listener.name.as_str()) {
                return Err(ConfigError::DuplicateListener(listener.name.clone()));
            }
            validate_address(&listener.address())?;
            if listener.max_frame_size == 0 {
                return Err(ConfigError::InvalidFrameSize(listener.name.clone()));
            }
        }

        if self.channel_capacity == 0 {
            return Err(ConfigError::ZeroChannelCapacity);
        }

        if let Some(forward) = &self.forward {
            validate_address(&forward.address())?;
            if forward.protocol == ForwardProtocol::Tls && forward.tls.is_none() {
                return Err(ConfigError::MissingForwardTls);
            }
        }

        if self.metrics.enabled {
            validate_address(&self.metrics.address)?;
        }

        Ok(())
    }
}
