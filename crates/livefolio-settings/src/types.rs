//! Settings type definitions.
//!
//! All types use camelCase JSON field names and `#[serde(default)]`, so a
//! partial settings file only needs the keys it changes.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LivefolioSettings {
    /// Server listener and per-connection limits.
    pub server: ServerSettings,
    /// Subscriber client behavior.
    pub client: ClientSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl LivefolioSettings {
    /// Reject combinations that would make the server or client misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.client.reconnect_delay_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "client.reconnectDelayMs must be greater than zero".into(),
            ));
        }
        if self.server.heartbeat_interval_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "server.heartbeatIntervalSecs must be greater than zero".into(),
            ));
        }
        if self.server.heartbeat_timeout_secs <= self.server.heartbeat_interval_secs {
            return Err(SettingsError::InvalidValue(format!(
                "server.heartbeatTimeoutSecs ({}) must exceed heartbeatIntervalSecs ({})",
                self.server.heartbeat_timeout_secs, self.server.heartbeat_interval_secs
            )));
        }
        if self.server.send_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "server.sendQueueCapacity must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Server network settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (0 = OS-assigned).
    pub port: u16,
    /// Upper bound on concurrent duplex connections.
    pub max_connections: usize,
    /// Interval between server pings.
    pub heartbeat_interval_secs: u64,
    /// A connection silent for this long is dropped.
    pub heartbeat_timeout_secs: u64,
    /// Largest inbound frame accepted, in bytes.
    pub max_message_size: usize,
    /// Bounded outbound queue per connection; a full queue evicts the connection.
    pub send_queue_capacity: usize,
    /// Capacity of the in-process domain event bus.
    pub event_bus_capacity: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7878,
            max_connections: 10_000,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            max_message_size: 64 * 1024,
            send_queue_capacity: 256,
            event_bus_capacity: 1024,
        }
    }
}

/// Subscriber client settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// WebSocket endpoint of the server.
    pub server_url: String,
    /// Fixed delay before each reconnect attempt.
    pub reconnect_delay_ms: u64,
    /// Where the persisted session lives; `None` means `~/.livefolio/session.json`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_path: Option<String>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:7878/ws".to_string(),
            reconnect_delay_ms: 5000,
            session_path: None,
        }
    }
}

/// Log verbosity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose.
    Trace,
    /// Debug.
    Debug,
    /// Default.
    #[default]
    Info,
    /// Warnings.
    Warn,
    /// Errors only.
    Error,
}

impl LogLevel {
    /// Convert to a tracing filter string.
    pub fn as_filter_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Stdout log format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    /// Single-line human-readable output.
    #[default]
    Compact,
    /// JSON lines.
    Json,
}

/// Logging configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level for every target.
    pub level: LogLevel,
    /// Output format.
    pub format: LogOutput,
    /// Per-module overrides, e.g. `[{"module": "livefolio_client", "level": "debug"}]`.
    pub modules: Vec<ModuleLevel>,
}

/// One per-module level override.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleLevel {
    /// Tracing target prefix.
    pub module: String,
    /// Level for that target.
    pub level: LogLevel,
}
