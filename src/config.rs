//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `agent.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - SerialConfig: RS-485 line settings and optional port override.
//!     - PollingConfig: every pause the acquisition loop takes.
//!     - SessionConfig: lease timeout and optional auto-claim credentials.
//!     - IdentityConfig: device id override / derived id prefix.
//!     - RemoteConfig: document store endpoint and collection names.
//!     - JournalConfig: local csv log.
//!     - ServerConfig / LoggingConfig.
//!
//! every section is optional in the file; missing keys take the defaults below.
//!
//! ==============================================================================

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AgentConfig {
    pub serial: SerialConfig,
    pub polling: PollingConfig,
    pub session: SessionConfig,
    pub identity: IdentityConfig,
    pub remote: RemoteConfig,
    pub journal: JournalConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SerialConfig {
    /// fixed port; when unset the port is discovered at startup
    pub port: Option<String>,
    pub baud_rate: u32,
    pub slave: u8,
    pub response_timeout_ms: u64,
    /// per-port timeout while probing for the sensor
    pub probe_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_seconds: u64,
    pub error_backoff_ms: u64,
    pub reconnect_delay_seconds: u64,
    pub session_poll_seconds: u64,
    pub session_lost_pause_seconds: u64,
    pub claim_retry_seconds: u64,
    pub settle_ms: u64,
    pub inter_read_ms: u64,
    pub stabilize_ms: u64,
    pub max_consecutive_errors: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SessionConfig {
    pub timeout_minutes: i64,
    /// operator credentials used to claim the device while nobody holds it
    pub owner: Option<String>,
    pub scope: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IdentityConfig {
    pub device_id: Option<String>,
    pub prefix: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RemoteConfig {
    /// when unset the agent runs standalone: no leases, no uploads
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
    pub sessions_collection: String,
    pub readings_collection: String,
    pub history_subcollection: String,
    pub waiting_collection: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct JournalConfig {
    pub enabled: bool,
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_sensor_data: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 9600,
            slave: 1,
            response_timeout_ms: 1000,
            probe_timeout_ms: 500,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 5,
            error_backoff_ms: 2000,
            reconnect_delay_seconds: 5,
            session_poll_seconds: 3,
            session_lost_pause_seconds: 2,
            claim_retry_seconds: 1,
            settle_ms: 500,
            inter_read_ms: 100,
            stabilize_ms: 1000,
            max_consecutive_errors: 3,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { timeout_minutes: 10, owner: None, scope: None }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self { device_id: None, prefix: "SOIL".to_string() }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            timeout_seconds: 10,
            sessions_collection: "sensor_sessions".to_string(),
            readings_collection: "sensor_readings".to_string(),
            history_subcollection: "readings".to_string(),
            waiting_collection: "unassigned_sensors".to_string(),
        }
    }
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self { enabled: true, path: PathBuf::from("sensor_data.csv") }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: "0.0.0.0:2000".to_string() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), show_sensor_data: true }
    }
}

impl PollingConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_seconds)
    }

    pub fn session_poll(&self) -> Duration {
        Duration::from_secs(self.session_poll_seconds)
    }

    pub fn session_lost_pause(&self) -> Duration {
        Duration::from_secs(self.session_lost_pause_seconds)
    }

    pub fn claim_retry(&self) -> Duration {
        Duration::from_secs(self.claim_retry_seconds)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn inter_read(&self) -> Duration {
        Duration::from_millis(self.inter_read_ms)
    }

    pub fn stabilize(&self) -> Duration {
        Duration::from_millis(self.stabilize_ms)
    }
}

impl AgentConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

        let config: AgentConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;

        Ok(config)
    }

    /// Load with default fallback
    pub fn load_or_default() -> Self {
        let paths = [
            PathBuf::from("config").join("agent.toml"),
            PathBuf::from("..").join("config").join("agent.toml"),
        ];

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        println!("[CONFIG] Loaded from {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        println!("[CONFIG] Warning: Failed to load {}: {}", path.display(), e);
                    }
                }
            }
        }

        println!("[CONFIG] Warning: No config file found - using defaults");
        Self::default()
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        let remote = self.remote.base_url.as_deref().unwrap_or("standalone");
        let port = self.serial.port.as_deref().unwrap_or("auto");
        println!("┌─────────────────────────────────────────┐");
        println!("│          AGENT CONFIGURATION            │");
        println!("├─────────────────────────────────────────┤");
        println!("│ Port: {}", port);
        println!("│ Remote: {}", remote);
        println!("│ Poll Interval: {}s", self.polling.interval_seconds);
        println!("│ Session Timeout: {}min", self.session.timeout_minutes);
        println!("│ Listen: {}", self.server.bind);
        println!("│ Log Level: {}", self.logging.level);
        println!("└─────────────────────────────────────────┘");
    }
}
