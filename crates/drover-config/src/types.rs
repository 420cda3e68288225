//! Configuration types mapping to the TOML schema.
//!
//! Top-level config:
//! ```toml
//! [server]          # scheduler settings
//! [agent]           # runner settings
//! [agent.labels]    # filter labels advertised to the scheduler
//! [recovery]        # crash-recovery store
//! [logging]         # log file output
//! ```

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Defaults shared by the server and agent sections.
pub mod defaults {
    pub const DEFAULT_PORT: u16 = 9000;
    pub const DEFAULT_BIND: &str = "127.0.0.1";
    pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:9000";
    pub const DEFAULT_HOSTNAME: &str = "drover-agent";
    pub const DEFAULT_BACKEND: &str = "local";
    pub const LEASE_SECS: u64 = 300;
    pub const LONG_POLL_SECS: u64 = 30;
    pub const SWEEP_INTERVAL_SECS: u64 = 10;
    pub const AGENT_TIMEOUT_SECS: u64 = 120;
    pub const RETENTION_SECS: u64 = 3600;
    pub const MAX_LOG_LINES: usize = 10_000;
    pub const MAX_TIMEOUT_SECS: u64 = 7 * 24 * 3600;
    pub const CAPACITY: u32 = 2;
    pub const HEALTH_INTERVAL_SECS: u64 = 10;
    pub const EXTEND_INTERVAL_SECS: u64 = 60;
    pub const RETRY_BACKOFF_MS: u64 = 1000;
    pub const RETRY_BACKOFF_MAX_MS: u64 = 30_000;
    pub const RECOVERY_TTL_SECS: u64 = 3600;
}

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g., project-local
/// overrides) can be loaded and merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DroverConfig {
    pub server: Option<ServerConfig>,
    pub agent: Option<AgentConfig>,
    pub recovery: Option<RecoveryConfig>,
    pub logging: Option<LoggingConfig>,
}

impl DroverConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> crate::Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> crate::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    ///
    /// Sections are replaced whole, except `[agent.labels]` which is merged
    /// key by key.
    pub fn merge(&mut self, other: DroverConfig) {
        if other.server.is_some() {
            self.server = other.server;
        }

        if let Some(mut agent) = other.agent {
            if let Some(previous) = self.agent.take() {
                for (key, value) in previous.labels {
                    agent.labels.entry(key).or_insert(value);
                }
            }
            self.agent = Some(agent);
        }

        if other.recovery.is_some() {
            self.recovery = other.recovery;
        }

        if other.logging.is_some() {
            self.logging = other.logging;
        }
    }

    /// The `[server]` section, defaulted when absent.
    pub fn server(&self) -> ServerConfig {
        self.server.clone().unwrap_or_default()
    }

    /// The `[agent]` section, defaulted when absent.
    pub fn agent(&self) -> AgentConfig {
        self.agent.clone().unwrap_or_default()
    }

    /// The `[recovery]` section, defaulted when absent.
    pub fn recovery(&self) -> RecoveryConfig {
        self.recovery.clone().unwrap_or_default()
    }

    /// The `[logging]` section, defaulted when absent.
    pub fn logging(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }

    /// Reject values that parse but cannot work.
    pub fn validate(&self) -> crate::Result<()> {
        use crate::ConfigError;

        if let Some(server) = &self.server {
            if server.lease_secs == 0 {
                return Err(ConfigError::invalid("server.lease_secs", "must be positive"));
            }
            if server.long_poll_secs >= server.lease_secs {
                return Err(ConfigError::invalid(
                    "server.long_poll_secs",
                    "must be shorter than server.lease_secs",
                ));
            }
        }
        if let Some(agent) = &self.agent {
            if agent.server.is_empty() {
                return Err(ConfigError::invalid("agent.server", "must not be empty"));
            }
            if agent.capacity == 0 {
                return Err(ConfigError::invalid("agent.capacity", "must be at least 1"));
            }
        }
        if let (Some(server), Some(agent)) = (&self.server, &self.agent)
            && agent.extend_interval_secs >= server.lease_secs
        {
            return Err(ConfigError::invalid(
                "agent.extend_interval_secs",
                "must be shorter than server.lease_secs or the lease lapses between renewals",
            ));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Server Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Scheduler server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind: String,
    /// Port to listen on.
    pub port: u16,
    /// Bearer token agents and admin clients must present. `None` disables auth.
    pub token: Option<String>,
    /// Workflow deadline in seconds, renewed by `extend`.
    pub lease_secs: u64,
    /// Longest a single `next` or `wait` request blocks.
    pub long_poll_secs: u64,
    /// How often expired leases and dead agents are swept.
    pub sweep_interval_secs: u64,
    /// An agent with no health report for this long is dropped.
    pub agent_timeout_secs: u64,
    /// Finished workflows are forgotten this long after they finish.
    pub retention_secs: u64,
    /// Log lines kept per workflow; later lines are dropped.
    pub max_log_lines: usize,
    /// Largest workflow timeout accepted at submission.
    pub max_timeout_secs: u64,
    /// Enable request logging.
    pub request_logging: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: defaults::DEFAULT_BIND.to_string(),
            port: defaults::DEFAULT_PORT,
            token: None,
            lease_secs: defaults::LEASE_SECS,
            long_poll_secs: defaults::LONG_POLL_SECS,
            sweep_interval_secs: defaults::SWEEP_INTERVAL_SECS,
            agent_timeout_secs: defaults::AGENT_TIMEOUT_SECS,
            retention_secs: defaults::RETENTION_SECS,
            max_log_lines: defaults::MAX_LOG_LINES,
            max_timeout_secs: defaults::MAX_TIMEOUT_SECS,
            request_logging: true,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Agent Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Agent (runner) configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Base URL of the scheduler server.
    pub server: String,
    /// Bearer token for the server.
    pub token: Option<String>,
    /// Hostname reported at registration. Defaults to `$HOSTNAME`.
    pub hostname: Option<String>,
    /// Concurrent workflows.
    pub capacity: u32,
    /// Execution backend name.
    pub backend: String,
    /// Workspace root for the local backend.
    pub workdir: Option<PathBuf>,
    pub health_interval_secs: u64,
    pub extend_interval_secs: u64,
    /// Initial backoff for retryable transport errors.
    pub retry_backoff_ms: u64,
    pub retry_backoff_max_ms: u64,
    /// Filter labels advertised to the scheduler.
    pub labels: HashMap<String, String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server: defaults::DEFAULT_SERVER_URL.to_string(),
            token: None,
            hostname: None,
            capacity: defaults::CAPACITY,
            backend: defaults::DEFAULT_BACKEND.to_string(),
            workdir: None,
            health_interval_secs: defaults::HEALTH_INTERVAL_SECS,
            extend_interval_secs: defaults::EXTEND_INTERVAL_SECS,
            retry_backoff_ms: defaults::RETRY_BACKOFF_MS,
            retry_backoff_max_ms: defaults::RETRY_BACKOFF_MAX_MS,
            labels: HashMap::new(),
        }
    }
}

impl AgentConfig {
    /// Configured hostname, then `$HOSTNAME`, then a fixed fallback.
    pub fn resolved_hostname(&self) -> String {
        self.hostname
            .clone()
            .filter(|h| !h.is_empty())
            .or_else(|| std::env::var("HOSTNAME").ok().filter(|h| !h.is_empty()))
            .unwrap_or_else(|| defaults::DEFAULT_HOSTNAME.to_string())
    }

    /// Configured workdir, or `<tmp>/drover`.
    pub fn resolved_workdir(&self) -> PathBuf {
        self.workdir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("drover"))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Recovery Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Backing store for recovery records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// One JSON document per workflow under `state_dir`.
    #[default]
    File,
    /// In-process only; lost on restart.
    Memory,
}

/// Crash-recovery configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub enabled: bool,
    pub store: StoreKind,
    /// Directory for the file store. Defaults to the platform data dir.
    pub state_dir: Option<PathBuf>,
    /// TTL of recovery records, used when a workflow has no timeout.
    pub ttl_secs: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            store: StoreKind::File,
            state_dir: None,
            ttl_secs: defaults::RECOVERY_TTL_SECS,
        }
    }
}

impl RecoveryConfig {
    /// Configured state dir, or `<data dir>/drover/state`.
    pub fn resolved_state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("drover")
                .join("state")
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Logging configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Write JSON logs to a daily-rotated file.
    pub file: bool,
    /// Directory for log files. Defaults to `<config dir>/logs`.
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: true,
            dir: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
