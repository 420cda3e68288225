//! Server configuration.

use std::net::SocketAddr;
use std::time::Duration;

use drover_config::defaults;

use crate::error::ServerError;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to.
    pub bind_address: SocketAddr,

    /// Bearer token agents and admins must present. `None` disables auth.
    pub auth_token: Option<String>,

    /// How long an assignment survives without `init`/`extend`.
    pub lease: Duration,

    /// Upper bound on how long `next` and `wait` block before answering 204.
    pub long_poll: Duration,

    /// Interval between lease and agent sweeps.
    pub sweep_interval: Duration,

    /// Agents silent for this long are dropped.
    pub agent_timeout: Duration,

    /// How long finished workflows stay queryable.
    pub retention: Duration,

    /// Log lines kept per workflow.
    pub max_log_lines: usize,

    /// Largest workflow timeout accepted by `submit`.
    pub max_timeout: Duration,

    /// Enable request logging.
    pub request_logging: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], defaults::DEFAULT_PORT)),
            auth_token: None,
            lease: Duration::from_secs(defaults::LEASE_SECS),
            long_poll: Duration::from_secs(defaults::LONG_POLL_SECS),
            sweep_interval: Duration::from_secs(defaults::SWEEP_INTERVAL_SECS),
            agent_timeout: Duration::from_secs(defaults::AGENT_TIMEOUT_SECS),
            retention: Duration::from_secs(defaults::RETENTION_SECS),
            max_log_lines: defaults::MAX_LOG_LINES,
            max_timeout: Duration::from_secs(defaults::MAX_TIMEOUT_SECS),
            request_logging: true,
        }
    }
}

impl ServerConfig {
    /// Create a new server config with an optional auth token.
    /// Pass `None` to disable authentication (localhost mode).
    pub fn new(auth_token: Option<String>) -> Self {
        Self {
            auth_token,
            ..Default::default()
        }
    }

    /// Set the bind address.
    pub fn with_bind_address(mut self, addr: SocketAddr) -> Self {
        self.bind_address = addr;
        self
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn with_long_poll(mut self, window: Duration) -> Self {
        self.long_poll = window;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_agent_timeout(mut self, timeout: Duration) -> Self {
        self.agent_timeout = timeout;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_max_log_lines(mut self, lines: usize) -> Self {
        self.max_log_lines = lines;
        self
    }

    /// Enable or disable request logging.
    pub fn with_request_logging(mut self, enabled: bool) -> Self {
        self.request_logging = enabled;
        self
    }
}

impl TryFrom<&drover_config::ServerConfig> for ServerConfig {
    type Error = ServerError;

    fn try_from(file: &drover_config::ServerConfig) -> Result<Self, Self::Error> {
        let bind = format!("{}:{}", file.bind, file.port);
        let bind_address: SocketAddr = bind
            .parse()
            .map_err(|e| ServerError::Config(format!("invalid bind address '{bind}': {e}")))?;

        Ok(Self {
            bind_address,
            auth_token: file.token.clone().filter(|t| !t.is_empty()),
            lease: Duration::from_secs(file.lease_secs),
            long_poll: Duration::from_secs(file.long_poll_secs),
            sweep_interval: Duration::from_secs(file.sweep_interval_secs.max(1)),
            agent_timeout: Duration::from_secs(file.agent_timeout_secs),
            retention: Duration::from_secs(file.retention_secs),
            max_log_lines: file.max_log_lines,
            max_timeout: Duration::from_secs(file.max_timeout_secs),
            request_logging: file.request_logging,
        })
    }
}
