//! Agent configuration.

use std::collections::HashMap;
use std::time::Duration;

use drover_config::defaults;
use drover_types::{AgentInfo, Filter};

/// How often expired recovery records are swept.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

/// Attempts for a single retryable protocol call (init, done).
pub const MAX_CALL_ATTEMPTS: u32 = 5;

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Name reported to the server and injected as `CI_MACHINE`.
    pub hostname: String,

    /// Concurrent workflows.
    pub capacity: usize,

    /// Name of the execution backend, as reported to the server.
    pub backend: String,

    /// Filter labels advertised to the scheduler.
    pub labels: HashMap<String, String>,

    pub health_interval: Duration,
    pub extend_interval: Duration,

    /// Initial backoff for retryable transport errors; doubles up to the max.
    pub retry_backoff: Duration,
    pub retry_backoff_max: Duration,

    /// Lower bound on the TTL of recovery records.
    pub recovery_ttl_secs: u64,

    pub cleanup_interval: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            hostname: defaults::DEFAULT_HOSTNAME.to_string(),
            capacity: defaults::CAPACITY as usize,
            backend: defaults::DEFAULT_BACKEND.to_string(),
            labels: HashMap::new(),
            health_interval: Duration::from_secs(defaults::HEALTH_INTERVAL_SECS),
            extend_interval: Duration::from_secs(defaults::EXTEND_INTERVAL_SECS),
            retry_backoff: Duration::from_millis(defaults::RETRY_BACKOFF_MS),
            retry_backoff_max: Duration::from_millis(defaults::RETRY_BACKOFF_MAX_MS),
            recovery_ttl_secs: defaults::RECOVERY_TTL_SECS,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
        }
    }
}

impl AgentConfig {
    /// Build from the `[agent]` and `[recovery]` config sections.
    pub fn from_file(
        agent: &drover_config::AgentConfig,
        recovery: &drover_config::RecoveryConfig,
    ) -> Self {
        Self {
            hostname: agent.resolved_hostname(),
            capacity: agent.capacity.max(1) as usize,
            backend: agent.backend.clone(),
            labels: agent.labels.clone(),
            health_interval: Duration::from_secs(agent.health_interval_secs.max(1)),
            extend_interval: Duration::from_secs(agent.extend_interval_secs.max(1)),
            retry_backoff: Duration::from_millis(agent.retry_backoff_ms.max(1)),
            retry_backoff_max: Duration::from_millis(
                agent.retry_backoff_max_ms.max(agent.retry_backoff_ms),
            ),
            recovery_ttl_secs: recovery.ttl_secs,
            ..Default::default()
        }
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_health_interval(mut self, interval: Duration) -> Self {
        self.health_interval = interval;
        self
    }

    pub fn with_extend_interval(mut self, interval: Duration) -> Self {
        self.extend_interval = interval;
        self
    }

    /// Set the initial and maximum retry backoff.
    pub fn with_retry_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.retry_backoff = initial;
        self.retry_backoff_max = max.max(initial);
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// The filter this agent polls with.
    pub fn filter(&self) -> Filter {
        Filter::new(self.labels.clone())
    }

    /// Registration payload.
    pub fn agent_info(&self) -> AgentInfo {
        AgentInfo {
            hostname: self.hostname.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            platform: platform(),
            backend: self.backend.clone(),
            capacity: u32::try_from(self.capacity).unwrap_or(u32::MAX),
            custom_labels: self.labels.clone(),
        }
    }

    /// Next backoff after `current`.
    pub(crate) fn next_backoff(&self, current: Duration) -> Duration {
        (current * 2).min(self.retry_backoff_max)
    }
}

/// `<os>/<arch>` of this build.
pub fn platform() -> String {
    format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_file_config() {
        let agent = drover_config::AgentConfig {
            hostname: Some("builder-7".into()),
            capacity: 0,
            retry_backoff_ms: 500,
            retry_backoff_max_ms: 100,
            labels: HashMap::from([("arch".to_string(), "arm64".to_string())]),
            ..Default::default()
        };
        let config = AgentConfig::from_file(&agent, &drover_config::RecoveryConfig::default());

        assert_eq!(config.hostname, "builder-7");
        assert_eq!(config.capacity, 1);
        assert_eq!(config.retry_backoff_max, Duration::from_millis(500));
        assert_eq!(config.filter().labels["arch"], "arm64");
    }

    #[test]
    fn test_backoff_doubles_to_max() {
        let config = AgentConfig::default()
            .with_retry_backoff(Duration::from_millis(100), Duration::from_millis(300));
        let next = config.next_backoff(config.retry_backoff);
        assert_eq!(next, Duration::from_millis(200));
        assert_eq!(config.next_backoff(next), Duration::from_millis(300));
    }

    #[test]
    fn test_agent_info() {
        let info = AgentConfig::default()
            .with_capacity(3)
            .with_label("gpu", "yes")
            .agent_info();
        assert_eq!(info.capacity, 3);
        assert_eq!(info.custom_labels["gpu"], "yes");
        assert!(info.platform.contains('/'));
    }
}
