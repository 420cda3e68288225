//! Application state shared across handlers.

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::hub::Hub;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// The scheduler.
    pub hub: Arc<Hub>,

    /// Server configuration.
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Create state with a fresh hub sized by `config`.
    pub fn new(config: ServerConfig) -> Self {
        let hub = Hub::new(config.lease, config.agent_timeout)
            .with_retention(config.retention)
            .with_max_log_lines(config.max_log_lines)
            .with_max_timeout(config.max_timeout);
        Self {
            hub: Arc::new(hub),
            config: Arc::new(config),
        }
    }

    /// Share an existing hub, e.g. with an in-process agent.
    pub fn with_hub(mut self, hub: Arc<Hub>) -> Self {
        self.hub = hub;
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}
