//! Agent lifecycle: negotiate, register, run slots, unregister.

use std::sync::Arc;

use drover_pipeline::{SharedEngine, SharedStateStore};
use drover_types::{PROTOCOL_VERSION, PeerError, SharedPeer};
use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::AgentConfig;
use crate::counters::AgentCounters;
use crate::error::{AgentError, Result};
use crate::runner::Runner;

/// A workflow agent bound to one peer and one engine.
pub struct Agent {
    runner: Arc<Runner>,
}

/// Builder for [`Agent`].
pub struct AgentBuilder {
    peer: SharedPeer,
    engine: SharedEngine,
    config: AgentConfig,
    store: Option<SharedStateStore>,
    counters: Option<Arc<AgentCounters>>,
}

impl AgentBuilder {
    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    /// Enable crash recovery backed by `store`.
    pub fn with_store(mut self, store: SharedStateStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_counters(mut self, counters: Arc<AgentCounters>) -> Self {
        self.counters = Some(counters);
        self
    }

    pub fn build(self) -> Agent {
        let mut config = self.config;
        config.backend = self.engine.name().to_string();
        Agent {
            runner: Arc::new(Runner {
                peer: self.peer,
                engine: self.engine,
                store: self.store,
                config: Arc::new(config),
                counters: self.counters.unwrap_or_default(),
            }),
        }
    }
}

impl Agent {
    pub fn builder(peer: SharedPeer, engine: SharedEngine) -> AgentBuilder {
        AgentBuilder {
            peer,
            engine,
            config: AgentConfig::default(),
            store: None,
            counters: None,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.runner.config
    }

    pub fn counters(&self) -> &Arc<AgentCounters> {
        &self.runner.counters
    }

    /// Run until `shutdown` fires or a fatal protocol error occurs.
    ///
    /// Workflows interrupted by shutdown are left to the server's lease
    /// expiry when recovery is enabled; otherwise they are reported canceled.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        if !self.negotiate(&shutdown).await? {
            return Ok(());
        }
        let Some(agent_id) = self.register(&shutdown).await? else {
            return Ok(());
        };
        info!(
            agent_id,
            hostname = %self.runner.config.hostname,
            capacity = self.runner.config.capacity,
            backend = %self.runner.config.backend,
            recovery = self.runner.store.is_some(),
            "Agent registered"
        );

        let agent_token = shutdown.child_token();
        let mut background = vec![tokio::spawn(report_health(
            Arc::clone(&self.runner),
            agent_token.clone(),
        ))];
        if self.runner.store.is_some() {
            background.push(tokio::spawn(cleanup_expired(
                Arc::clone(&self.runner),
                agent_token.clone(),
            )));
        }

        let slots: Vec<JoinHandle<Result<()>>> = (0..self.runner.config.capacity)
            .map(|slot| {
                let runner = Arc::clone(&self.runner);
                let token = agent_token.clone();
                tokio::spawn(async move {
                    let result = runner.run_slot(slot, token.clone()).await;
                    if result.is_err() {
                        token.cancel();
                    }
                    result
                })
            })
            .collect();

        let mut outcome = Ok(());
        for result in join_all(slots).await {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if outcome.is_ok() {
                        outcome = Err(e);
                    }
                }
                Err(e) => error!(error = %e, "Runner slot panicked"),
            }
        }

        agent_token.cancel();
        for handle in background {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background task failed");
            }
        }

        if let Err(e) = self.runner.peer.unregister_agent().await {
            warn!(error = %e, "Failed to unregister agent");
        }

        let snapshot = self.runner.counters.snapshot();
        info!(
            completed = snapshot.completed,
            running = snapshot.running_workflows,
            "Agent stopped"
        );
        outcome
    }

    /// Check the server's protocol; false when shut down first.
    async fn negotiate(&self, shutdown: &CancellationToken) -> Result<bool> {
        let config = &self.runner.config;
        let mut backoff = config.retry_backoff;
        loop {
            let result = tokio::select! {
                _ = shutdown.cancelled() => return Ok(false),
                result = self.runner.peer.version() => result,
            };
            match result {
                Ok(version) if version.is_compatible() => {
                    debug!(server_version = %version.server_version, "Protocol negotiated");
                    return Ok(true);
                }
                Ok(version) => {
                    return Err(AgentError::Peer(PeerError::VersionMismatch {
                        agent: PROTOCOL_VERSION,
                        server: version.protocol_version,
                    }));
                }
                Err(e) if e.is_retryable() => {
                    warn!(error = %e, "Server unavailable, retrying");
                    tokio::select! {
                        _ = shutdown.cancelled() => return Ok(false),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = config.next_backoff(backoff);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn register(&self, shutdown: &CancellationToken) -> Result<Option<i64>> {
        let config = &self.runner.config;
        let mut backoff = config.retry_backoff;
        loop {
            let result = tokio::select! {
                _ = shutdown.cancelled() => return Ok(None),
                result = self.runner.peer.register_agent(config.agent_info()) => result,
            };
            match result {
                Ok(id) => return Ok(Some(id)),
                Err(e) if e.is_retryable() => {
                    warn!(error = %e, "Failed to register agent, retrying");
                    tokio::select! {
                        _ = shutdown.cancelled() => return Ok(None),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = config.next_backoff(backoff);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Periodic health report; re-registers if the server forgot this agent.
async fn report_health(runner: Arc<Runner>, token: CancellationToken) {
    let interval = runner.config.health_interval;
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {}
        }
        match runner.peer.report_health().await {
            Ok(()) => {}
            Err(PeerError::Rejected(reason)) => {
                warn!(%reason, "Server dropped this agent, registering again");
                match runner.peer.register_agent(runner.config.agent_info()).await {
                    Ok(agent_id) => info!(agent_id, "Agent registered again"),
                    Err(e) => warn!(error = %e, "Failed to register again"),
                }
            }
            Err(e) => warn!(error = %e, "Failed to report health"),
        }
    }
}

/// Sweep expired recovery records from the store and the engine.
async fn cleanup_expired(runner: Arc<Runner>, token: CancellationToken) {
    let Some(store) = runner.store.clone() else {
        return;
    };
    let backend = Arc::clone(&runner.engine).as_recoverable();
    let interval = runner.config.cleanup_interval;
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {}
        }
        match store.cleanup_expired().await {
            Ok(0) => {}
            Ok(removed) => info!(removed, "Removed expired recovery records"),
            Err(e) => warn!(error = %e, "Recovery store cleanup failed"),
        }
        if let Some(backend) = &backend {
            match backend.cleanup_expired_states().await {
                Ok(0) => {}
                Ok(removed) => info!(removed, "Removed expired backend state"),
                Err(e) => warn!(error = %e, "Backend state cleanup failed"),
            }
        }
    }
}
