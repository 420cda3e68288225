//! Agent end-to-end tests over an in-process hub.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use drover_agent::{Agent, AgentConfig, AgentError, LocalEngine};
use drover_pipeline::testing::{EngineCall, MockEngine};
use drover_pipeline::{MemoryBackend, SharedStateStore, StateStore, VersionedStateStore};
use drover_server::{Hub, LocalPeer};
use drover_types::{
    AgentInfo, Config, Filter, LogEntry, Peer, PeerError, SharedPeer, Stage, Step, StepState,
    SubmitRequest, Version, Workflow, WorkflowState, WorkflowStatus,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

// ─────────────────────────────────────────────────────────────────────────────
// Harness
// ─────────────────────────────────────────────────────────────────────────────

struct Harness {
    hub: Arc<Hub>,
    shutdown: CancellationToken,
    handle: JoinHandle<drover_agent::Result<()>>,
}

fn config() -> AgentConfig {
    AgentConfig::default()
        .with_hostname("test-agent")
        .with_capacity(1)
        .with_health_interval(Duration::from_millis(50))
        .with_extend_interval(Duration::from_millis(50))
        .with_retry_backoff(Duration::from_millis(10), Duration::from_millis(50))
}

fn local_peer(hub: &Arc<Hub>) -> LocalPeer {
    LocalPeer::new(Arc::clone(hub)).with_long_poll(Duration::from_millis(50))
}

fn start(engine: Arc<MockEngine>, store: Option<SharedStateStore>) -> Harness {
    let hub = Arc::new(Hub::new(Duration::from_secs(60), Duration::from_secs(60)));
    let peer: SharedPeer = Arc::new(local_peer(&hub));
    launch(hub, peer, engine, store)
}

fn launch(
    hub: Arc<Hub>,
    peer: SharedPeer,
    engine: Arc<MockEngine>,
    store: Option<SharedStateStore>,
) -> Harness {
    let mut builder = Agent::builder(peer, engine).with_config(config());
    if let Some(store) = store {
        builder = builder.with_store(store);
    }
    let agent = builder.build();

    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    let handle = tokio::spawn(async move { agent.run(token).await });
    Harness {
        hub,
        shutdown,
        handle,
    }
}

fn submit(hub: &Hub, id: &str, steps: Vec<Step>, timeout: u64) {
    hub.submit(SubmitRequest {
        id: Some(id.to_string()),
        config: Config::new(vec![Stage::new("main", steps)]),
        timeout,
        ..Default::default()
    })
    .unwrap();
}

async fn wait_status(hub: &Hub, id: &str, until: impl Fn(WorkflowStatus) -> bool) -> WorkflowStatus {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let status = hub.info(id).unwrap().status;
            if until(status) {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap()
}

async fn stop(harness: Harness) -> drover_agent::Result<()> {
    harness.shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(10), harness.handle)
        .await
        .unwrap()
        .unwrap()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_runs_workflow_and_reports_failure() {
    let engine = Arc::new(
        MockEngine::new()
            .with_output("build", "compiling\nok\n")
            .with_exit("test", 2),
    );
    let harness = start(Arc::clone(&engine), None);
    submit(
        &harness.hub,
        "wf-1",
        vec![
            Step::new("build", "rust").with_uuid("u-build"),
            Step::new("test", "rust").with_uuid("u-test"),
        ],
        0,
    );

    let status = wait_status(&harness.hub, "wf-1", WorkflowStatus::is_finished).await;
    assert_eq!(status, WorkflowStatus::Failure);

    let info = harness.hub.info("wf-1").unwrap();
    assert!(info.state.error.as_deref().unwrap().contains("exited with code 2"));
    assert!(!info.state.canceled);
    assert!(info.state.started > 0);
    let test = info.steps.iter().find(|s| s.step_uuid == "u-test").unwrap();
    assert_eq!(test.exit_code, 2);
    assert!(test.exited);

    let logs = harness.hub.logs("wf-1").unwrap();
    let lines: Vec<_> = logs.iter().map(|l| l.data.as_str()).collect();
    assert_eq!(lines, ["compiling", "ok"]);

    let build = engine.started_step("build").unwrap();
    assert_eq!(build.environment["CI_MACHINE"], "test-agent");
    assert!(engine.calls().contains(&EngineCall::DestroyWorkflow));

    stop(harness).await.unwrap();
}

#[tokio::test]
async fn test_server_cancel_stops_run() {
    let engine = Arc::new(MockEngine::new().with_delay("deploy", Duration::from_secs(30)));
    let harness = start(Arc::clone(&engine), None);
    submit(&harness.hub, "wf-2", vec![Step::new("deploy", "alpine")], 0);

    wait_status(&harness.hub, "wf-2", |s| s == WorkflowStatus::Running).await;
    tokio::time::timeout(Duration::from_secs(5), async {
        while !engine.waited("deploy") {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    harness.hub.cancel("wf-2").unwrap();

    let status = wait_status(&harness.hub, "wf-2", WorkflowStatus::is_finished).await;
    assert_eq!(status, WorkflowStatus::Canceled);
    tokio::time::timeout(Duration::from_secs(5), async {
        while !engine.calls().contains(&EngineCall::DestroyWorkflow) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    stop(harness).await.unwrap();
}

#[tokio::test]
async fn test_workflow_timeout_cancels() {
    let engine = Arc::new(MockEngine::new().with_delay("slow", Duration::from_secs(30)));
    let harness = start(engine, None);
    submit(&harness.hub, "wf-3", vec![Step::new("slow", "alpine")], 1);

    let status = wait_status(&harness.hub, "wf-3", WorkflowStatus::is_finished).await;
    assert_eq!(status, WorkflowStatus::Canceled);
    let info = harness.hub.info("wf-3").unwrap();
    assert!(info.state.canceled);
    assert!(info.state.error.as_deref().unwrap().contains("timed out"));

    stop(harness).await.unwrap();
}

#[tokio::test]
async fn test_shutdown_without_recovery_reports_canceled() {
    let engine = Arc::new(MockEngine::new().with_delay("long", Duration::from_secs(30)));
    let harness = start(Arc::clone(&engine), None);
    submit(&harness.hub, "wf-4", vec![Step::new("long", "alpine")], 0);
    wait_status(&harness.hub, "wf-4", |s| s == WorkflowStatus::Running).await;

    let hub = Arc::clone(&harness.hub);
    stop(harness).await.unwrap();

    assert_eq!(hub.info("wf-4").unwrap().status, WorkflowStatus::Canceled);
    assert!(hub.agents().is_empty());
}

#[tokio::test]
async fn test_shutdown_with_recovery_leaves_workflow_running() {
    let store: SharedStateStore = Arc::new(VersionedStateStore::new(MemoryBackend::new()));
    let engine = Arc::new(
        MockEngine::new()
            .recoverable()
            .with_delay("long", Duration::from_secs(30)),
    );
    let harness = start(engine, Some(Arc::clone(&store)));
    submit(
        &harness.hub,
        "wf-5",
        vec![Step::new("long", "alpine").with_uuid("u-long")],
        0,
    );
    wait_status(&harness.hub, "wf-5", |s| s == WorkflowStatus::Running).await;

    // Give the run time to record the step as running.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let hub = Arc::clone(&harness.hub);
    stop(harness).await.unwrap();

    assert_eq!(hub.info("wf-5").unwrap().status, WorkflowStatus::Running);
    let states = store.get("wf-5").await.unwrap();
    assert!(states.contains_key("u-long"));
}

#[tokio::test]
async fn test_recovery_record_deleted_after_done() {
    let store: SharedStateStore = Arc::new(VersionedStateStore::new(MemoryBackend::new()));
    let engine = Arc::new(MockEngine::new().recoverable());
    let harness = start(engine, Some(Arc::clone(&store)));
    submit(
        &harness.hub,
        "wf-6",
        vec![Step::new("quick", "alpine").with_uuid("u-quick")],
        0,
    );

    let status = wait_status(&harness.hub, "wf-6", WorkflowStatus::is_finished).await;
    assert_eq!(status, WorkflowStatus::Success);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(store.get("wf-6").await.is_err());

    stop(harness).await.unwrap();
}

#[tokio::test]
async fn test_local_engine_end_to_end() {
    let workdir = tempfile::tempdir().unwrap();
    let hub = Arc::new(Hub::new(Duration::from_secs(60), Duration::from_secs(60)));
    let peer: SharedPeer =
        Arc::new(LocalPeer::new(Arc::clone(&hub)).with_long_poll(Duration::from_millis(50)));
    let agent = Agent::builder(peer, Arc::new(LocalEngine::new(workdir.path())))
        .with_config(config())
        .build();
    assert_eq!(agent.config().backend, "local");

    submit(
        &hub,
        "wf-7",
        vec![
            Step::new("hello", "host")
                .with_uuid("u-hello")
                .with_command("echo hello from $CI_MACHINE"),
        ],
        0,
    );

    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    let handle = tokio::spawn(async move { agent.run(token).await });

    let status = wait_status(&hub, "wf-7", WorkflowStatus::is_finished).await;
    assert_eq!(status, WorkflowStatus::Success);
    let logs = hub.logs("wf-7").unwrap();
    assert_eq!(logs[0].data, "hello from test-agent");

    shutdown.cancel();
    handle.await.unwrap().unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Protocol failures
// ─────────────────────────────────────────────────────────────────────────────

/// Peer that speaks another protocol revision.
struct FuturePeer;

#[async_trait]
impl Peer for FuturePeer {
    async fn version(&self) -> drover_types::Result<Version> {
        Ok(Version {
            protocol_version: 99,
            server_version: "9.9.9".into(),
        })
    }
    async fn next(&self, _: &Filter) -> drover_types::Result<Option<Workflow>> {
        Ok(None)
    }
    async fn init(&self, _: &str, _: WorkflowState) -> drover_types::Result<()> {
        Ok(())
    }
    async fn wait(&self, _: &str) -> drover_types::Result<bool> {
        Ok(false)
    }
    async fn done(&self, _: &str, _: WorkflowState) -> drover_types::Result<()> {
        Ok(())
    }
    async fn extend(&self, _: &str) -> drover_types::Result<()> {
        Ok(())
    }
    async fn update(&self, _: &str, _: StepState) -> drover_types::Result<()> {
        Ok(())
    }
    fn enqueue_log(&self, _: LogEntry) {}
    async fn register_agent(&self, _: AgentInfo) -> drover_types::Result<i64> {
        panic!("must not register after a version mismatch");
    }
    async fn unregister_agent(&self) -> drover_types::Result<()> {
        Ok(())
    }
    async fn report_health(&self) -> drover_types::Result<()> {
        Ok(())
    }
}

/// Hub peer whose `wait` fails `failures` times, then reports a server cancel.
struct FlakyWaitPeer {
    inner: LocalPeer,
    error: PeerError,
    failures: usize,
    wait_calls: AtomicUsize,
}

impl FlakyWaitPeer {
    fn new(hub: &Arc<Hub>, error: PeerError, failures: usize) -> Self {
        Self {
            inner: local_peer(hub),
            error,
            failures,
            wait_calls: AtomicUsize::new(0),
        }
    }

    fn wait_calls(&self) -> usize {
        self.wait_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Peer for FlakyWaitPeer {
    async fn version(&self) -> drover_types::Result<Version> {
        self.inner.version().await
    }
    async fn next(&self, filter: &Filter) -> drover_types::Result<Option<Workflow>> {
        self.inner.next(filter).await
    }
    async fn init(&self, id: &str, state: WorkflowState) -> drover_types::Result<()> {
        self.inner.init(id, state).await
    }
    async fn wait(&self, _: &str) -> drover_types::Result<bool> {
        if self.wait_calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            Err(self.error.clone())
        } else {
            Ok(true)
        }
    }
    async fn done(&self, id: &str, state: WorkflowState) -> drover_types::Result<()> {
        self.inner.done(id, state).await
    }
    async fn extend(&self, id: &str) -> drover_types::Result<()> {
        self.inner.extend(id).await
    }
    async fn update(&self, id: &str, step: StepState) -> drover_types::Result<()> {
        self.inner.update(id, step).await
    }
    fn enqueue_log(&self, entry: LogEntry) {
        self.inner.enqueue_log(entry)
    }
    async fn register_agent(&self, info: AgentInfo) -> drover_types::Result<i64> {
        self.inner.register_agent(info).await
    }
    async fn unregister_agent(&self) -> drover_types::Result<()> {
        self.inner.unregister_agent().await
    }
    async fn report_health(&self) -> drover_types::Result<()> {
        self.inner.report_health().await
    }
}

#[tokio::test]
async fn test_wait_transport_errors_are_retried() {
    let hub = Arc::new(Hub::new(Duration::from_secs(60), Duration::from_secs(60)));
    let peer = Arc::new(FlakyWaitPeer::new(
        &hub,
        PeerError::Unavailable("connection reset".into()),
        3,
    ));
    let engine = Arc::new(MockEngine::new().with_delay("deploy", Duration::from_secs(30)));
    let harness = launch(Arc::clone(&hub), peer.clone(), engine, None);
    submit(&hub, "wf-8", vec![Step::new("deploy", "alpine")], 0);

    let status = wait_status(&hub, "wf-8", WorkflowStatus::is_finished).await;
    assert_eq!(status, WorkflowStatus::Canceled);
    assert!(hub.info("wf-8").unwrap().state.canceled);
    assert_eq!(peer.wait_calls(), 4);

    stop(harness).await.unwrap();
}

#[tokio::test]
async fn test_wait_hard_error_leaves_run_going() {
    let hub = Arc::new(Hub::new(Duration::from_secs(60), Duration::from_secs(60)));
    let peer = Arc::new(FlakyWaitPeer::new(
        &hub,
        PeerError::Internal("wait not supported".into()),
        usize::MAX,
    ));
    let engine = Arc::new(MockEngine::new().with_delay("build", Duration::from_millis(200)));
    let harness = launch(Arc::clone(&hub), peer.clone(), engine, None);
    submit(&hub, "wf-9", vec![Step::new("build", "rust")], 0);

    let status = wait_status(&hub, "wf-9", WorkflowStatus::is_finished).await;
    assert_eq!(status, WorkflowStatus::Success);
    assert!(!hub.info("wf-9").unwrap().state.canceled);
    assert_eq!(peer.wait_calls(), 1);

    stop(harness).await.unwrap();
}

#[tokio::test]
async fn test_version_mismatch_is_fatal() {
    let agent = Agent::builder(Arc::new(FuturePeer), Arc::new(MockEngine::new()))
        .with_config(config())
        .build();

    let err = agent.run(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(
        err,
        AgentError::Peer(PeerError::VersionMismatch { server: 99, .. })
    ));
}

#[tokio::test]
async fn test_shutdown_before_work_returns_ok() {
    let harness = start(Arc::new(MockEngine::new()), None);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.hub.agents().len(), 1);

    let hub = Arc::clone(&harness.hub);
    stop(harness).await.unwrap();
    assert!(hub.agents().is_empty());
}
