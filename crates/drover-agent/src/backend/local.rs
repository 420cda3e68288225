//! Host process backend: every step is a `sh -c` child process.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use drover_pipeline::{Engine, EngineError, LogStream};
use drover_types::{Config, State, Step};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, DuplexStream};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub(super) const NAME: &str = "local";

/// Buffer between the output pump and the step's tail reader.
const OUTPUT_BUFFER: usize = 64 * 1024;

/// Exit code of a finished child, or why waiting on it failed.
type ExitOutcome = Option<Result<i32, String>>;

struct StepProcess {
    kill: CancellationToken,
    exit: watch::Receiver<ExitOutcome>,
    /// Read side of the merged output; taken by `tail_step`.
    output: Option<DuplexStream>,
}

struct TaskState {
    dir: PathBuf,
    steps: HashMap<String, StepProcess>,
}

/// Runs steps as host processes inside `<workdir>/<task_uuid>`.
///
/// Images are ignored. Live step status is not tracked, so recovery is
/// unavailable with this backend.
pub struct LocalEngine {
    workdir: PathBuf,
    tasks: Mutex<HashMap<String, TaskState>>,
}

impl LocalEngine {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn task_dir(&self, task_uuid: &str) -> PathBuf {
        let name: String = task_uuid
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.workdir.join(name)
    }

    fn command(step: &Step, dir: &Path) -> Command {
        let script = step_script(step);
        let mut command = match step.entrypoint.split_first() {
            Some((program, args)) => {
                let mut command = Command::new(program);
                command.args(args);
                if let Some(script) = script {
                    command.arg(script);
                }
                command
            }
            None => {
                let mut command = Command::new("sh");
                command.arg("-c").arg(script.unwrap_or_default());
                command
            }
        };

        command
            .envs(&step.environment)
            .env("CI_WORKSPACE", dir)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    fn with_step<T>(
        &self,
        step: &Step,
        task_uuid: &str,
        f: impl FnOnce(&mut StepProcess) -> T,
    ) -> Result<T, EngineError> {
        let mut tasks = self.tasks.lock();
        tasks
            .get_mut(task_uuid)
            .and_then(|task| task.steps.get_mut(step_key(step)))
            .map(f)
            .ok_or_else(|| EngineError::UnknownStep(step.name.clone()))
    }
}

#[async_trait]
impl Engine for LocalEngine {
    fn name(&self) -> &str {
        NAME
    }

    async fn setup_workflow(&self, _config: &Config, task_uuid: &str) -> Result<(), EngineError> {
        let dir = self.task_dir(task_uuid);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| EngineError::Setup(format!("{}: {e}", dir.display())))?;

        debug!(task_uuid, dir = %dir.display(), "Workspace ready");
        self.tasks.lock().insert(
            task_uuid.to_string(),
            TaskState {
                dir,
                steps: HashMap::new(),
            },
        );
        Ok(())
    }

    async fn start_step(&self, step: &Step, task_uuid: &str) -> Result<(), EngineError> {
        let dir = self
            .tasks
            .lock()
            .get(task_uuid)
            .map(|task| task.dir.clone())
            .ok_or_else(|| EngineError::step(step.name.clone(), "workflow is not set up"))?;

        let mut child = Self::command(step, &dir)
            .spawn()
            .map_err(|e| EngineError::step(step.name.clone(), e))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (sink, output) = if step.detached {
            (None, None)
        } else {
            let (writer, reader) = tokio::io::duplex(OUTPUT_BUFFER);
            (Some(writer), Some(reader))
        };
        tokio::spawn(pump(stdout, stderr, sink));

        let kill = CancellationToken::new();
        let (exit_tx, exit) = watch::channel(None);
        tokio::spawn(supervise(child, kill.clone(), exit_tx));

        debug!(task_uuid, step = %step.name, detached = step.detached, "Step process started");
        let mut tasks = self.tasks.lock();
        let task = tasks
            .get_mut(task_uuid)
            .ok_or_else(|| EngineError::step(step.name.clone(), "workflow was destroyed"))?;
        if let Some(old) = task.steps.insert(
            step_key(step).to_string(),
            StepProcess { kill, exit, output },
        ) {
            old.kill.cancel();
        }
        Ok(())
    }

    async fn wait_step(&self, step: &Step, task_uuid: &str) -> Result<State, EngineError> {
        let mut exit = self.with_step(step, task_uuid, |process| {
            // Unread output would otherwise block the child on a full pipe.
            process.output = None;
            process.exit.clone()
        })?;

        let outcome = exit
            .wait_for(Option::is_some)
            .await
            .map_err(|_| EngineError::step(step.name.clone(), "process supervisor stopped"))?
            .clone();

        match outcome {
            Some(Ok(code)) => Ok(State::exited(code)),
            Some(Err(message)) => Err(EngineError::step(step.name.clone(), message)),
            None => Err(EngineError::step(step.name.clone(), "no exit status")),
        }
    }

    async fn tail_step(&self, step: &Step, task_uuid: &str) -> Result<LogStream, EngineError> {
        self.with_step(step, task_uuid, |process| process.output.take())?
            .map(|reader| Box::new(reader) as LogStream)
            .ok_or_else(|| EngineError::step(step.name.clone(), "output already taken"))
    }

    async fn destroy_step(&self, step: &Step, task_uuid: &str) -> Result<(), EngineError> {
        let process = self
            .tasks
            .lock()
            .get_mut(task_uuid)
            .and_then(|task| task.steps.remove(step_key(step)));
        if let Some(process) = process {
            process.kill.cancel();
        }
        Ok(())
    }

    async fn destroy_workflow(&self, _config: &Config, task_uuid: &str) -> Result<(), EngineError> {
        let task = self.tasks.lock().remove(task_uuid);
        let Some(task) = task else {
            return Ok(());
        };

        let mut exits = Vec::with_capacity(task.steps.len());
        for (_, process) in task.steps {
            process.kill.cancel();
            exits.push(process.exit);
        }
        for mut exit in exits {
            let _ = exit.wait_for(Option::is_some).await;
        }

        match tokio::fs::remove_dir_all(&task.dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(EngineError::Teardown(format!("{}: {e}", task.dir.display()))),
        }
    }
}

fn step_key(step: &Step) -> &str {
    if step.uuid.is_empty() {
        &step.name
    } else {
        &step.uuid
    }
}

/// The shell script for a step's commands, `None` when it has none.
fn step_script(step: &Step) -> Option<String> {
    if step.commands.is_empty() {
        return None;
    }
    let mut script = String::from("set -e\n");
    for command in &step.commands {
        script.push_str(command);
        script.push('\n');
    }
    Some(script)
}

/// Wait for the child, killing it first once `kill` fires.
async fn supervise(
    mut child: Child,
    kill: CancellationToken,
    exit: watch::Sender<ExitOutcome>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill.cancelled() => {
            if let Err(e) = child.start_kill() {
                debug!(error = %e, "Step process already gone");
            }
            child.wait().await
        }
    };
    exit.send_replace(Some(status.map(exit_code).map_err(|e| e.to_string())));
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

/// Merge stdout and stderr line by line into `sink`.
///
/// Keeps draining after the reader goes away so the child never blocks.
async fn pump(
    stdout: Option<impl AsyncRead + Unpin>,
    stderr: Option<impl AsyncRead + Unpin>,
    mut sink: Option<DuplexStream>,
) {
    let mut out = stdout.map(|s| BufReader::new(s).split(b'\n'));
    let mut err = stderr.map(|s| BufReader::new(s).split(b'\n'));

    while out.is_some() || err.is_some() {
        let segment = tokio::select! {
            line = async { out.as_mut()?.next_segment().await.transpose() }, if out.is_some() => {
                if !matches!(line, Some(Ok(_))) {
                    out = None;
                }
                line
            }
            line = async { err.as_mut()?.next_segment().await.transpose() }, if err.is_some() => {
                if !matches!(line, Some(Ok(_))) {
                    err = None;
                }
                line
            }
        };

        let Some(Ok(mut line)) = segment else {
            continue;
        };
        let Some(writer) = sink.as_mut() else {
            continue;
        };
        line.push(b'\n');
        if writer.write_all(&line).await.is_err() {
            sink = None;
        }
    }

    if let Some(mut writer) = sink
        && let Err(e) = writer.shutdown().await
    {
        warn!(error = %e, "Failed to close step output");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn engine() -> (LocalEngine, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (LocalEngine::new(dir.path()), dir)
    }

    async fn read_all(mut stream: LogStream) -> String {
        let mut out = String::new();
        stream.read_to_string(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn test_runs_commands_in_workspace() {
        let (engine, root) = engine();
        let config = Config::default();
        engine.setup_workflow(&config, "task/1").await.unwrap();

        let step = Step::new("build", "ignored")
            .with_uuid("u-1")
            .with_env("GREETING", "hello")
            .with_command("echo $GREETING")
            .with_command("echo oops >&2")
            .with_command("pwd");

        engine.start_step(&step, "task/1").await.unwrap();
        let stream = engine.tail_step(&step, "task/1").await.unwrap();
        let state = engine.wait_step(&step, "task/1").await.unwrap();
        let output = read_all(stream).await;

        assert_eq!(state, State::exited(0));
        assert!(output.contains("hello\n"));
        assert!(output.contains("oops\n"));
        assert!(output.contains("task_1"));

        engine.destroy_step(&step, "task/1").await.unwrap();
        engine.destroy_workflow(&config, "task/1").await.unwrap();
        assert!(!root.path().join("task_1").exists());
    }

    #[tokio::test]
    async fn test_set_e_stops_at_first_failure() {
        let (engine, _root) = engine();
        engine.setup_workflow(&Config::default(), "t").await.unwrap();

        let step = Step::new("test", "x")
            .with_command("exit 3")
            .with_command("echo unreachable");
        engine.start_step(&step, "t").await.unwrap();
        let stream = engine.tail_step(&step, "t").await.unwrap();

        assert_eq!(engine.wait_step(&step, "t").await.unwrap(), State::exited(3));
        assert!(!read_all(stream).await.contains("unreachable"));
    }

    #[tokio::test]
    async fn test_entrypoint_overrides_shell() {
        let (engine, _root) = engine();
        engine.setup_workflow(&Config::default(), "t").await.unwrap();

        let mut step = Step::new("script", "x").with_command("echo from-script");
        step.entrypoint = vec!["/bin/sh".into(), "-c".into()];
        engine.start_step(&step, "t").await.unwrap();
        let stream = engine.tail_step(&step, "t").await.unwrap();

        assert_eq!(engine.wait_step(&step, "t").await.unwrap(), State::exited(0));
        assert_eq!(read_all(stream).await, "from-script\n");
    }

    #[tokio::test]
    async fn test_untailed_output_does_not_block() {
        let (engine, _root) = engine();
        engine.setup_workflow(&Config::default(), "t").await.unwrap();

        let step = Step::new("noisy", "x").with_command("yes line | head -n 100000");
        engine.start_step(&step, "t").await.unwrap();
        assert_eq!(engine.wait_step(&step, "t").await.unwrap(), State::exited(0));
    }

    #[tokio::test]
    async fn test_destroy_workflow_kills_detached() {
        let (engine, root) = engine();
        let config = Config::default();
        engine.setup_workflow(&config, "t").await.unwrap();

        let service = Step::new("db", "x").with_command("sleep 30").detached();
        engine.start_step(&service, "t").await.unwrap();
        assert!(engine.tail_step(&service, "t").await.is_err());

        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            engine.destroy_workflow(&config, "t"),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(!root.path().join("t").exists());
    }

    #[tokio::test]
    async fn test_unknown_step_and_missing_setup() {
        let (engine, _root) = engine();
        let step = Step::new("ghost", "x");

        assert!(matches!(
            engine.wait_step(&step, "t").await,
            Err(EngineError::UnknownStep(_))
        ));
        assert!(matches!(
            engine.start_step(&step, "t").await,
            Err(EngineError::Step { .. })
        ));
    }
}
