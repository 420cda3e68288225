//! Step log streaming.

use async_trait::async_trait;
use drover_pipeline::{LogStream, Logger};
use drover_types::{LogEntry, SharedPeer, Step, unix_now};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tracing::{debug, warn};

/// Longer lines are split into several entries of at most this many bytes.
pub const MAX_LINE_BYTES: u64 = 64 * 1024;

/// Splits a step's output into lines and queues each through the peer.
pub struct AgentLogger {
    peer: SharedPeer,
    workflow_id: String,
    /// Unix seconds the run started; entry times are relative to it.
    started: i64,
}

impl AgentLogger {
    pub fn new(peer: SharedPeer, workflow_id: impl Into<String>, started: i64) -> Self {
        Self {
            peer,
            workflow_id: workflow_id.into(),
            started,
        }
    }
}

#[async_trait]
impl Logger for AgentLogger {
    async fn log(&self, step: &Step, stream: LogStream) {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        let mut line = 0u64;

        loop {
            buf.clear();
            let read = (&mut reader)
                .take(MAX_LINE_BYTES)
                .read_until(b'\n', &mut buf)
                .await;
            match read {
                Ok(0) => break,
                Ok(_) => {
                    let data = String::from_utf8_lossy(&buf)
                        .trim_end_matches(['\n', '\r'])
                        .to_string();
                    self.peer.enqueue_log(LogEntry {
                        workflow_id: self.workflow_id.clone(),
                        step_uuid: step.uuid.clone(),
                        time: (unix_now() - self.started).max(0),
                        line,
                        data,
                    });
                    line += 1;
                }
                Err(e) => {
                    warn!(
                        workflow_id = %self.workflow_id,
                        step = %step.name,
                        error = %e,
                        "Failed to read step output"
                    );
                    break;
                }
            }
        }

        debug!(
            workflow_id = %self.workflow_id,
            step = %step.name,
            lines = line,
            "Step output closed"
        );
    }
}
