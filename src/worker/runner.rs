//! Worker process execution.
//!
//! A worker is one external agent process assigned to one issue. The runner
//! spawns it, captures stdout/stderr, and enforces a wall-clock timeout.
//! Kill-on-timeout is best-effort: signal, wait out a short grace period,
//! then force-kill; failures to kill are swallowed because the calling flow
//! is already unblocked by the timeout path.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to spawn worker process {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What the supervisor asks a runner to do.
#[derive(Debug, Clone)]
pub struct WorkerRequest {
    pub issue: u64,
    pub prompt: String,
    pub timeout: Duration,
}

/// What happened to a worker process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerOutcome {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub duration_ms: u64,
}

/// Capability seam over worker execution, so the supervisor is testable
/// with a scripted runner.
#[async_trait]
pub trait WorkerRunner: Send + Sync {
    async fn run(&self, request: &WorkerRequest) -> Result<WorkerOutcome, WorkerError>;
}

/// Grace period between signalling a timed-out worker and force-killing it.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Runs workers as external agent processes: `<program> <base_args...>
/// <prompt>`.
#[derive(Debug, Clone)]
pub struct ProcessWorkerRunner {
    program: String,
    base_args: Vec<String>,
}

impl ProcessWorkerRunner {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            base_args: Vec::new(),
        }
    }

    pub fn with_base_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.base_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// The Claude Code CLI invocation shape (`claude -p <prompt>`).
    pub fn claude_code() -> Self {
        Self::new("claude").with_base_args(["-p"])
    }
}

#[async_trait]
impl WorkerRunner for ProcessWorkerRunner {
    async fn run(&self, request: &WorkerRequest) -> Result<WorkerOutcome, WorkerError> {
        info!(
            issue = request.issue,
            program = %self.program,
            timeout_secs = request.timeout.as_secs(),
            "Spawning worker process"
        );

        let started = Instant::now();
        let mut child = Command::new(&self.program)
            .args(&self.base_args)
            .arg(&request.prompt)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| WorkerError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        // Drain pipes concurrently with the wait so a chatty worker cannot
        // deadlock on a full pipe buffer.
        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();
        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(pipe) = stdout_pipe.as_mut() {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(pipe) = stderr_pipe.as_mut() {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });

        let (status, timed_out) =
            match tokio::time::timeout(request.timeout, child.wait()).await {
                Ok(status) => (Some(status?), false),
                Err(_) => {
                    warn!(issue = request.issue, "Worker timed out, killing process");
                    let _ = child.start_kill();
                    let status = match tokio::time::timeout(KILL_GRACE, child.wait()).await {
                        Ok(status) => status.ok(),
                        Err(_) => {
                            // Still running after the grace period; one more
                            // forced attempt, then give up and let
                            // kill_on_drop reap it.
                            let _ = child.kill().await;
                            None
                        }
                    };
                    (status, true)
                }
            };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        let duration_ms = started.elapsed().as_millis() as u64;

        let exit_code = status.as_ref().and_then(|s| s.code());
        let success = !timed_out && status.as_ref().map(|s| s.success()).unwrap_or(false);

        debug!(
            issue = request.issue,
            success, exit_code, timed_out, duration_ms, "Worker process finished"
        );

        Ok(WorkerOutcome {
            success,
            exit_code,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            timed_out,
            duration_ms,
        })
    }
}
