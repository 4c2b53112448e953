//! Executor that runs scripts through a local shell.

use super::{ExecutionReport, ExecutionRequest, JobExecutor};
use crate::errors::ExecutorError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::PathBuf;
use parking_lot::Mutex;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Runs each script step with `sh -c`.
///
/// `before_script` and `script` run in order and stop at the first nonzero
/// exit. `after_script` always runs afterwards and its exit status is ignored.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    shell: String,
    working_dir: Option<PathBuf>,
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
            working_dir: None,
        }
    }
}

impl ShellExecutor {
    /// Creates an executor using `sh`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the shell binary.
    #[must_use]
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Sets the directory scripts run in.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Runs one step, streaming its stdout and stderr into `logs`.
    ///
    /// Past the deadline the step is killed and whatever it printed so far
    /// is kept.
    async fn run_step(
        &self,
        step: &str,
        env: &BTreeMap<String, String>,
        deadline: Option<Instant>,
        logs: &mut String,
    ) -> Result<StepEnd, ExecutorError> {
        let mut command = Command::new(&self.shell);
        command
            .arg("-c")
            .arg(step)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let spawn_error = |e: std::io::Error| ExecutorError::Spawn {
            step: step.to_string(),
            message: e.to_string(),
            logs: String::new(),
        };
        let mut child = command.spawn().map_err(spawn_error)?;

        let captured = Arc::new(Mutex::new(Vec::new()));
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(capture(stdout, Arc::clone(&captured))));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(capture(stderr, Arc::clone(&captured))));
        }

        let waited = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, child.wait()).await.ok(),
            None => Some(child.wait().await),
        };

        let end = match waited {
            Some(status) => {
                let status = status.map_err(spawn_error)?;
                for reader in readers {
                    let _ = reader.await;
                }
                StepEnd::Exited(status.code().unwrap_or(-1))
            }
            None => {
                if let Err(e) = child.kill().await {
                    warn!(step = %step, error = %e, "Failed to kill timed out step");
                }
                for reader in &readers {
                    reader.abort();
                }
                StepEnd::TimedOut
            }
        };

        logs.push_str(&String::from_utf8_lossy(&captured.lock()));
        Ok(end)
    }

    async fn run_main(
        &self,
        request: &ExecutionRequest,
        deadline: Option<Instant>,
        logs: &mut String,
    ) -> Result<StepEnd, ExecutorError> {
        let steps = request
            .job
            .before_script
            .iter()
            .chain(request.job.script.iter());
        for step in steps {
            let _ = writeln!(logs, "$ {step}");
            match self.run_step(step, &request.variables, deadline, logs).await? {
                StepEnd::Exited(0) => {}
                StepEnd::Exited(code) => {
                    debug!(job = %request.job.name, step = %step, exit_code = code, "Script step failed");
                    return Ok(StepEnd::Exited(code));
                }
                StepEnd::TimedOut => return Ok(StepEnd::TimedOut),
            }
        }
        Ok(StepEnd::Exited(0))
    }

    async fn run_after(&self, request: &ExecutionRequest, logs: &mut String) {
        for step in &request.job.after_script {
            let _ = writeln!(logs, "$ {step}");
            match self.run_step(step, &request.variables, None, logs).await {
                Ok(StepEnd::Exited(0) | StepEnd::TimedOut) => {}
                Ok(StepEnd::Exited(code)) => {
                    warn!(job = %request.job.name, step = %step, exit_code = code, "after_script step failed");
                }
                Err(e) => warn!(job = %request.job.name, error = %e, "after_script step failed to start"),
            }
        }
    }
}

/// How a step ended.
enum StepEnd {
    Exited(i32),
    TimedOut,
}

async fn capture<R: AsyncRead + Unpin>(mut reader: R, sink: Arc<Mutex<Vec<u8>>>) {
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => sink.lock().extend_from_slice(&buf[..n]),
        }
    }
}

#[async_trait]
impl JobExecutor for ShellExecutor {
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionReport, ExecutorError> {
        let mut logs = String::new();
        let deadline = request.timeout.map(|limit| Instant::now() + limit);

        let main = self.run_main(request, deadline, &mut logs).await;
        if matches!(main, Ok(StepEnd::TimedOut)) {
            let _ = writeln!(logs, "job timed out");
        }

        self.run_after(request, &mut logs).await;

        match main {
            Ok(StepEnd::Exited(exit_code)) => Ok(ExecutionReport { exit_code, logs }),
            Ok(StepEnd::TimedOut) => Err(ExecutorError::Timeout {
                timeout_ms: request
                    .timeout
                    .map_or(0, |limit| u64::try_from(limit.as_millis()).unwrap_or(u64::MAX)),
                logs,
            }),
            Err(e) => Err(e.with_logs(logs)),
        }
    }
}
