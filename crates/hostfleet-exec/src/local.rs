//! Local command execution using `tokio::process`

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::{debug, error, instrument};

use crate::elevation::{ElevationStrategy, Elevator, Invocation};
use crate::error::ExecError;
use crate::host::HostIdentity;
use crate::result::CommandResult;
use crate::stream::{LineForwarder, LogSink, PromptResponder, drain_reader};
use crate::traits::RemoteExecutor;
use crate::transfer::DEFAULT_STAGING_DIR;

/// Local command executor
///
/// Executes commands on the local machine through `sh -c`, so pipes and
/// redirections behave as they would over SSH.
#[derive(Debug)]
pub struct LocalExecutor {
    name: String,
    elevator: Elevator,
    staging_dir: String,
    responder: Arc<PromptResponder>,
}

impl LocalExecutor {
    /// Create a local executor with elevation disabled
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: "localhost".to_string(),
            elevator: Elevator::disabled(),
            staging_dir: DEFAULT_STAGING_DIR.to_string(),
            responder: Arc::new(PromptResponder::default()),
        }
    }

    /// Create a local executor for a host entry with `transport = "local"`
    ///
    /// # Errors
    /// Returns `ExecError::ConfigError` if the elevation settings are inconsistent
    pub fn for_host(host: &HostIdentity) -> Result<Self, ExecError> {
        Ok(Self {
            name: host.name().to_string(),
            elevator: Elevator::new(ElevationStrategy::for_host(host)?),
            ..Self::new()
        })
    }

    /// Set the directory used to stage file transfers
    #[must_use]
    pub fn with_staging_dir(mut self, dir: impl Into<String>) -> Self {
        self.staging_dir = dir.into();
        self
    }

    /// Replace the prompt responder
    #[must_use]
    pub fn with_prompt_responder(mut self, responder: PromptResponder) -> Self {
        self.responder = Arc::new(responder);
        self
    }

    fn command(invocation: &Invocation, stdin: Stdio) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(invocation.command())
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new()
    }
}

async fn write_secret(stdin: &mut ChildStdin, secret: &SecretString) -> Result<(), ExecError> {
    let mut line = secret.expose_secret().as_bytes().to_vec();
    line.push(b'\n');
    stdin
        .write_all(&line)
        .await
        .map_err(|e| ExecError::IoError(e.to_string()))
}

fn exit_code(status: &ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

#[async_trait]
impl RemoteExecutor for LocalExecutor {
    #[instrument(skip(self, invocation), fields(host = %self.name), level = "debug")]
    async fn execute(&self, invocation: &Invocation) -> Result<CommandResult, ExecError> {
        let start = Instant::now();
        let cmd = invocation.command();

        debug!(command = %cmd, "executing local command");

        let stdin = if invocation.stdin_secret().is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        };
        let mut child = Self::command(invocation, stdin)
            .spawn()
            .map_err(|e| ExecError::SpawnError(e.to_string()))?;

        if let (Some(secret), Some(mut stdin)) = (invocation.stdin_secret(), child.stdin.take()) {
            write_secret(&mut stdin, secret).await?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ExecError::IoError(e.to_string()))?;

        let duration = start.elapsed();
        let status = exit_code(&output.status);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        debug!(command = %cmd, status, duration = ?duration, "command completed");

        if !output.status.success() {
            error!(command = %cmd, status, stderr = %stderr.trim(), "command failed");
        }

        Ok(CommandResult {
            status,
            stdout,
            stderr,
            duration,
        })
    }

    #[instrument(skip(self, invocation, sink), fields(host = %self.name), level = "debug")]
    async fn execute_streaming(
        &self,
        invocation: &Invocation,
        sink: &LogSink,
    ) -> Result<CommandResult, ExecError> {
        let start = Instant::now();
        debug!(command = %invocation.command(), "streaming local command");

        let mut child = Self::command(invocation, Stdio::piped())
            .spawn()
            .map_err(|e| ExecError::SpawnError(e.to_string()))?;

        let mut stdin = child.stdin.take();
        if let (Some(secret), Some(pipe)) = (invocation.stdin_secret(), stdin.as_mut()) {
            write_secret(pipe, secret).await?;
        }
        if !self.responder.is_enabled() {
            stdin = None;
        }
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExecError::IoError("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExecError::IoError("stderr not captured".to_string()))?;

        let (prompt_tx, mut prompt_rx) = mpsc::unbounded_channel();
        let out = LineForwarder::new(false, sink.clone(), self.responder.clone(), prompt_tx.clone());
        let err = LineForwarder::new(true, sink.clone(), self.responder.clone(), prompt_tx);

        let reply = self.responder.reply().to_vec();
        let answer_prompts = async move {
            while prompt_rx.recv().await.is_some() {
                let Some(pipe) = stdin.as_mut() else { continue };
                if let Err(e) = pipe.write_all(&reply).await {
                    debug!(error = %e, "stdin closed, prompts can no longer be answered");
                    stdin = None;
                }
            }
        };

        let (_, stderr_tail, (), exit) = tokio::join!(
            drain_reader(stdout, out),
            drain_reader(stderr, err),
            answer_prompts,
            child.wait(),
        );

        let exit = exit.map_err(|e| ExecError::IoError(e.to_string()))?;
        let status = exit_code(&exit);
        let duration = start.elapsed();
        debug!(status, duration = ?duration, "streaming command completed");

        Ok(CommandResult {
            status,
            stdout: String::new(),
            stderr: stderr_tail,
            duration,
        })
    }

    fn elevator(&self) -> &Elevator {
        &self.elevator
    }

    fn executor_type(&self) -> &'static str {
        "local"
    }

    fn target(&self) -> &str {
        &self.name
    }

    fn staging_dir(&self) -> &str {
        &self.staging_dir
    }
}
