//! Remote executor trait

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::time::timeout;
use tracing::{debug, error, warn};

use crate::elevation::{ElevationStrategy, Elevator, Invocation};
use crate::error::ExecError;
use crate::records::{self, Record};
use crate::result::CommandResult;
use crate::stream::{LogSink, send_summary};
use crate::transfer::{self, DEFAULT_STAGING_DIR, FileTransfer};

/// Runs commands and file transfers against one host
///
/// Implementors supply the two primitive operations, buffered and streaming
/// execution of an [`Invocation`]; everything else is built on top of them.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run an invocation and collect its output
    async fn execute(&self, invocation: &Invocation) -> Result<CommandResult, ExecError>;

    /// Run an invocation, delivering output lines to `sink` as they arrive
    ///
    /// The returned result carries the exit status and the tail of stderr;
    /// stdout is left empty. Implementations must not hold on to clones of
    /// `sink` after the returned future completes or is dropped.
    ///
    /// Stdin stays open for prompt replies unless the executor's responder is
    /// [`PromptResponder::none`](crate::stream::PromptResponder::none).
    async fn execute_streaming(
        &self,
        invocation: &Invocation,
        sink: &LogSink,
    ) -> Result<CommandResult, ExecError>;

    /// Elevation state for this executor
    fn elevator(&self) -> &Elevator;

    /// Get executor type name (for logging)
    fn executor_type(&self) -> &'static str;

    /// Name of the host this executor is bound to
    fn target(&self) -> &str;

    /// Remote directory used for staging file transfers
    fn staging_dir(&self) -> &str {
        DEFAULT_STAGING_DIR
    }

    /// Execute a command
    async fn run(&self, cmd: &str) -> Result<CommandResult, ExecError> {
        self.execute(&Invocation::new(cmd)).await
    }

    /// Execute a command with a deadline
    async fn run_with_timeout(
        &self,
        cmd: &str,
        timeout_duration: Duration,
    ) -> Result<CommandResult, ExecError> {
        let start = Instant::now();
        debug!(host = %self.target(), command = %cmd, timeout = ?timeout_duration, "executing with timeout");

        match timeout(timeout_duration, self.run(cmd)).await {
            Ok(result) => result,
            Err(_) => {
                error!(
                    host = %self.target(),
                    command = %cmd,
                    timeout = ?timeout_duration,
                    elapsed = ?start.elapsed(),
                    "command timed out"
                );
                Err(ExecError::Timeout {
                    timeout: timeout_duration,
                })
            }
        }
    }

    /// Execute a short command and return combined stdout and stderr
    ///
    /// # Errors
    /// Non-zero exit is reported as `ExecError::CommandFailed`
    async fn run_buffered(&self, cmd: &str) -> Result<String, ExecError> {
        let result = self.run(cmd).await?.into_checked()?;
        Ok(result.combined_output())
    }

    /// Execute a command with root privileges
    async fn run_elevated(&self, cmd: &str) -> Result<CommandResult, ExecError> {
        let invocation = self.elevate(cmd).await?;
        self.execute(&invocation).await
    }

    /// Rewrite `cmd` so it runs as root on this host
    ///
    /// Commands are left untouched when elevation is disabled or the login
    /// account is already root.
    async fn elevate(&self, cmd: &str) -> Result<Invocation, ExecError> {
        let strategy = self.elevator().strategy();
        if matches!(strategy, ElevationStrategy::None) || self.is_privileged().await? {
            Ok(Invocation::new(cmd))
        } else {
            Ok(strategy.wrap(cmd))
        }
    }

    /// Whether the login account is root, checked once and cached
    async fn is_privileged(&self) -> Result<bool, ExecError> {
        self.elevator()
            .privileged()
            .get_or_try_init(|| async {
                let user = self.run("whoami").await?.into_checked()?;
                let privileged = user.stdout.trim() == "root";
                debug!(host = %self.target(), privileged, "checked login account");
                Ok::<bool, ExecError>(privileged)
            })
            .await
            .copied()
    }

    /// Stream a command's output, then deliver the terminal event and close the sink
    ///
    /// # Errors
    /// Returns the execution error, or `CommandFailed` on non-zero exit
    async fn run_streaming(&self, cmd: &str, sink: LogSink) -> Result<(), ExecError> {
        stream_to_completion(self, Invocation::new(cmd), sink, None).await
    }

    /// Stream an elevated command
    async fn run_streaming_elevated(&self, cmd: &str, sink: LogSink) -> Result<(), ExecError> {
        match self.elevate(cmd).await {
            Ok(invocation) => stream_to_completion(self, invocation, sink, None).await,
            Err(e) => {
                let outcome = Err(e);
                send_summary(&sink, &outcome).await;
                outcome.map(|_: CommandResult| ())
            }
        }
    }

    /// Stream a command with a deadline; expiry still ends with a terminal event
    async fn run_streaming_with_timeout(
        &self,
        cmd: &str,
        sink: LogSink,
        timeout_duration: Duration,
    ) -> Result<(), ExecError> {
        stream_to_completion(self, Invocation::new(cmd), sink, Some(timeout_duration)).await
    }

    /// Copy a local file to the host through a staging file
    async fn copy_file(&self, file: &FileTransfer) -> Result<(), ExecError> {
        transfer::copy_file(self, file).await
    }

    /// Copy several files concurrently; the first error is returned
    async fn copy_files(&self, files: &[FileTransfer]) -> Result<(), ExecError> {
        let results = futures::future::join_all(files.iter().map(|f| self.copy_file(f))).await;
        let failed: Vec<ExecError> = results.into_iter().filter_map(Result::err).collect();
        if failed.len() > 1 {
            warn!(host = %self.target(), failed = failed.len(), "multiple file transfers failed");
        }
        failed.into_iter().next().map_or(Ok(()), Err)
    }

    /// Create a directory and its parents as root
    async fn mkdir_all(&self, path: &str) -> Result<(), ExecError> {
        records::mkdir_all(self, path).await
    }

    /// Add or replace one `/etc/hosts` entry
    async fn add_host_record(&self, record: &Record) -> Result<(), ExecError> {
        records::add_host_records(self, std::slice::from_ref(record)).await
    }

    /// Add or replace several `/etc/hosts` entries in one write
    async fn add_host_records(&self, records: &[Record]) -> Result<(), ExecError> {
        records::add_host_records(self, records).await
    }

    /// Append a nameserver to `/etc/resolv.conf` unless already present
    async fn add_nameserver(&self, ip: &str) -> Result<(), ExecError> {
        records::add_nameserver(self, ip).await
    }

    /// Release the underlying session
    async fn close(&self) -> Result<(), ExecError> {
        Ok(())
    }
}

async fn stream_to_completion<E>(
    executor: &E,
    invocation: Invocation,
    sink: LogSink,
    limit: Option<Duration>,
) -> Result<(), ExecError>
where
    E: RemoteExecutor + ?Sized,
{
    let outcome = match limit {
        Some(limit) => timeout(limit, executor.execute_streaming(&invocation, &sink))
            .await
            .unwrap_or_else(|_| {
                error!(host = %executor.target(), timeout = ?limit, "streaming command timed out");
                Err(ExecError::Timeout { timeout: limit })
            }),
        None => executor.execute_streaming(&invocation, &sink).await,
    };

    send_summary(&sink, &outcome).await;
    drop(sink);

    outcome?.into_checked().map(|_| ())
}
