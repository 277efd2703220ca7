//! Parallel fan-out: one operation against many hosts
//!
//! Every host gets its own task. A host's failure, timeout or panic is
//! recorded in its [`PerHostOutcome`] and never cancels its siblings; the
//! aggregate is reduced only after every leaf has finished.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use hostfleet_exec::stream::DEFAULT_LOG_CAPACITY;
use hostfleet_exec::{
    DiskExtend, ErrorKind, ExecError, FileTransfer, HostIdentity, LogEvent, Record,
    RemoteExecutor, StreamSummary, SystemOps, log_channel,
};

use crate::pool::ExecutorPool;

/// Operation applied to every host of a fan-out
#[derive(Debug, Clone)]
pub enum Operation {
    /// Run a shell command
    Exec {
        /// Command text
        command: String,
        /// Run with root privileges
        elevate: bool,
    },
    /// Install one file
    CopyFile(FileTransfer),
    /// Install several files
    CopyFiles(Vec<FileTransfer>),
    /// Add or replace one `/etc/hosts` entry
    AddHostRecord(Record),
    /// Add or replace several `/etc/hosts` entries
    AddHostRecords(Vec<Record>),
    /// Add a resolver nameserver
    AddNameserver(String),
    /// Grow a logical volume onto a new block device
    ExtendDisk(DiskExtend),
    /// Collect distribution and hardware facts
    Facts,
}

impl Operation {
    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Exec { .. } => "exec",
            Operation::CopyFile(_) => "copy_file",
            Operation::CopyFiles(_) => "copy_files",
            Operation::AddHostRecord(_) => "add_host_record",
            Operation::AddHostRecords(_) => "add_host_records",
            Operation::AddNameserver(_) => "add_nameserver",
            Operation::ExtendDisk(_) => "extend_disk",
            Operation::Facts => "facts",
        }
    }

    /// Apply the operation to one executor
    ///
    /// Returns command output for `Exec`, the grown volume for `ExtendDisk`
    /// and a one-line summary for `Facts`; other operations return nothing.
    ///
    /// # Errors
    /// Returns the executor's error; non-zero exit is `ExecError::CommandFailed`
    pub async fn apply(&self, executor: &dyn RemoteExecutor) -> Result<String, ExecError> {
        match self {
            Operation::Exec { command, elevate } => {
                let result = if *elevate {
                    executor.run_elevated(command).await?
                } else {
                    executor.run(command).await?
                };
                Ok(result.into_checked()?.combined_output())
            }
            Operation::CopyFile(file) => executor.copy_file(file).await.map(|()| String::new()),
            Operation::CopyFiles(files) => executor.copy_files(files).await.map(|()| String::new()),
            Operation::AddHostRecord(record) => executor
                .add_host_record(record)
                .await
                .map(|()| String::new()),
            Operation::AddHostRecords(records) => executor
                .add_host_records(records)
                .await
                .map(|()| String::new()),
            Operation::AddNameserver(ip) => executor.add_nameserver(ip).await.map(|()| String::new()),
            Operation::ExtendDisk(request) => executor
                .extend_disk(request)
                .await
                .map(|volume| volume.mapper_path()),
            Operation::Facts => executor.facts().await.map(|facts| facts.to_string()),
        }
    }
}

/// Outcome of one fan-out leaf
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerHostOutcome {
    /// Host name
    pub host: String,
    /// Host address
    pub address: String,
    /// Whether the operation succeeded
    pub success: bool,
    /// Error text when it did not
    pub error: Option<String>,
    /// Error classification when it did not
    pub kind: Option<ErrorKind>,
    /// Output of the operation, see [`Operation::apply`]
    pub output: String,
    /// Wall time spent on this host
    pub elapsed: Duration,
}

impl PerHostOutcome {
    fn from_result(host: &HostIdentity, result: Result<String, ExecError>, elapsed: Duration) -> Self {
        let (success, error, kind, output) = match result {
            Ok(output) => (true, None, None, output),
            Err(e) => (false, Some(e.to_string()), Some(e.kind()), String::new()),
        };
        Self {
            host: host.name().to_string(),
            address: host.address().to_string(),
            success,
            error,
            kind,
            output,
            elapsed,
        }
    }

    fn panicked(host: &HostIdentity, message: String, elapsed: Duration) -> Self {
        Self {
            host: host.name().to_string(),
            address: host.address().to_string(),
            success: false,
            error: Some(format!("task panicked: {message}")),
            kind: None,
            output: String::new(),
            elapsed,
        }
    }
}

/// Reduced result of a fan-out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateResult {
    /// True iff every outcome succeeded
    pub overall_success: bool,
    /// One outcome per host, in submission order
    pub results: Vec<PerHostOutcome>,
}

impl AggregateResult {
    /// Reduce outcomes
    pub fn from_outcomes(results: Vec<PerHostOutcome>) -> Self {
        Self {
            overall_success: results.iter().all(|r| r.success),
            results,
        }
    }

    /// Outcomes that failed
    pub fn failures(&self) -> impl Iterator<Item = &PerHostOutcome> {
        self.results.iter().filter(|r| !r.success)
    }

    /// Outcome for a host name
    pub fn get(&self, host: &str) -> Option<&PerHostOutcome> {
        self.results.iter().find(|r| r.host == host)
    }
}

/// A log event tagged with the host that produced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostLogEvent {
    /// Host name
    pub host: String,
    /// Event from that host's stream
    pub event: LogEvent,
}

/// Coordinator that fans operations out over a shared executor pool
#[derive(Debug, Clone)]
pub struct FanOut {
    pool: Arc<ExecutorPool>,
    per_host_timeout: Option<Duration>,
}

impl FanOut {
    /// Coordinator without a per-host deadline
    pub fn new(pool: Arc<ExecutorPool>) -> Self {
        Self {
            pool,
            per_host_timeout: None,
        }
    }

    /// Bound each host's leaf; expiry becomes a failed outcome
    #[must_use]
    pub fn with_per_host_timeout(mut self, limit: Option<Duration>) -> Self {
        self.per_host_timeout = limit;
        self
    }

    /// Shared executor pool
    pub fn pool(&self) -> &Arc<ExecutorPool> {
        &self.pool
    }

    /// Apply `operation` to every host concurrently
    pub async fn run(&self, operation: &Operation, hosts: &[HostIdentity]) -> AggregateResult {
        info!(operation = operation.name(), hosts = hosts.len(), "dispatching fan-out");
        let operation = Arc::new(operation.clone());

        let result = dispatch(hosts, |host| {
            let pool = self.pool.clone();
            let operation = operation.clone();
            with_deadline(self.per_host_timeout, async move {
                let executor = pool.get(&host).await?;
                operation.apply(executor.as_ref()).await
            })
        })
        .await;

        log_reduced(operation.name(), &result);
        result
    }

    /// Stream a command on every host concurrently
    ///
    /// Each host streams into its own sink; events are relayed tagged with
    /// the host name. Every host contributes exactly one `Finished` event to
    /// the relay, including hosts that could not be reached or timed out.
    pub async fn run_streaming(
        &self,
        command: &str,
        elevate: bool,
        hosts: &[HostIdentity],
        relay: mpsc::Sender<HostLogEvent>,
    ) -> AggregateResult {
        info!(hosts = hosts.len(), "dispatching streaming fan-out");
        let command: Arc<str> = Arc::from(command);

        let result = dispatch(hosts, |host| {
            let pool = self.pool.clone();
            let command = command.clone();
            let relay = relay.clone();
            let limit = self.per_host_timeout;
            async move {
                let finished = AtomicBool::new(false);
                let leaf = stream_leaf(&pool, &host, &command, elevate, &relay, &finished);
                let result = with_deadline(limit, leaf).await;
                if let Err(e @ ExecError::Timeout { .. }) = &result
                    && !finished.load(Ordering::Acquire)
                {
                    relay_finished(&relay, &host, e.clone(), &finished).await;
                }
                result
            }
        })
        .await;

        log_reduced("stream", &result);
        result
    }
}

async fn with_deadline<F>(limit: Option<Duration>, leaf: F) -> Result<String, ExecError>
where
    F: Future<Output = Result<String, ExecError>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, leaf)
            .await
            .unwrap_or(Err(ExecError::Timeout { timeout: limit })),
        None => leaf.await,
    }
}

async fn stream_leaf(
    pool: &ExecutorPool,
    host: &HostIdentity,
    command: &str,
    elevate: bool,
    relay: &mpsc::Sender<HostLogEvent>,
    finished: &AtomicBool,
) -> Result<String, ExecError> {
    let executor = match pool.get(host).await {
        Ok(executor) => executor,
        Err(e) => {
            relay_finished(relay, host, e.clone(), finished).await;
            return Err(e);
        }
    };

    let (sink, mut stream) = log_channel(DEFAULT_LOG_CAPACITY);
    let forward = async {
        while let Some(event) = stream.recv().await {
            let terminal = matches!(event, LogEvent::Finished(_));
            let tagged = HostLogEvent {
                host: host.name().to_string(),
                event,
            };
            // a dropped relay must not stall the command
            let _ = relay.send(tagged).await;
            if terminal {
                finished.store(true, Ordering::Release);
            }
        }
    };
    let run = async {
        if elevate {
            executor.run_streaming_elevated(command, sink).await
        } else {
            executor.run_streaming(command, sink).await
        }
    };

    let (result, ()) = tokio::join!(run, forward);
    result.map(|()| String::new())
}

/// Relay a failed terminal event; `finished` is set once it is handed over
async fn relay_finished(
    relay: &mpsc::Sender<HostLogEvent>,
    host: &HostIdentity,
    error: ExecError,
    finished: &AtomicBool,
) {
    let summary = StreamSummary::from_outcome(&Err(error));
    let _ = relay
        .send(HostLogEvent {
            host: host.name().to_string(),
            event: LogEvent::Finished(summary),
        })
        .await;
    finished.store(true, Ordering::Release);
}

/// Spawn one task per host and reduce their outcomes in submission order
async fn dispatch<F, Fut>(hosts: &[HostIdentity], leaf: F) -> AggregateResult
where
    F: Fn(HostIdentity) -> Fut,
    Fut: Future<Output = Result<String, ExecError>> + Send + 'static,
{
    let started = Instant::now();
    let (tx, mut rx) = mpsc::channel(hosts.len().max(1));
    let mut handles = Vec::with_capacity(hosts.len());

    for (index, host) in hosts.iter().enumerate() {
        let fut = leaf(host.clone());
        let host = host.clone();
        let tx = tx.clone();

        let handle = tokio::spawn(async move {
            let leaf_started = Instant::now();
            let result = fut.await;
            let outcome = PerHostOutcome::from_result(&host, result, leaf_started.elapsed());
            if outcome.success {
                info!(host = %outcome.host, elapsed = ?outcome.elapsed, "host completed");
            } else {
                error!(
                    host = %outcome.host,
                    error = outcome.error.as_deref().unwrap_or_default(),
                    "host failed"
                );
            }
            let _ = tx.send((index, outcome)).await;
        });

        handles.push((index, handle));
    }
    drop(tx);

    let mut panicked = HashMap::new();
    for (index, handle) in handles {
        if let Err(e) = handle.await {
            error!(host = %hosts[index].name(), error = %e, "task panicked");
            panicked.insert(index, e.to_string());
        }
    }

    let mut collected: Vec<(usize, PerHostOutcome)> = Vec::with_capacity(hosts.len());
    while let Some(item) = rx.recv().await {
        collected.push(item);
    }
    for (index, message) in panicked {
        collected.push((
            index,
            PerHostOutcome::panicked(&hosts[index], message, started.elapsed()),
        ));
    }
    collected.sort_by_key(|(index, _)| *index);

    AggregateResult::from_outcomes(collected.into_iter().map(|(_, outcome)| outcome).collect())
}

fn log_reduced(operation: &str, result: &AggregateResult) {
    let failed = result.failures().count();
    if result.overall_success {
        info!(operation, total = result.results.len(), "fan-out finished");
    } else {
        warn!(
            operation,
            total = result.results.len(),
            failed,
            "fan-out finished with failures"
        );
    }
}
