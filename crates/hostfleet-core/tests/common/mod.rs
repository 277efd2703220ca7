#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use hostfleet_core::ExecutorFactory;
use hostfleet_exec::stream::{LogEntry, LogEvent};
use hostfleet_exec::{
    CommandResult, Elevator, ExecError, HostIdentity, Invocation, LogSink, RemoteExecutor,
};

/// Scripted behaviour for one mock host
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub delay: Duration,
    pub status: i32,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl Script {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn failing(status: i32, stderr: &str) -> Self {
        Self {
            status,
            stderr: vec![stderr.to_string()],
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_stdout(mut self, lines: &[&str]) -> Self {
        self.stdout = lines.iter().map(ToString::to_string).collect();
        self
    }
}

pub struct MockExecutor {
    name: String,
    script: Script,
    elevator: Elevator,
    pub commands: std::sync::Mutex<Vec<String>>,
}

impl MockExecutor {
    pub fn new(name: &str, script: Script) -> Self {
        Self {
            name: name.to_string(),
            script,
            elevator: Elevator::disabled(),
            commands: std::sync::Mutex::new(Vec::new()),
        }
    }

    fn record(&self, invocation: &Invocation) {
        if let Ok(mut commands) = self.commands.lock() {
            commands.push(invocation.command().to_string());
        }
    }
}

#[async_trait]
impl RemoteExecutor for MockExecutor {
    async fn execute(&self, invocation: &Invocation) -> Result<CommandResult, ExecError> {
        self.record(invocation);
        tokio::time::sleep(self.script.delay).await;
        Ok(CommandResult {
            status: self.script.status,
            stdout: self.script.stdout.iter().map(|l| format!("{l}\n")).collect(),
            stderr: self.script.stderr.iter().map(|l| format!("{l}\n")).collect(),
            duration: self.script.delay,
        })
    }

    async fn execute_streaming(
        &self,
        invocation: &Invocation,
        sink: &LogSink,
    ) -> Result<CommandResult, ExecError> {
        self.record(invocation);
        for line in &self.script.stdout {
            let _ = sink.send(LogEvent::Line(LogEntry::stdout(line.clone()))).await;
        }
        for line in &self.script.stderr {
            let _ = sink.send(LogEvent::Line(LogEntry::stderr(line.clone()))).await;
        }
        tokio::time::sleep(self.script.delay).await;
        Ok(CommandResult {
            status: self.script.status,
            stdout: String::new(),
            stderr: self.script.stderr.join("\n"),
            duration: self.script.delay,
        })
    }

    fn elevator(&self) -> &Elevator {
        &self.elevator
    }

    fn executor_type(&self) -> &'static str {
        "mock"
    }

    fn target(&self) -> &str {
        &self.name
    }
}

/// Factory handing out scripted executors; unknown hosts are unreachable
pub struct MockFactory {
    scripts: HashMap<String, Script>,
    connect_delay: Duration,
    pub created: AtomicUsize,
}

impl MockFactory {
    pub fn new(scripts: &[(&str, Script)]) -> Self {
        Self {
            scripts: scripts
                .iter()
                .map(|(name, script)| ((*name).to_string(), script.clone()))
                .collect(),
            connect_delay: Duration::ZERO,
            created: AtomicUsize::new(0),
        }
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecutorFactory for MockFactory {
    async fn create(&self, host: &HostIdentity) -> Result<Arc<dyn RemoteExecutor>, ExecError> {
        tokio::time::sleep(self.connect_delay).await;
        let script = self.scripts.get(host.name()).ok_or_else(|| {
            ExecError::ConnectionFailed(format!("{}: connection refused", host.endpoint()))
        })?;
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockExecutor::new(host.name(), script.clone())))
    }
}

pub fn host(name: &str) -> HostIdentity {
    HostIdentity::new(name, format!("{name}.lan"), "root")
}
