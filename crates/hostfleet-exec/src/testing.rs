//! Scripted executor for unit tests

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::elevation::{Elevator, Invocation};
use crate::error::ExecError;
use crate::result::CommandResult;
use crate::stream::LogSink;
use crate::traits::RemoteExecutor;

/// Records every command and answers from a prefix table
pub(crate) struct RecordingExecutor {
    replies: Vec<(String, i32, String)>,
    commands: Mutex<Vec<String>>,
    elevator: Elevator,
}

impl RecordingExecutor {
    pub(crate) fn new() -> Self {
        Self {
            replies: Vec::new(),
            commands: Mutex::new(Vec::new()),
            elevator: Elevator::disabled(),
        }
    }

    /// Answer commands starting with `prefix`; unmatched commands succeed silently
    pub(crate) fn reply(mut self, prefix: &str, status: i32, stdout: &str) -> Self {
        self.replies
            .push((prefix.to_string(), status, stdout.to_string()));
        self
    }

    pub(crate) fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteExecutor for RecordingExecutor {
    async fn execute(&self, invocation: &Invocation) -> Result<CommandResult, ExecError> {
        let command = invocation.command().to_string();
        self.commands.lock().unwrap().push(command.clone());

        let (status, stdout) = self
            .replies
            .iter()
            .find(|(prefix, _, _)| command.starts_with(prefix.as_str()))
            .map_or((0, String::new()), |(_, status, stdout)| (*status, stdout.clone()));
        Ok(CommandResult {
            status,
            stdout,
            stderr: if status == 0 { String::new() } else { "failed".to_string() },
            duration: Duration::ZERO,
        })
    }

    async fn execute_streaming(
        &self,
        invocation: &Invocation,
        _sink: &LogSink,
    ) -> Result<CommandResult, ExecError> {
        self.execute(invocation).await
    }

    fn elevator(&self) -> &Elevator {
        &self.elevator
    }

    fn executor_type(&self) -> &'static str {
        "recording"
    }

    fn target(&self) -> &str {
        "test-host"
    }
}
