//! SSH command execution using russh crate

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use russh::client::Msg;
use russh::{Channel, ChannelMsg, Disconnect};
use secrecy::ExposeSecret;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error, info, instrument};

use crate::elevation::{ElevationStrategy, Elevator, Invocation};
use crate::error::ExecError;
use crate::host::HostIdentity;
use crate::result::CommandResult;
use crate::session::{self, SessionHandle, SessionOptions};
use crate::stream::{LineForwarder, LogSink, PromptResponder, drain_chunks};
use crate::traits::RemoteExecutor;

/// SSH command executor
///
/// Owns one authenticated session. Every command runs on its own channel, so
/// concurrent commands against the same host do not serialize.
pub struct SshExecutor {
    host: HostIdentity,
    session: RwLock<Option<SessionHandle>>,
    elevator: Elevator,
    staging_dir: String,
    responder: Arc<PromptResponder>,
}

impl std::fmt::Debug for SshExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshExecutor")
            .field("host", &self.host.name())
            .field("endpoint", &self.host.endpoint())
            .field("elevator", &self.elevator)
            .finish_non_exhaustive()
    }
}

impl SshExecutor {
    /// Open and authenticate a session for `host`
    ///
    /// # Errors
    /// Returns a connection-kind `ExecError` if the session cannot be opened
    pub async fn connect(host: &HostIdentity, options: &SessionOptions) -> Result<Self, ExecError> {
        let elevator = Elevator::new(ElevationStrategy::for_host(host)?);
        let handle = session::open(host, options.connect_timeout).await?;

        Ok(Self {
            host: host.clone(),
            session: RwLock::new(Some(handle)),
            elevator,
            staging_dir: options.staging_dir.clone(),
            responder: Arc::new(PromptResponder::default()),
        })
    }

    /// Replace the prompt responder
    #[must_use]
    pub fn with_prompt_responder(mut self, responder: PromptResponder) -> Self {
        self.responder = Arc::new(responder);
        self
    }

    /// Host this executor is bound to
    pub fn host(&self) -> &HostIdentity {
        &self.host
    }

    async fn open_channel(&self) -> Result<Channel<Msg>, ExecError> {
        let guard = self.session.read().await;
        let handle = guard.as_ref().ok_or(ExecError::NotConnected)?;
        handle
            .channel_open_session()
            .await
            .map_err(|e| ExecError::ChannelFailed(e.to_string()))
    }

    /// Open a channel and start `invocation` on it, feeding any stdin secret
    async fn start(&self, invocation: &Invocation) -> Result<Channel<Msg>, ExecError> {
        let channel = self.open_channel().await?;
        channel
            .exec(true, invocation.command())
            .await
            .map_err(|e| ExecError::ChannelFailed(e.to_string()))?;

        if let Some(secret) = invocation.stdin_secret() {
            let line = format!("{}\n", secret.expose_secret());
            channel
                .data(line.as_bytes())
                .await
                .map_err(|e| ExecError::StreamFailed(e.to_string()))?;
        }
        Ok(channel)
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    #[instrument(skip(self, invocation), fields(host = %self.host.name()))]
    async fn execute(&self, invocation: &Invocation) -> Result<CommandResult, ExecError> {
        let start = Instant::now();
        let cmd = invocation.command();
        debug!(command = %cmd, "executing remote command");

        let mut channel = self.start(invocation).await?;
        channel
            .eof()
            .await
            .map_err(|e| ExecError::StreamFailed(e.to_string()))?;

        let mut status = -1;
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        // exit-status may arrive after EOF, so read until the channel closes
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => stdout.extend_from_slice(&data),
                ChannelMsg::ExtendedData { data, ext: 1 } => stderr.extend_from_slice(&data),
                ChannelMsg::ExitStatus { exit_status } => status = exit_status.cast_signed(),
                _ => {}
            }
        }

        let duration = start.elapsed();
        let stdout = String::from_utf8_lossy(&stdout).to_string();
        let stderr = String::from_utf8_lossy(&stderr).to_string();

        debug!(command = %cmd, status, duration = ?duration, "remote command completed");
        if status != 0 {
            error!(command = %cmd, status, stderr = %stderr.trim(), "remote command failed");
        }

        Ok(CommandResult {
            status,
            stdout,
            stderr,
            duration,
        })
    }

    #[instrument(skip(self, invocation, sink), fields(host = %self.host.name()))]
    async fn execute_streaming(
        &self,
        invocation: &Invocation,
        sink: &LogSink,
    ) -> Result<CommandResult, ExecError> {
        let start = Instant::now();
        debug!(command = %invocation.command(), "streaming remote command");

        let mut channel = self.start(invocation).await?;
        if !self.responder.is_enabled() {
            channel
                .eof()
                .await
                .map_err(|e| ExecError::StreamFailed(e.to_string()))?;
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (err_tx, err_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (prompt_tx, mut prompt_rx) = mpsc::unbounded_channel();
        let out = LineForwarder::new(false, sink.clone(), self.responder.clone(), prompt_tx.clone());
        let err = LineForwarder::new(true, sink.clone(), self.responder.clone(), prompt_tx);
        let reply = self.responder.reply().to_vec();

        // the pump owns the channel: it routes output to the two readers and
        // answers prompts they report
        let pump = async move {
            let mut status = -1;
            let mut prompts_open = true;
            loop {
                tokio::select! {
                    msg = channel.wait() => match msg {
                        Some(ChannelMsg::Data { data }) => {
                            let _ = out_tx.send(data.to_vec());
                        }
                        Some(ChannelMsg::ExtendedData { data, ext: 1 }) => {
                            let _ = err_tx.send(data.to_vec());
                        }
                        Some(ChannelMsg::ExitStatus { exit_status }) => {
                            status = exit_status.cast_signed();
                        }
                        Some(_) => {}
                        None => break,
                    },
                    request = prompt_rx.recv(), if prompts_open => match request {
                        Some(()) => {
                            if let Err(e) = channel.data(&reply[..]).await {
                                debug!(error = %e, "failed to answer prompt");
                            }
                        }
                        None => prompts_open = false,
                    },
                }
            }
            status
        };

        let (status, _, stderr_tail) =
            tokio::join!(pump, drain_chunks(out_rx, out), drain_chunks(err_rx, err));

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
        "ssh"
    }

    fn target(&self) -> &str {
        self.host.name()
    }

    fn staging_dir(&self) -> &str {
        &self.staging_dir
    }

    async fn close(&self) -> Result<(), ExecError> {
        let handle = self.session.write().await.take();
        if let Some(handle) = handle {
            handle
                .disconnect(Disconnect::ByApplication, "", "English")
                .await
                .map_err(|e| ExecError::IoError(e.to_string()))?;
            info!(host = %self.host.name(), "SSH disconnected");
        }
        Ok(())
    }
}
