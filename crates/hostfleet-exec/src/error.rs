//! Error types for hostfleet-exec

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during remote execution
#[derive(Error, Debug, Clone)]
pub enum ExecError {
    /// Failed to dial the remote host
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// SSH key could not be loaded or parsed
    #[error("SSH key error: {0}")]
    SshKeyError(String),

    /// Server host key did not match the pinned fingerprint
    #[error("host key mismatch for {host}: expected {expected}")]
    HostKeyMismatch {
        /// Host name
        host: String,
        /// Pinned fingerprint
        expected: String,
    },

    /// Opening a channel on an established session failed
    #[error("failed to open session channel: {0}")]
    ChannelFailed(String),

    /// Command exited non-zero
    #[error("command execution failed: {status} - {stderr}")]
    CommandFailed {
        /// Exit status code
        status: i32,
        /// Stderr output
        stderr: String,
    },

    /// Reading command output failed mid-stream
    #[error("output stream failed: {0}")]
    StreamFailed(String),

    /// Command succeeded but printed something unparsable
    #[error("unexpected command output: {0}")]
    UnexpectedOutput(String),

    /// Command timed out
    #[error("command timed out after {timeout:?}")]
    Timeout {
        /// Timeout duration that was exceeded
        timeout: Duration,
    },

    /// Process spawn error
    #[error("failed to spawn process: {0}")]
    SpawnError(String),

    /// I/O error during execution
    #[error("I/O error: {0}")]
    IoError(String),

    /// File transfer failed
    #[error("transfer failed while {stage}: {message}")]
    Transfer {
        /// Step of the transfer that failed
        stage: TransferStage,
        /// Underlying error text
        message: String,
    },

    /// Session already closed
    #[error("not connected")]
    NotConnected,

    /// Inconsistent host configuration
    #[error("invalid configuration: {0}")]
    ConfigError(String),

    /// Operation argument rejected before anything ran on the host
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Coarse classification of an [`ExecError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Dial, authentication, key parse or host key failure
    Connection,
    /// Channel creation on an open session
    Session,
    /// Non-zero exit, stream failure or timeout
    Command,
    /// Local read, remote write or remote move
    Transfer,
    /// Invalid host configuration or operation argument
    Input,
}

/// Step of a staged file transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStage {
    /// Reading the local source file
    LocalRead,
    /// Content cannot be carried by the shell write step
    UnsupportedContent,
    /// Writing the staging file on the remote side
    RemoteWrite,
    /// Moving the staging file into place
    RemoteMove,
    /// Removing the staging file
    Cleanup,
}

impl fmt::Display for TransferStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransferStage::LocalRead => "reading local file",
            TransferStage::UnsupportedContent => "checking content",
            TransferStage::RemoteWrite => "writing remote staging file",
            TransferStage::RemoteMove => "moving staging file into place",
            TransferStage::Cleanup => "removing staging file",
        };
        f.write_str(s)
    }
}

impl ExecError {
    /// Build a transfer error for the given stage
    pub fn transfer(stage: TransferStage, message: impl Into<String>) -> Self {
        ExecError::Transfer {
            stage,
            message: message.into(),
        }
    }

    /// Check if error is retryable
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExecError::ConnectionFailed(_) | ExecError::Timeout { .. }
        )
    }

    /// Classify the error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecError::ConnectionFailed(_)
            | ExecError::AuthenticationFailed(_)
            | ExecError::SshKeyError(_)
            | ExecError::HostKeyMismatch { .. }
            | ExecError::NotConnected => ErrorKind::Connection,
            ExecError::ChannelFailed(_) => ErrorKind::Session,
            ExecError::CommandFailed { .. }
            | ExecError::StreamFailed(_)
            | ExecError::UnexpectedOutput(_)
            | ExecError::Timeout { .. }
            | ExecError::SpawnError(_)
            | ExecError::IoError(_) => ErrorKind::Command,
            ExecError::Transfer { .. } => ErrorKind::Transfer,
            ExecError::ConfigError(_) | ExecError::InvalidInput(_) => ErrorKind::Input,
        }
    }
}
