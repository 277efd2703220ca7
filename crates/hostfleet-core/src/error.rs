//! Core error types for hostfleet-core

use thiserror::Error;

use hostfleet_exec::ExecError;

/// Errors that can occur in pool, fan-out and fleet actor operations
#[derive(Error, Debug, Clone)]
pub enum CoreError {
    /// Host not found in registry
    #[error("host not found: {0}")]
    HostNotFound(String),

    /// Host already exists in registry
    #[error("host already exists: {0}")]
    HostAlreadyExists(String),

    /// Executor operation failed
    #[error(transparent)]
    Exec(#[from] ExecError),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(String),
}
