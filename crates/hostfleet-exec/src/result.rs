//! Result types for command execution

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ExecError;

/// Result of a command execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    /// Exit status code (0 for success, -1 when the remote side never reported one)
    pub status: i32,
    /// stdout output
    pub stdout: String,
    /// stderr output
    pub stderr: String,
    /// Time taken to execute
    pub duration: Duration,
}

impl CommandResult {
    /// Check if command succeeded (exit code 0)
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Combine stdout and stderr
    #[must_use]
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }

    /// Turn a non-zero exit into `ExecError::CommandFailed`
    ///
    /// # Errors
    /// Returns `ExecError::CommandFailed` carrying the exit status and stderr
    pub fn into_checked(self) -> Result<Self, ExecError> {
        if self.success() {
            Ok(self)
        } else {
            let stderr = if self.stderr.trim().is_empty() {
                self.stdout.trim().to_string()
            } else {
                self.stderr.trim().to_string()
            };
            Err(ExecError::CommandFailed {
                status: self.status,
                stderr,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(status: i32, stdout: &str, stderr: &str) -> CommandResult {
        CommandResult {
            status,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            duration: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_combined_output() {
        assert_eq!(result(0, "out", "").combined_output(), "out");
        assert_eq!(result(0, "", "err").combined_output(), "err");
        assert_eq!(result(0, "out", "err").combined_output(), "out\nerr");
    }

    #[test]
    fn test_into_checked_failure_prefers_stderr() {
        let err = result(2, "partial", "boom\n").into_checked().unwrap_err();
        match err {
            ExecError::CommandFailed { status, stderr } => {
                assert_eq!(status, 2);
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_into_checked_falls_back_to_stdout() {
        let err = result(1, "only stdout\n", "").into_checked().unwrap_err();
        assert!(err.to_string().contains("only stdout"));
    }
}
