//! Privilege elevation for commands run by unprivileged accounts
//!
//! An [`ElevationStrategy`] rewrites a command so it runs as root. The
//! password strategy never places the secret in the command text: it is
//! handed to the executor as the first line of the process's stdin, which
//! `sudo -S` consumes before the command starts.

use secrecy::SecretString;
use tokio::sync::OnceCell;

use crate::error::ExecError;
use crate::host::{ElevationMode, HostIdentity};

/// A command ready to run, plus anything that must be fed to its stdin first
#[derive(Debug, Clone)]
pub struct Invocation {
    command: String,
    stdin_secret: Option<SecretString>,
}

impl Invocation {
    /// Plain command with nothing on stdin
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            stdin_secret: None,
        }
    }

    /// Feed `secret` and a newline to stdin before anything else
    #[must_use]
    pub fn with_stdin_secret(mut self, secret: SecretString) -> Self {
        self.stdin_secret = Some(secret);
        self
    }

    /// Command text as it will be executed
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Secret to write to stdin (followed by a newline) before anything else
    pub fn stdin_secret(&self) -> Option<&SecretString> {
        self.stdin_secret.as_ref()
    }
}

/// How a command is rewritten to run with root privileges
#[derive(Debug, Clone)]
pub enum ElevationStrategy {
    /// Run commands unchanged
    None,
    /// `sudo -S` fed the account password through stdin
    SudoPassword(SecretString),
    /// `sudo -n`; fails instead of prompting when sudoers requires a password
    SudoNonInteractive,
}

impl ElevationStrategy {
    /// Pick the strategy configured for a host
    ///
    /// # Errors
    /// Returns `ExecError::ConfigError` when password elevation is requested
    /// for a host without a password
    pub fn for_host(host: &HostIdentity) -> Result<Self, ExecError> {
        match (host.elevation(), host.password()) {
            (ElevationMode::None, _) => Ok(Self::None),
            (ElevationMode::PreAuthorized, _) | (ElevationMode::Auto, None) => {
                Ok(Self::SudoNonInteractive)
            }
            (ElevationMode::Auto | ElevationMode::Password, Some(password)) => {
                Ok(Self::SudoPassword(password.clone()))
            }
            (ElevationMode::Password, None) => Err(ExecError::ConfigError(format!(
                "host {} uses password elevation but has no password",
                host.name()
            ))),
        }
    }

    /// Rewrite `command` to run elevated
    pub fn wrap(&self, command: &str) -> Invocation {
        match self {
            Self::None => Invocation::new(command),
            Self::SudoPassword(password) => Invocation {
                command: format!("sudo -S -k -p '' -- sh -c {}", shell_quote(command)),
                stdin_secret: Some(password.clone()),
            },
            Self::SudoNonInteractive => {
                Invocation::new(format!("sudo -n -- sh -c {}", shell_quote(command)))
            }
        }
    }
}

/// Per-executor elevation state: the strategy and a cached privilege check
#[derive(Debug)]
pub struct Elevator {
    strategy: ElevationStrategy,
    privileged: OnceCell<bool>,
}

impl Elevator {
    /// Elevator using the given strategy
    pub fn new(strategy: ElevationStrategy) -> Self {
        Self {
            strategy,
            privileged: OnceCell::new(),
        }
    }

    /// Elevator that never rewrites commands
    pub fn disabled() -> Self {
        Self::new(ElevationStrategy::None)
    }

    /// Configured strategy
    pub fn strategy(&self) -> &ElevationStrategy {
        &self.strategy
    }

    /// Cached result of the privilege check
    pub(crate) fn privileged(&self) -> &OnceCell<bool> {
        &self.privileged
    }
}

impl Default for Elevator {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Quote `s` as a single POSIX shell word
pub fn shell_quote(s: &str) -> String {
    let mut quoted = String::with_capacity(s.len() + 2);
    quoted.push('\'');
    for c in s.chars() {
        if c == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(c);
        }
    }
    quoted.push('\'');
    quoted
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("ls -la"), "'ls -la'");
        assert_eq!(shell_quote("echo 'hi'"), "'echo '\\''hi'\\'''");
    }

    #[test]
    fn test_password_stays_out_of_command_text() {
        let strategy = ElevationStrategy::SudoPassword(SecretString::from("hunter2".to_string()));
        let invocation = strategy.wrap("systemctl restart haproxy");

        assert!(!invocation.command().contains("hunter2"));
        assert_eq!(
            invocation.command(),
            "sudo -S -k -p '' -- sh -c 'systemctl restart haproxy'"
        );
        assert_eq!(
            invocation.stdin_secret().map(|s| s.expose_secret().to_string()),
            Some("hunter2".to_string())
        );
    }

    #[test]
    fn test_non_interactive_wraps_pipeline() {
        let invocation = ElevationStrategy::SudoNonInteractive.wrap("cat a | tee b");
        assert_eq!(invocation.command(), "sudo -n -- sh -c 'cat a | tee b'");
        assert!(invocation.stdin_secret().is_none());
    }

    #[test]
    fn test_strategy_for_host() {
        let with_password = HostIdentity::new("a", "h", "ops").with_password("pw");
        assert!(matches!(
            ElevationStrategy::for_host(&with_password).unwrap(),
            ElevationStrategy::SudoPassword(_)
        ));

        let without_password = HostIdentity::new("a", "h", "ops");
        assert!(matches!(
            ElevationStrategy::for_host(&without_password).unwrap(),
            ElevationStrategy::SudoNonInteractive
        ));

        let disabled = with_password.clone().with_elevation(ElevationMode::None);
        assert!(matches!(
            ElevationStrategy::for_host(&disabled).unwrap(),
            ElevationStrategy::None
        ));

        let misconfigured = without_password.with_elevation(ElevationMode::Password);
        assert!(ElevationStrategy::for_host(&misconfigured).is_err());
    }
}
