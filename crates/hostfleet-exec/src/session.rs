//! Session factory: one authenticated SSH connection per host identity

use std::sync::Arc;
use std::time::Duration;

use russh::client;
use russh::keys::PrivateKeyWithHashAlg;
use russh::keys::ssh_key::{self, HashAlg};
use secrecy::ExposeSecret;
use tracing::{debug, info, instrument, warn};

use crate::error::ExecError;
use crate::host::{AuthMethod, HostIdentity};
use crate::transfer::DEFAULT_STAGING_DIR;

/// Default bound on dial, handshake and authentication
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings applied to every session a factory opens
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Bound on dial, handshake and authentication
    pub connect_timeout: Duration,
    /// Remote directory used for staging file transfers
    pub staging_dir: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            staging_dir: DEFAULT_STAGING_DIR.to_string(),
        }
    }
}

/// Server key check for one host
///
/// Without a pinned fingerprint every key is accepted.
#[derive(Debug)]
pub(crate) struct HostKeyVerifier {
    host: String,
    pinned: Option<String>,
}

impl HostKeyVerifier {
    pub(crate) fn new(host: &HostIdentity) -> Self {
        Self {
            host: host.name().to_string(),
            pinned: host.host_key_fingerprint().map(ToString::to_string),
        }
    }

    fn matches(&self, fingerprint: &str) -> bool {
        match &self.pinned {
            None => true,
            Some(pinned) => normalize_fingerprint(pinned) == normalize_fingerprint(fingerprint),
        }
    }
}

fn normalize_fingerprint(fp: &str) -> &str {
    let fp = fp.trim();
    fp.strip_prefix("SHA256:").unwrap_or(fp).trim_end_matches('=')
}

impl client::Handler for HostKeyVerifier {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint(HashAlg::Sha256).to_string();
        let accepted = self.matches(&fingerprint);
        if accepted {
            debug!(host = %self.host, %fingerprint, "server key accepted");
        } else {
            warn!(host = %self.host, %fingerprint, "server key does not match pinned fingerprint");
        }
        Ok(accepted)
    }
}

/// Authenticated client handle
pub(crate) type SessionHandle = client::Handle<HostKeyVerifier>;

/// Dial and authenticate, bounded by `connect_timeout`
///
/// # Errors
/// Returns a connection-kind `ExecError` for dial, host key, key parse and
/// authentication failures
#[instrument(skip(host), fields(host = %host.name(), endpoint = %host.endpoint()))]
pub(crate) async fn open(
    host: &HostIdentity,
    connect_timeout: Duration,
) -> Result<SessionHandle, ExecError> {
    match tokio::time::timeout(connect_timeout, open_unbounded(host)).await {
        Ok(result) => result,
        Err(_) => Err(ExecError::ConnectionFailed(format!(
            "{} did not complete the SSH handshake within {connect_timeout:?}",
            host.endpoint()
        ))),
    }
}

async fn open_unbounded(host: &HostIdentity) -> Result<SessionHandle, ExecError> {
    info!(user = %host.user(), "connecting to SSH");

    let config = Arc::new(client::Config::default());
    let verifier = HostKeyVerifier::new(host);

    let mut session = client::connect(config, (host.address(), host.port()), verifier)
        .await
        .map_err(|e| match (e, host.host_key_fingerprint()) {
            (russh::Error::UnknownKey, Some(expected)) => ExecError::HostKeyMismatch {
                host: host.name().to_string(),
                expected: expected.to_string(),
            },
            (e, _) => ExecError::ConnectionFailed(e.to_string()),
        })?;

    authenticate(&mut session, host).await?;

    info!("SSH connected and authenticated");
    Ok(session)
}

async fn authenticate(session: &mut SessionHandle, host: &HostIdentity) -> Result<(), ExecError> {
    let user = host.user();

    for method in host.auth_methods() {
        let (label, result) = match method {
            AuthMethod::None => ("none", session.authenticate_none(user).await),
            AuthMethod::Password(password) => (
                "password",
                session
                    .authenticate_password(user, password.expose_secret())
                    .await,
            ),
            AuthMethod::PrivateKey(source) => {
                let key = source
                    .load()
                    .map_err(|e| ExecError::SshKeyError(e.to_string()))?;
                let hash_alg = session
                    .best_supported_rsa_hash()
                    .await
                    .ok()
                    .flatten()
                    .flatten();
                (
                    "publickey",
                    session
                        .authenticate_publickey(user, PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg))
                        .await,
                )
            }
        };

        let result = result.map_err(|e| ExecError::AuthenticationFailed(e.to_string()))?;
        if result.success() {
            debug!(method = label, "authenticated");
            return Ok(());
        }
        debug!(method = label, "authentication method rejected");
    }

    Err(ExecError::AuthenticationFailed(format!(
        "all authentication methods rejected for {user}@{}",
        host.endpoint()
    )))
}
