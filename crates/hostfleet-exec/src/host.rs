//! Host identity: the immutable description of one remote target

use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};

use crate::keys::KeySource;

/// How commands reach a host
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// Remote shell over SSH
    #[default]
    Ssh,
    /// The local OS process layer
    Local,
}

/// How commands that need root are escalated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElevationMode {
    /// Never rewrite commands
    None,
    /// Password via stdin when a password is known, otherwise `sudo -n`
    #[default]
    Auto,
    /// `sudo -S` reading the account password from stdin
    Password,
    /// `sudo -n`, relying on sudoers configuration
    PreAuthorized,
}

/// One authentication attempt, tried in order
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// `none` authentication
    None,
    /// Password authentication
    Password(#[serde(deserialize_with = "deserialize_secret")] SecretString),
    /// Public key authentication
    PrivateKey(KeySource),
}

/// Immutable description of a remote machine and how to authenticate to it
#[derive(Debug, Clone, Deserialize)]
pub struct HostIdentity {
    name: String,
    address: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_user")]
    user: String,
    #[serde(default, deserialize_with = "deserialize_optional_secret")]
    password: Option<SecretString>,
    #[serde(default)]
    private_key: Option<KeySource>,
    #[serde(default)]
    auth: Vec<AuthMethod>,
    #[serde(default)]
    transport: Transport,
    #[serde(default)]
    elevation: ElevationMode,
    #[serde(default)]
    host_key_fingerprint: Option<String>,
}

fn default_port() -> u16 {
    22
}

fn default_user() -> String {
    "root".to_string()
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(SecretString::from)
}

fn deserialize_optional_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?
        .filter(|s| !s.is_empty())
        .map(SecretString::from))
}

impl HostIdentity {
    /// Create an SSH identity with default port and no credentials
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            port: default_port(),
            user: user.into(),
            password: None,
            private_key: None,
            auth: Vec::new(),
            transport: Transport::Ssh,
            elevation: ElevationMode::Auto,
            host_key_fingerprint: None,
        }
    }

    /// Identity for the machine running this process
    pub fn local(name: impl Into<String>) -> Self {
        let user = std::env::var("USER").unwrap_or_else(|_| default_user());
        Self::new(name, "localhost", user).with_transport(Transport::Local)
    }

    /// Set custom port
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set account password
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(SecretString::from(password.into()));
        self
    }

    /// Set private key source
    #[must_use]
    pub fn with_private_key(mut self, key: KeySource) -> Self {
        self.private_key = Some(key);
        self
    }

    /// Append a pre-built authentication method
    #[must_use]
    pub fn with_auth_method(mut self, method: AuthMethod) -> Self {
        self.auth.push(method);
        self
    }

    /// Set transport
    #[must_use]
    pub fn with_transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }

    /// Set elevation mode
    #[must_use]
    pub fn with_elevation(mut self, elevation: ElevationMode) -> Self {
        self.elevation = elevation;
        self
    }

    /// Pin the server's SHA-256 host key fingerprint
    #[must_use]
    pub fn with_host_key_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.host_key_fingerprint = Some(fingerprint.into());
        self
    }

    /// Unique key of this host
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Network address
    pub fn address(&self) -> &str {
        &self.address
    }

    /// SSH port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Login user
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Account password
    pub fn password(&self) -> Option<&SecretString> {
        self.password.as_ref()
    }

    /// Private key source
    pub fn private_key(&self) -> Option<&KeySource> {
        self.private_key.as_ref()
    }

    /// Transport used to reach the host
    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Elevation mode
    pub fn elevation(&self) -> ElevationMode {
        self.elevation
    }

    /// Pinned host key fingerprint
    pub fn host_key_fingerprint(&self) -> Option<&str> {
        self.host_key_fingerprint.as_deref()
    }

    /// Authentication attempts in the order they are tried
    ///
    /// Pre-built methods come first, then the password, then the private key.
    /// An identity without any credentials falls back to `none`.
    pub fn auth_methods(&self) -> Vec<AuthMethod> {
        let mut methods = self.auth.clone();
        if let Some(password) = &self.password {
            methods.push(AuthMethod::Password(password.clone()));
        }
        if let Some(key) = &self.private_key {
            methods.push(AuthMethod::PrivateKey(key.clone()));
        }
        if methods.is_empty() {
            methods.push(AuthMethod::None);
        }
        methods
    }

    /// `address:port` for display and dialing
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}
