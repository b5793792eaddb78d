//! Connection configuration
//!
//! Settings needed to reach and authenticate against a Flight endpoint.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AdhocError, Result};

/// Default Flight port of the coordinator
pub const DEFAULT_PORT: u16 = 32010;

/// How the client proves its identity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Credentials {
    /// Username/password exchanged for a bearer token during the handshake
    Basic { username: String, password: String },
    /// Personal access token or OAuth token, sent as a bearer token
    Token { token: String },
    /// No credentials
    #[default]
    None,
}

impl Credentials {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn token(token: impl Into<String>) -> Self {
        Credentials::Token {
            token: token.into(),
        }
    }

    /// Pick credentials from optional CLI-style inputs; a token wins over
    /// a username/password pair.
    pub fn from_parts(
        username: Option<String>,
        password: Option<String>,
        token: Option<String>,
    ) -> Result<Self> {
        match (username, password, token) {
            (_, _, Some(token)) if !token.is_empty() => Ok(Credentials::token(token)),
            (Some(username), Some(password), _) => Ok(Credentials::basic(username, password)),
            (Some(_), None, _) | (None, Some(_), _) => Err(AdhocError::Config(
                "username and password must be supplied together".into(),
            )),
            _ => Ok(Credentials::None),
        }
    }
}

/// TLS settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Enable an encrypted connection
    pub enabled: bool,
    /// PEM file with the trusted root certificates
    pub root_certs: Option<PathBuf>,
}

/// Configuration for a Flight connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Coordinator hostname
    pub host: String,
    /// Flight port
    pub port: u16,
    pub credentials: Credentials,
    pub tls: TlsConfig,
    /// Project to select through session options after connecting
    pub project_id: Option<String>,
    /// Connect timeout in seconds
    pub connect_timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            credentials: Credentials::None,
            tls: TlsConfig::default(),
            project_id: None,
            connect_timeout_secs: 30,
        }
    }
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Config for a local development server
    pub fn local(port: u16) -> Self {
        Self::new("127.0.0.1", port)
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Enable TLS, trusting the certificates in `root_certs`
    pub fn with_tls(mut self, root_certs: impl Into<PathBuf>) -> Self {
        self.tls = TlsConfig {
            enabled: true,
            root_certs: Some(root_certs.into()),
        };
        self
    }

    pub fn with_project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Get the address string (host:port)
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Get the full URL
    pub fn url(&self) -> String {
        let scheme = if self.tls.enabled { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Check settings that can be verified without touching the network
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(AdhocError::Config("host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(AdhocError::Config("port must not be 0".into()));
        }
        if self.tls.enabled && self.tls.root_certs.is_none() {
            return Err(AdhocError::Config(
                "trusted certificates must be provided to establish a TLS connection".into(),
            ));
        }
        if self.project_id.is_some() && !matches!(self.credentials, Credentials::Token { .. }) {
            return Err(AdhocError::Config(
                "a project id can only be used with token authentication".into(),
            ));
        }
        Ok(())
    }
}
