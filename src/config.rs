// src/config.rs

//! Connection configuration: defaults, TOML loading and validation.

use crate::connection::tls::{HostnameVerifier, VerifierRef};
use crate::core::ClientError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 6379;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Everything a `Connection` needs to reach its server.
///
/// Plain settings are (de)serialisable so they can live in a TOML file. The
/// TLS factory and hostname verifier are runtime objects attached with the
/// `with_*` builders and are skipped by serde.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ConnectionConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upper bound on TCP connection establishment. `None` uses the OS default.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub connect_timeout: Option<Duration>,
    /// Read deadline applied to the socket. `None` blocks forever.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub read_timeout: Option<Duration>,
    /// A local domain socket tried before TCP. Failure to use it is not an error.
    #[serde(default)]
    pub unix_socket_path: Option<PathBuf>,
    #[serde(default)]
    pub tls: TlsConfig,
    /// Log filter used by the `spinel-conn` binary when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// A caller-built rustls client configuration, used instead of the one
    /// derived from `tls`.
    #[serde(skip)]
    pub tls_factory: Option<Arc<rustls::ClientConfig>>,
    #[serde(skip)]
    pub hostname_verifier: Option<VerifierRef>,
}

/// The TLS parameter bundle.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,
    /// PEM file of trusted roots. When unset the bundled web PKI roots are used.
    #[serde(default)]
    pub ca_cert_path: Option<PathBuf>,
    /// Name presented for SNI and certificate verification, if it differs from `host`.
    #[serde(default)]
    pub server_name: Option<String>,
    #[serde(default)]
    pub alpn_protocols: Vec<String>,
    #[serde(default = "default_enable_sni")]
    pub enable_sni: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ca_cert_path: None,
            server_name: None,
            alpn_protocols: Vec::new(),
            enable_sni: default_enable_sni(),
        }
    }
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_timeout() -> Option<Duration> {
    Some(DEFAULT_TIMEOUT)
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_enable_sni() -> bool {
    true
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            connect_timeout: default_timeout(),
            read_timeout: default_timeout(),
            unix_socket_path: None,
            tls: TlsConfig::default(),
            log_level: default_log_level(),
            tls_factory: None,
            hostname_verifier: None,
        }
    }
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Reads and validates a TOML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{}'", path.display()))?;
        let config: ConnectionConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse TOML from '{}'", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the settings for logical consistency.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.port == 0 {
            return Err(ClientError::InvalidConfig("port cannot be 0".into()));
        }
        if self.host.trim().is_empty() {
            return Err(ClientError::InvalidConfig("host cannot be empty".into()));
        }
        if self.connect_timeout == Some(Duration::ZERO) {
            return Err(ClientError::InvalidConfig(
                "connect_timeout cannot be 0; omit it to use the OS default".into(),
            ));
        }
        if self.read_timeout == Some(Duration::ZERO) {
            return Err(ClientError::InvalidConfig(
                "read_timeout cannot be 0; omit it to block forever".into(),
            ));
        }
        if let Some(path) = &self.tls.ca_cert_path
            && path.as_os_str().is_empty()
        {
            return Err(ClientError::InvalidConfig(
                "tls.ca_cert_path cannot be empty".into(),
            ));
        }
        if !self.tls.enabled
            && (self.tls_factory.is_some() || self.hostname_verifier.is_some())
        {
            warn!("TLS collaborators are configured but tls.enabled is false; they will be ignored.");
        }
        if self.tls.enabled && self.unix_socket_path.is_some() {
            warn!("A unix socket is configured together with TLS; the unix socket is used unencrypted.");
        }
        Ok(())
    }

    pub fn with_tls(mut self, enabled: bool) -> Self {
        self.tls.enabled = enabled;
        self
    }

    pub fn with_tls_config(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    /// Supplies the rustls configuration used for the handshake, replacing the
    /// one derived from `tls`. Implies TLS is enabled.
    pub fn with_tls_factory(mut self, factory: Arc<rustls::ClientConfig>) -> Self {
        self.tls.enabled = true;
        self.tls_factory = Some(factory);
        self
    }

    pub fn with_hostname_verifier(mut self, verifier: impl HostnameVerifier + 'static) -> Self {
        self.hostname_verifier = Some(VerifierRef::new(verifier));
        self
    }

    pub fn with_unix_socket(mut self, path: impl Into<PathBuf>) -> Self {
        self.unix_socket_path = Some(path.into());
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }
}
