// src/connection/tls.rs

//! TLS client setup: building the rustls configuration, running the
//! handshake over an established TCP socket, and optional extra identity checks.

use crate::config::ConnectionConfig;
use crate::core::ClientError;
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConnection, RootCertStore, StreamOwned};
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::net::TcpStream;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

pub type TlsStream = StreamOwned<ClientConnection, TcpStream>;

/// An extra identity check run after a successful handshake.
///
/// rustls already verifies the certificate chain and that it covers the server
/// name. A verifier can add policy on top, e.g. pinning or a stricter SAN match.
/// Returning `false` fails the connection; there is no fallback to plaintext.
pub trait HostnameVerifier: Send + Sync {
    fn verify(&self, host: &str, session: &ClientConnection) -> bool;
}

impl<F> HostnameVerifier for F
where
    F: Fn(&str, &ClientConnection) -> bool + Send + Sync,
{
    fn verify(&self, host: &str, session: &ClientConnection) -> bool {
        self(host, session)
    }
}

/// A shareable, debuggable handle to a `HostnameVerifier`.
#[derive(Clone)]
pub struct VerifierRef(Arc<dyn HostnameVerifier>);

impl VerifierRef {
    pub fn new(verifier: impl HostnameVerifier + 'static) -> Self {
        Self(Arc::new(verifier))
    }

    pub fn verify(&self, host: &str, session: &ClientConnection) -> bool {
        self.0.verify(host, session)
    }
}

impl fmt::Debug for VerifierRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HostnameVerifier")
    }
}

/// Resolves the rustls configuration for a connection attempt.
///
/// A caller-supplied factory wins. Otherwise the trust store is the configured
/// CA file or, failing that, the bundled web PKI roots. The parameter bundle
/// (ALPN, SNI) is applied on top of either.
pub fn client_config(config: &ConnectionConfig) -> Result<Arc<rustls::ClientConfig>, ClientError> {
    let base = match &config.tls_factory {
        Some(factory) => factory.clone(),
        None => {
            let roots = match &config.tls.ca_cert_path {
                Some(path) => load_root_store(path)?,
                None => {
                    let mut store = RootCertStore::empty();
                    store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
                    store
                }
            };
            Arc::new(
                rustls::ClientConfig::builder()
                    .with_root_certificates(roots)
                    .with_no_client_auth(),
            )
        }
    };

    let tls = &config.tls;
    if tls.alpn_protocols.is_empty() && tls.enable_sni == base.enable_sni {
        return Ok(base);
    }
    let mut tuned = (*base).clone();
    tuned.enable_sni = tls.enable_sni;
    if !tls.alpn_protocols.is_empty() {
        tuned.alpn_protocols = tls
            .alpn_protocols
            .iter()
            .map(|p| p.as_bytes().to_vec())
            .collect();
    }
    Ok(Arc::new(tuned))
}

/// Runs the TLS handshake over `tcp` and applies the hostname verifier.
///
/// The handshake completes here rather than lazily on first write, so a bad
/// certificate surfaces from `connect()` instead of from a later `flush()`.
pub fn handshake(config: &ConnectionConfig, mut tcp: TcpStream) -> Result<TlsStream, ClientError> {
    let (host, port) = (config.host.as_str(), config.port);
    let tls_config = client_config(config)?;
    let name = config.tls.server_name.as_deref().unwrap_or(host);
    let server_name = ServerName::try_from(name)
        .map_err(|_| {
            ClientError::connection_msg(format!(
                "Failed connecting to host {host}:{port}: invalid TLS server name '{name}'"
            ))
        })?
        .to_owned();

    let mut session = ClientConnection::new(tls_config, server_name).map_err(|e| {
        ClientError::connection_msg(format!(
            "Failed connecting to host {host}:{port}: TLS setup failed: {e}"
        ))
    })?;

    debug!("Starting TLS handshake with {}:{}", host, port);
    while session.is_handshaking() {
        session
            .complete_io(&mut tcp)
            .map_err(|e| ClientError::connection(host, port, e))?;
    }

    if let Some(verifier) = &config.hostname_verifier
        && !verifier.verify(host, &session)
    {
        return Err(ClientError::connection_msg(format!(
            "The connection to '{host}:{port}' failed ssl/tls hostname verification."
        )));
    }

    info!(
        "TLS established with {}:{} ({:?})",
        host,
        port,
        session.protocol_version()
    );
    Ok(StreamOwned::new(session, tcp))
}

/// Loads trusted roots from a PEM file.
fn load_root_store(path: &Path) -> Result<RootCertStore, ClientError> {
    let certs = load_certs(path)?;
    let mut store = RootCertStore::empty();
    let (added, ignored) = store.add_parsable_certificates(certs);
    debug!(
        "Loaded {} CA certificate(s) from '{}' ({} ignored)",
        added,
        path.display(),
        ignored
    );
    if added == 0 {
        return Err(ClientError::InvalidConfig(format!(
            "No usable CA certificates in '{}'",
            path.display()
        )));
    }
    Ok(store)
}

/// Loads TLS certificates from a PEM file.
fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ClientError> {
    let cert_file = File::open(path).map_err(|e| {
        ClientError::InvalidConfig(format!(
            "Failed to open certificate file '{}': {}",
            path.display(),
            e
        ))
    })?;
    let mut cert_reader = BufReader::new(cert_file);
    let certs = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| {
            ClientError::InvalidConfig(format!(
                "Failed to parse certificates in '{}': {}",
                path.display(),
                e
            ))
        })?;
    if certs.is_empty() {
        return Err(ClientError::InvalidConfig(format!(
            "No certificates found in '{}'",
            path.display()
        )));
    }
    Ok(certs)
}
