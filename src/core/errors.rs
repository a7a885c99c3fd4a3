// src/core/errors.rs

//! Defines the error taxonomy for the connection core.

use std::sync::Arc;
use thiserror::Error;

/// Every failure a `Connection` can surface.
///
/// The variants fall into two families. Connection-level errors (`Connection`,
/// `Protocol`, `Broken`) mean the channel is dead and must be re-established.
/// Everything else is scoped to a single reply and leaves the channel usable.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Transport failure: connect, TLS, write, read, timeout change.
    #[error("{message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Arc<std::io::Error>>,
    },

    /// A frame on the wire could not be decoded. Fatal to the channel, since
    /// the stream position is no longer trustworthy.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The channel already suffered a fatal fault and refuses further I/O.
    #[error("Connection is broken; reconnect before reuse")]
    Broken,

    /// A server-reported application error (e.g. `WRONGTYPE ...`).
    #[error("{0}")]
    Data(String),

    /// A typed accessor received a different reply variant than it expects.
    #[error("Unexpected reply: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A query that needs a live transport was made before `connect`. No I/O
    /// was attempted and the channel state is untouched.
    #[error("Not connected to {0}")]
    NotConnected(String),
}

impl ClientError {
    /// Builds a `Connection` error whose message carries the target address.
    pub fn connection(host: &str, port: u16, source: std::io::Error) -> Self {
        ClientError::Connection {
            message: format!("Failed connecting to host {host}:{port}: {source}"),
            source: Some(Arc::new(source)),
        }
    }

    /// Builds a `Connection` error for an I/O failure on an established channel.
    pub fn transport(host: &str, port: u16, op: &str, source: std::io::Error) -> Self {
        ClientError::Connection {
            message: format!("I/O error on {host}:{port} during {op}: {source}"),
            source: Some(Arc::new(source)),
        }
    }

    /// Builds a `Connection` error with a custom message and no io cause.
    pub fn connection_msg(message: impl Into<String>) -> Self {
        ClientError::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// True if the error means the channel must be discarded.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            ClientError::Connection { .. } | ClientError::Protocol(_) | ClientError::Broken
        )
    }

    /// True for a server-reported application error.
    pub fn is_data_error(&self) -> bool {
        matches!(self, ClientError::Data(_))
    }

    /// Replaces the message of a `Connection` error while keeping its root cause.
    /// Other variants are returned unchanged.
    pub(crate) fn with_message(self, message: String) -> Self {
        match self {
            ClientError::Connection { source, .. } => ClientError::Connection { message, source },
            ClientError::Protocol(_) => ClientError::Connection {
                message,
                source: None,
            },
            other => other,
        }
    }
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
impl Clone for ClientError {
    fn clone(&self) -> Self {
        match self {
            ClientError::Connection { message, source } => ClientError::Connection {
                message: message.clone(),
                source: source.clone(),
            },
            ClientError::Protocol(s) => ClientError::Protocol(s.clone()),
            ClientError::Broken => ClientError::Broken,
            ClientError::Data(s) => ClientError::Data(s.clone()),
            ClientError::TypeMismatch { expected, actual } => ClientError::TypeMismatch {
                expected: *expected,
                actual: *actual,
            },
            ClientError::InvalidConfig(s) => ClientError::InvalidConfig(s.clone()),
            ClientError::NotConnected(s) => ClientError::NotConnected(s.clone()),
        }
    }
}

impl PartialEq for ClientError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                ClientError::Connection { message: m1, .. },
                ClientError::Connection { message: m2, .. },
            ) => m1 == m2,
            (ClientError::Protocol(s1), ClientError::Protocol(s2)) => s1 == s2,
            (ClientError::Data(s1), ClientError::Data(s2)) => s1 == s2,
            (
                ClientError::TypeMismatch {
                    expected: e1,
                    actual: a1,
                },
                ClientError::TypeMismatch {
                    expected: e2,
                    actual: a2,
                },
            ) => e1 == e2 && a1 == a2,
            (ClientError::InvalidConfig(s1), ClientError::InvalidConfig(s2)) => s1 == s2,
            (ClientError::NotConnected(s1), ClientError::NotConnected(s2)) => s1 == s2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        ClientError::Connection {
            message: format!("IO Error: {e}"),
            source: Some(Arc::new(e)),
        }
    }
}
