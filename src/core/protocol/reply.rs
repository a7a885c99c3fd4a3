// src/core/protocol/reply.rs

//! Defines the decoded server reply type.

use crate::core::ClientError;
use bytes::Bytes;

/// A single reply decoded from the server.
///
/// The null forms of the protocol are carried inside the variants that allow
/// them (`Bulk(None)` for `$-1`, `Array(None)` for `*-1`) so a typed accessor
/// can tell "absent" apart from "empty".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `+OK`, `+PONG`.
    Status(String),
    /// `-ERR ...`. An application error, not a transport fault.
    Error(String),
    /// `:1000`.
    Integer(i64),
    /// `$5\r\nhello` or `$-1`.
    Bulk(Option<Bytes>),
    /// `*2\r\n...` or `*-1`. Elements may themselves be arrays.
    Array(Option<Vec<Reply>>),
}

impl Reply {
    /// A short name for the variant, used in type-mismatch diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Reply::Status(_) => "status",
            Reply::Error(_) => "error",
            Reply::Integer(_) => "integer",
            Reply::Bulk(_) => "bulk",
            Reply::Array(_) => "array",
        }
    }

    /// True for `$-1` and `*-1`.
    pub fn is_null(&self) -> bool {
        matches!(self, Reply::Bulk(None) | Reply::Array(None))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// Turns an `Error` reply into `ClientError::Data`, passing every other
    /// variant through.
    pub fn into_result(self) -> Result<Reply, ClientError> {
        match self {
            Reply::Error(msg) => Err(ClientError::Data(msg)),
            other => Ok(other),
        }
    }

    pub(crate) fn mismatch(&self, expected: &'static str) -> ClientError {
        ClientError::TypeMismatch {
            expected,
            actual: self.kind(),
        }
    }
}

impl From<&str> for Reply {
    fn from(s: &str) -> Self {
        Reply::Bulk(Some(Bytes::copy_from_slice(s.as_bytes())))
    }
}

impl From<i64> for Reply {
    fn from(i: i64) -> Self {
        Reply::Integer(i)
    }
}

impl From<Vec<Reply>> for Reply {
    fn from(items: Vec<Reply>) -> Self {
        Reply::Array(Some(items))
    }
}
