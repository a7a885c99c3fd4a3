// src/core/mod.rs

//! Protocol types, the codec and the error taxonomy shared by the connection layer.

pub mod builder;
pub mod errors;
pub mod protocol;

pub use errors::ClientError;
pub use protocol::{ProtocolCommand, Reply};

/// Result alias used throughout the crate.
pub type ClientResult<T> = Result<T, ClientError>;
