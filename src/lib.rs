// src/lib.rs

//! Blocking RESP connection core: one channel, three transports, typed replies.

pub mod config;
pub mod connection;
pub mod core;

// Re-export
pub use crate::config::{ConnectionConfig, TlsConfig};
pub use crate::connection::{
    ChannelState, Connection, InfiniteTimeoutGuard, ShutdownHandle, TransportKind,
};
pub use crate::core::{ClientError, ClientResult, ProtocolCommand, Reply};
