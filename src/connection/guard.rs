// src/connection/guard.rs

//! Defines `InfiniteTimeoutGuard`, an RAII guard around a blocking call.

use super::Connection;
use crate::core::ClientResult;
use std::ops::{Deref, DerefMut};
use tracing::{debug, warn};

/// Holds a connection with its read deadline lifted, restoring the configured
/// deadline when dropped.
///
/// Use for one blocking call (`BLPOP 0`, a subscription wait) whose reply may
/// legitimately take forever. Call `restore` to observe a restore failure;
/// otherwise `Drop` restores and only logs.
pub struct InfiniteTimeoutGuard<'a> {
    conn: &'a mut Connection,
    restored: bool,
}

impl<'a> InfiniteTimeoutGuard<'a> {
    pub(crate) fn new(conn: &'a mut Connection) -> ClientResult<Self> {
        conn.set_timeout_infinite()?;
        Ok(Self {
            conn,
            restored: false,
        })
    }

    /// Restores the configured read deadline and reports the outcome.
    pub fn restore(mut self) -> ClientResult<()> {
        self.restored = true;
        self.conn.rollback_timeout()
    }
}

impl Deref for InfiniteTimeoutGuard<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn
    }
}

impl DerefMut for InfiniteTimeoutGuard<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn
    }
}

impl Drop for InfiniteTimeoutGuard<'_> {
    fn drop(&mut self) {
        if self.restored {
            return;
        }
        if self.conn.is_broken() {
            debug!("Skipping read timeout restore on a broken connection.");
            return;
        }
        if let Err(e) = self.conn.rollback_timeout() {
            warn!("Failed to restore read timeout: {}", e);
        }
    }
}
