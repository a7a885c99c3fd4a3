// src/core/protocol/command.rs

//! Names a command on the wire.

use bytes::Bytes;

/// Anything that can name a command on the wire.
///
/// The connection core does not enumerate commands; callers pass whatever
/// identifies the command they want framed.
pub trait ProtocolCommand {
    /// The raw command-name bytes, e.g. `b"GET"`.
    fn raw(&self) -> &[u8];
}

impl ProtocolCommand for str {
    fn raw(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl ProtocolCommand for String {
    fn raw(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl ProtocolCommand for [u8] {
    fn raw(&self) -> &[u8] {
        self
    }
}

impl<const N: usize> ProtocolCommand for [u8; N] {
    fn raw(&self) -> &[u8] {
        self
    }
}

impl ProtocolCommand for Bytes {
    fn raw(&self) -> &[u8] {
        self
    }
}

impl<T: ProtocolCommand + ?Sized> ProtocolCommand for &T {
    fn raw(&self) -> &[u8] {
        (**self).raw()
    }
}
