// src/connection/state.rs

//! Defines the fault state of a connection.

/// Whether a channel can still be trusted.
///
/// `Broken` is terminal for the current transport: the only way back to
/// `Open` is a fresh, successful `Connection::connect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelState {
    #[default]
    Open,
    Broken,
}

impl ChannelState {
    pub fn is_broken(self) -> bool {
        self == ChannelState::Broken
    }
}
