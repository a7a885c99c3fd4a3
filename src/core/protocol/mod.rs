// src/core/protocol/mod.rs

pub mod codec;
pub mod command;
pub mod reply;
pub use codec::{Request, RespCodec, read_error_line_if_possible};
pub use command::ProtocolCommand;
pub use reply::Reply;
