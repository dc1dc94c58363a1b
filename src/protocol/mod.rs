//! RTMP protocol layer: handshake, chunking and message framing

pub mod chunk;
pub mod constants;
pub mod handshake;
pub mod message;

pub use chunk::{ChunkDecoder, ChunkEncoder};
pub use handshake::{Handshake, HandshakeRole};
pub use message::{Command, DataMessage, RtmpMessage};
