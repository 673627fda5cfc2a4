//! Binary wire protocol spoken between the broker, its clients and its workers.
//!
//! Every frame is a 12-byte header followed by the payload:
//! `[4-byte code] [type, big-endian i32] [payload length, big-endian i32] [payload]`.

mod codec;
mod packet;

pub use codec::PacketCodec;
pub use packet::{Code, Packet, PacketType};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid packet code: {0:?}")]
    InvalidCode([u8; 4]),

    #[error("Invalid packet type: {0}")]
    InvalidPacketType(i32),

    #[error("Invalid payload length: {0}")]
    InvalidLength(i32),

    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Truncated frame: {0} bytes is shorter than the packet header")]
    Truncated(usize),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Size of the fixed frame header.
pub const HEADER_SIZE: usize = 12;

/// Largest payload the stream decoder will buffer: 64MB
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024 * 1024;

/// Separator between the fields of a multi-argument payload.
pub const ARG_SEPARATOR: u8 = 0;
