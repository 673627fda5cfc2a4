use gearman_protocol::{Packet, PacketType, ProtocolError};
use std::fmt;
use thiserror::Error;

/// Role a connection has taken on, fixed by its first packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Unclassified,
    Worker,
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Unclassified => f.write_str("unclassified"),
            Role::Worker => f.write_str("worker"),
            Role::Client => f.write_str("client"),
        }
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Framing error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Unsupported or invalid packet {packet_type:?} for {role} connection")]
    UnexpectedPacket { role: Role, packet_type: PacketType },

    #[error("{packet_type:?} packet carries {actual} arguments, expected {expected}")]
    MissingArguments {
        packet_type: PacketType,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Connection {0} is closed")]
    ConnectionClosed(u64),

    #[error("Outbound queue for connection {0} is full")]
    QueueFull(u64),
}

impl SessionError {
    /// A well-formed packet that is not acceptable in the connection's current role.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            SessionError::UnexpectedPacket { .. }
                | SessionError::MissingArguments { .. }
                | SessionError::InvalidArgument(_)
        )
    }

    /// Label used for logging and the connection error counter.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::Protocol(ProtocolError::IoError(_)) => "transport",
            SessionError::Protocol(_) => "framing",
            SessionError::ConnectionClosed(_) | SessionError::QueueFull(_) => "transport",
            _ => "protocol",
        }
    }

    /// ERROR packet sent to the peer before a protocol violation closes its connection.
    pub fn to_error_packet(&self) -> Option<Packet> {
        let code: &[u8] = match self {
            SessionError::UnexpectedPacket { .. } => b"ERR_UNEXPECTED_PACKET",
            SessionError::MissingArguments { .. } => b"ERR_MISSING_ARGUMENTS",
            SessionError::InvalidArgument(_) => b"ERR_INVALID_ARGUMENT",
            _ => return None,
        };
        let message = self.to_string();
        Some(Packet::with_args(
            gearman_protocol::Code::Response,
            PacketType::Error,
            &[code, message.as_bytes()],
        ))
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
