use thiserror::Error;

use crate::packet::PacketType;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("unknown packet version {0}")]
    UnknownVersion(u8),
    #[error("packet version 0 is reserved")]
    ReservedVersion,
    #[error("packet version {0} is already registered")]
    DuplicateVersion(u8),
    #[error("unknown packet type: {0}")]
    UnknownPacketType(u8),
    #[error("unknown packet status: {0}")]
    UnknownStatus(u8),
    #[error("reserved status bits set: {0:#04x}")]
    ReservedBits(u8),
    #[error("payload too large: {0}")]
    PayloadTooLarge(usize),
    #[error("expected {expected:?} packet, got {actual:?}")]
    TypeMismatch {
        expected: PacketType,
        actual: PacketType,
    },
    #[error("connection closed")]
    ConnectionClosed,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("postcard error: {0}")]
    Postcard(#[from] postcard::Error),
}

impl ProtoError {
    /// True when the peer went away rather than sent something malformed.
    pub fn is_connection_closed(&self) -> bool {
        match self {
            ProtoError::ConnectionClosed => true,
            ProtoError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}
