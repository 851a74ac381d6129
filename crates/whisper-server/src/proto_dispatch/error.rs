//! Handler error types.

use whisper_proto::{PacketType, ProtoError};

use crate::net::inbound::ConnId;

/// Error returned by a request handler.
///
/// `Validation` is answered with a `ValidationError` response to the sender
/// and the connection stays open. Every other variant is a protocol
/// violation and closes the connection.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("invalid {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },
    #[error(transparent)]
    Protocol(#[from] ProtoError),
    #[error("no handler for v{version} {packet_type:?} packets")]
    Unhandled { version: u8, packet_type: PacketType },
    #[error("{actual:?} packet routed to {expected:?} handler")]
    TypeMismatch {
        expected: PacketType,
        actual: PacketType,
    },
    #[error("unknown connection {0}")]
    UnknownConnection(ConnId),
}

impl HandlerError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}

/// Convenient Result type for handlers.
pub type HandlerResult = Result<Vec<super::handlers::Response>, HandlerError>;
