//! Client error types.

use std::net::SocketAddr;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("not connected to server")]
    NotConnected,

    #[error("already connected to {0}")]
    AlreadyConnected(SocketAddr),

    #[error("connection refused by {0}")]
    ConnectionRefused(SocketAddr),

    #[error("timed out connecting to {0}")]
    ConnectTimeout(SocketAddr),

    #[error("protocol error: {0}")]
    Protocol(#[from] whisper_proto::ProtoError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Engine(#[from] whisper_engine::EngineError),
}
