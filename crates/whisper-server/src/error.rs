use std::net::SocketAddr;

use whisper_engine::EngineError;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("address already in use: {0}")]
    AddressInUse(SocketAddr),
    #[error("server is already serving")]
    AlreadyServing,
    #[error("server is not serving")]
    NotServing,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Engine(#[from] EngineError),
}
