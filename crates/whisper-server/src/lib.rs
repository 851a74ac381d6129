//! whisper chat server.
//!
//! [`ChatServer`] binds the listener on an [`EventEngine`] and serves until
//! the engine is stopped. Connection tasks feed [`InboundEvent`]s to a
//! single dispatcher task, which owns every connection's session state.
//!
//! [`InboundEvent`]: net::inbound::InboundEvent

use std::{net::SocketAddr, sync::Arc};

use tokio::sync::mpsc;
use tracing::info;
use whisper_engine::{EngineHandle, EventEngine, InitialTask};
use whisper_proto::PacketRegistry;

use crate::{
    net::tcp::{TcpServer, run_acceptor},
    proto_dispatch::registry::HandlerRegistry,
    session::dispatcher::Dispatcher,
};

pub mod config;
pub mod error;
pub mod net;
pub mod proto_dispatch;
pub mod session;

pub use config::ServerConfig;
pub use error::ServerError;

pub struct ChatServer {
    config: ServerConfig,
    packets: Arc<PacketRegistry>,
    handlers: Arc<HandlerRegistry>,
    transport: TcpServer,
}

impl ChatServer {
    pub fn new(config: ServerConfig) -> Self {
        Self::with_registries(config, PacketRegistry::standard(), HandlerRegistry::standard())
    }

    pub fn with_registries(
        config: ServerConfig,
        packets: PacketRegistry,
        handlers: HandlerRegistry,
    ) -> Self {
        Self {
            config,
            packets: Arc::new(packets),
            handlers: Arc::new(handlers),
            transport: TcpServer::new(),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Binds the configured address on `engine`. Returns the bound address,
    /// which differs from the configured one when port 0 was requested.
    pub fn start(&mut self, engine: &EventEngine) -> Result<SocketAddr, ServerError> {
        let _guard = engine.enter();
        self.transport.start(self.config.bind)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.local_addr()
    }

    /// Engine `main`: runs the accept loop and the dispatcher until the
    /// engine stops, then closes the listener.
    pub async fn serve(mut self, engine: EngineHandle) -> anyhow::Result<()> {
        let listener = self.transport.listener()?;
        let (tx, rx) = mpsc::channel(self.config.inbound_queue);

        let dispatcher = Dispatcher::new(
            Arc::clone(&self.handlers),
            engine.clone(),
            tx.clone(),
            self.config.handshake_timeout,
        );

        let tasks = [
            InitialTask::new(
                "connection acceptor",
                run_acceptor(
                    listener,
                    engine.clone(),
                    Arc::clone(&self.packets),
                    tx,
                    self.config.outbound_queue,
                ),
            ),
            InitialTask::new("packet dispatcher", dispatcher.run(rx)),
        ];

        let reason = engine.run_until_stopped(tasks).await;
        info!(?reason, "Server stopped");
        self.transport.stop()?;
        Ok(())
    }

    /// Starts (if needed) and serves on `engine`, blocking the calling thread.
    pub fn run(mut self, engine: &EventEngine) -> Result<(), ServerError> {
        if !self.transport.is_serving() {
            self.start(engine)?;
        }
        match engine.run_main(|handle| self.serve(handle)) {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}
