use std::{io::ErrorKind, net::SocketAddr, sync::Arc};

use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use whisper_engine::EngineHandle;
use whisper_proto::{PacketRegistry, codec::read_packet};

use super::{
    inbound::{ConnId, InboundEvent},
    outbound::write_loop,
};
use crate::error::ServerError;

/// Listening half of the transport.
#[derive(Default)]
pub struct TcpServer {
    listener: Option<Arc<TcpListener>>,
}

impl TcpServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds and listens on `addr`, returning the bound address.
    ///
    /// Must be called inside a runtime context (see `EventEngine::enter`).
    pub fn start(&mut self, addr: SocketAddr) -> Result<SocketAddr, ServerError> {
        if self.listener.is_some() {
            return Err(ServerError::AlreadyServing);
        }

        let std_listener = std::net::TcpListener::bind(addr).map_err(|e| match e.kind() {
            ErrorKind::AddrInUse => ServerError::AddressInUse(addr),
            _ => ServerError::Io(e),
        })?;
        std_listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(std_listener)?;
        let local = listener.local_addr()?;

        info!(%local, "Listening");
        self.listener = Some(Arc::new(listener));
        Ok(local)
    }

    pub fn is_serving(&self) -> bool {
        self.listener.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    pub(crate) fn listener(&self) -> Result<Arc<TcpListener>, ServerError> {
        self.listener.clone().ok_or(ServerError::NotServing)
    }

    /// Closes the listening socket once the accept loop lets go of it.
    pub fn stop(&mut self) -> Result<(), ServerError> {
        match self.listener.take() {
            Some(listener) => {
                debug!(local = ?listener.local_addr().ok(), "Listener closed");
                Ok(())
            }
            None => Err(ServerError::NotServing),
        }
    }
}

/// Accept loop. Each connection gets a reader and a writer task on the engine.
///
/// Only a failing `accept` ends the loop, and that is fatal to the server.
pub async fn run_acceptor(
    listener: Arc<TcpListener>,
    engine: EngineHandle,
    registry: Arc<PacketRegistry>,
    tx: mpsc::Sender<InboundEvent>,
    outbound_queue: usize,
) -> anyhow::Result<()> {
    let mut next_conn_id: ConnId = 1;

    loop {
        let (stream, peer) = listener.accept().await?;
        let conn_id = next_conn_id;
        next_conn_id += 1;

        let _ = stream.set_nodelay(true);
        info!(conn_id, %peer, "Accepted connection");

        engine.create_task(
            "connection reader",
            handle_connection(
                stream,
                peer,
                conn_id,
                engine.clone(),
                Arc::clone(&registry),
                tx.clone(),
                outbound_queue,
            ),
        );
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    conn_id: ConnId,
    engine: EngineHandle,
    registry: Arc<PacketRegistry>,
    tx: mpsc::Sender<InboundEvent>,
    outbound_queue: usize,
) -> anyhow::Result<()> {
    let (mut read, write) = stream.into_split();

    let (out_tx, out_rx) = mpsc::channel(outbound_queue);
    let cancel = CancellationToken::new();
    engine.create_task(
        "connection writer",
        write_loop(conn_id, write, out_rx, cancel.clone()),
    );

    let connected = InboundEvent::Connected {
        conn_id,
        peer,
        outbound: out_tx,
        cancel: cancel.clone(),
    };
    if tx.send(connected).await.is_err() {
        return Ok(());
    }

    let reason = loop {
        let read_res = tokio::select! {
            res = read_packet(&registry, &mut read) => res,
            _ = cancel.cancelled() => break "closed".to_string(),
        };

        match read_res {
            Ok(packet) => {
                if tx.send(InboundEvent::Packet { conn_id, packet }).await.is_err() {
                    break "inbound channel closed".to_string();
                }
            }
            Err(e) if e.is_connection_closed() => break "eof".to_string(),
            Err(e) => {
                warn!(conn_id, %peer, error = %e, "Protocol error, closing connection");
                break format!("protocol error: {e}");
            }
        }
    };

    let _ = tx.send(InboundEvent::Disconnected { conn_id, reason }).await;
    Ok(())
}
