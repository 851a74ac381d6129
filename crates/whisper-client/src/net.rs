//! TCP transport for the chat client.
//!
//! The socket is split into a reader task that turns bytes into
//! [`TcpClientEvent`]s and a writer task that drains [`TcpClientCommand`]s.
//! Both run on the client's engine; neither ever fails the engine.

use std::{io::ErrorKind, net::SocketAddr, sync::Arc, time::Duration};

use bytes::{Buf, Bytes, BytesMut};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    sync::mpsc,
};
use tracing::{debug, error, info, trace, warn};
use whisper_proto::{Packet, PacketRegistry, codec::try_decode_frames};

use crate::error::ClientError;

/// What the reader task reports.
#[derive(Debug)]
pub enum TcpClientEvent {
    Packet(Packet),
    Disconnected { reason: String },
}

/// What the writer task accepts.
#[derive(Debug)]
pub enum TcpClientCommand {
    SendRaw(Bytes),
    Disconnect,
}

/// Connecting half of the transport.
#[derive(Debug, Default)]
pub enum TcpClient {
    #[default]
    NotConnected,
    Connected {
        peer: SocketAddr,
        /// Handed to the reader and writer tasks when serving starts.
        stream: Option<TcpStream>,
    },
}

impl TcpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a connection to `addr`, blocking for at most `timeout`.
    ///
    /// Must be called inside a runtime context (see `EventEngine::enter`).
    pub fn connect(&mut self, addr: SocketAddr, timeout: Duration) -> Result<SocketAddr, ClientError> {
        if let TcpClient::Connected { peer, .. } = self {
            return Err(ClientError::AlreadyConnected(*peer));
        }

        let std_stream =
            std::net::TcpStream::connect_timeout(&addr, timeout).map_err(|e| match e.kind() {
                ErrorKind::ConnectionRefused => ClientError::ConnectionRefused(addr),
                ErrorKind::TimedOut | ErrorKind::WouldBlock => ClientError::ConnectTimeout(addr),
                _ => ClientError::Io(e),
            })?;
        std_stream.set_nonblocking(true)?;
        std_stream.set_nodelay(true)?;
        let stream = TcpStream::from_std(std_stream)?;
        let local = stream.local_addr()?;

        info!(%addr, %local, "Connected to server");
        *self = TcpClient::Connected {
            peer: addr,
            stream: Some(stream),
        };
        Ok(local)
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, TcpClient::Connected { .. })
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        match self {
            TcpClient::Connected { peer, .. } => Some(*peer),
            TcpClient::NotConnected => None,
        }
    }

    pub(crate) fn take_stream(&mut self) -> Result<TcpStream, ClientError> {
        match self {
            TcpClient::Connected { stream, .. } => stream.take().ok_or(ClientError::NotConnected),
            TcpClient::NotConnected => Err(ClientError::NotConnected),
        }
    }

    /// Forgets the connection. A stream not yet handed out is closed here.
    pub fn disconnect(&mut self) -> Result<(), ClientError> {
        match std::mem::take(self) {
            TcpClient::Connected { peer, .. } => {
                debug!(%peer, "Disconnected from server");
                Ok(())
            }
            TcpClient::NotConnected => Err(ClientError::NotConnected),
        }
    }
}

/// Writer task: forwards encoded frames until told to stop, then shuts the
/// write side down so the server sees every queued frame before EOF.
pub(crate) async fn writer_loop(
    mut write: impl AsyncWrite + Unpin,
    mut cmd_rx: mpsc::Receiver<TcpClientCommand>,
) -> anyhow::Result<()> {
    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            TcpClientCommand::SendRaw(bytes) => {
                trace!("Sending {} bytes to server", bytes.len());
                if let Err(e) = write.write_all(&bytes).await {
                    warn!("Write error: {}", e);
                    break;
                }
            }
            TcpClientCommand::Disconnect => {
                debug!("Disconnect command received");
                break;
            }
        }
    }

    let _ = write.shutdown().await;
    Ok(())
}

/// Reader task: decodes frames as they arrive. Always ends with exactly one
/// `Disconnected` event unless the event channel is gone.
pub(crate) async fn reader_loop(
    mut read: impl AsyncRead + Unpin,
    registry: Arc<PacketRegistry>,
    event_tx: mpsc::Sender<TcpClientEvent>,
) -> anyhow::Result<()> {
    let mut buf = BytesMut::with_capacity(8 * 1024);

    let reason = loop {
        buf.reserve(4096);
        match read.read_buf(&mut buf).await {
            Ok(0) => {
                info!("Server closed connection");
                break "server closed connection".to_string();
            }
            Ok(n) => {
                trace!("Received {} bytes from server", n);
                match try_decode_frames(&registry, &buf) {
                    Ok((packets, consumed)) => {
                        for packet in packets {
                            debug!(packet_type = ?packet.packet_type(), "Received packet");
                            if event_tx.send(TcpClientEvent::Packet(packet)).await.is_err() {
                                debug!("Event channel closed");
                                return Ok(());
                            }
                        }
                        buf.advance(consumed);
                    }
                    Err(e) => {
                        error!("Protocol decode error: {}", e);
                        break format!("protocol error: {e}");
                    }
                }
            }
            Err(e) => {
                warn!("Read error: {}", e);
                break format!("read error: {e}");
            }
        }
    };

    let _ = event_tx.send(TcpClientEvent::Disconnected { reason }).await;
    Ok(())
}
