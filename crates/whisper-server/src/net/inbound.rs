use std::net::SocketAddr;

use tokio_util::sync::CancellationToken;
use whisper_proto::Packet;

use super::outbound::OutboundTx;

/// Connection identifier, unique for the lifetime of one server.
pub type ConnId = u64;

/// Events flowing from connection tasks (and timers) into the dispatcher.
///
/// - `Connected` is emitted once per accepted connection, carrying the
///   outbound queue and the token that tears the connection down at once.
/// - `Packet` is emitted for every decoded packet, in arrival order.
/// - `Disconnected` is emitted when the reader exits for any reason.
/// - `HandshakeExpired` is emitted by the handshake timer.
#[derive(Debug)]
pub enum InboundEvent {
    Connected {
        conn_id: ConnId,
        peer: SocketAddr,
        outbound: OutboundTx,
        cancel: CancellationToken,
    },

    Packet {
        conn_id: ConnId,
        packet: Packet,
    },

    Disconnected {
        conn_id: ConnId,
        /// Best-effort human-readable reason (logging only).
        reason: String,
    },

    HandshakeExpired {
        conn_id: ConnId,
    },
}
