use whisper_proto::{
    Packet, PacketType, PacketV1, ProtoError, Status,
    messages::{ChatEvent, ExitReason},
};

use super::error::HandlerResult;
use crate::{net::inbound::ConnId, session::state::ChatState};

mod exit;
mod init;
mod message;

pub use exit::ExitHandler;
pub use init::InitHandler;
pub use message::MessageHandler;

/// One packet to deliver, and to whom.
#[derive(Debug, Clone)]
pub struct Response {
    pub packet: Packet,
    pub receivers: Vec<ConnId>,
}

impl Response {
    pub fn new(packet: impl Into<Packet>, receivers: Vec<ConnId>) -> Self {
        Self {
            packet: packet.into(),
            receivers,
        }
    }

    pub fn to(receiver: ConnId, packet: impl Into<Packet>) -> Self {
        Self::new(packet, vec![receiver])
    }
}

/// What a handler may see and touch while servicing one packet.
pub struct HandlerContext<'a> {
    pub conn_id: ConnId,
    pub state: &'a mut ChatState,
}

/// Services requests of exactly one packet type.
pub trait RequestHandler: Send + Sync {
    fn packet_type(&self) -> PacketType;

    fn handle(&self, packet: &PacketV1, ctx: &mut HandlerContext<'_>) -> HandlerResult;
}

pub(crate) fn chat_event(event: &ChatEvent) -> Result<PacketV1, ProtoError> {
    PacketV1::response(Status::Success, event)
}

/// The notice remaining peers get when `user` leaves.
pub(crate) fn user_exit(user: &str, reason: Option<ExitReason>) -> Result<PacketV1, ProtoError> {
    chat_event(&ChatEvent::UserExit {
        user: user.to_owned(),
        reason,
    })
}

/// Broadcast to every authenticated peer but the sender. Empty audiences
/// produce no response at all.
pub(crate) fn broadcast(
    ctx: &HandlerContext<'_>,
    packet: PacketV1,
    out: &mut Vec<Response>,
) {
    let receivers = ctx.state.authenticated_except(ctx.conn_id);
    if !receivers.is_empty() {
        out.push(Response::new(packet, receivers));
    }
}
