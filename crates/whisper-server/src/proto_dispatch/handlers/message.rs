use whisper_proto::{
    PacketType, PacketV1,
    messages::{ChatEvent, MessageRequest},
};

use super::{HandlerContext, RequestHandler, broadcast, chat_event};
use crate::proto_dispatch::error::{HandlerError, HandlerResult};

/// Chat text, relayed to every other authenticated peer.
pub struct MessageHandler;

impl RequestHandler for MessageHandler {
    fn packet_type(&self) -> PacketType {
        PacketType::Message
    }

    fn handle(&self, packet: &PacketV1, ctx: &mut HandlerContext<'_>) -> HandlerResult {
        let conn = ctx
            .state
            .get(ctx.conn_id)
            .ok_or(HandlerError::UnknownConnection(ctx.conn_id))?;
        let Some(user) = conn.username().filter(|_| conn.is_serving()).map(str::to_owned) else {
            return Err(HandlerError::validation(
                "username",
                "set a username before sending messages",
            ));
        };

        let req: MessageRequest = packet.content()?;
        if req.text.trim().is_empty() {
            return Err(HandlerError::validation("text", "message must not be empty"));
        }

        let mut out = Vec::new();
        broadcast(
            ctx,
            chat_event(&ChatEvent::Message {
                user,
                text: req.text,
            })?,
            &mut out,
        );
        Ok(out)
    }
}
