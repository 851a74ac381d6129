use tracing::info;
use whisper_proto::{
    PacketType, PacketV1, Status,
    messages::{ExitNotice, ExitRequest},
};

use super::{HandlerContext, RequestHandler, Response, broadcast, user_exit};
use crate::proto_dispatch::error::{HandlerError, HandlerResult};

/// Peer-initiated close. Acknowledged, then the connection is dropped.
pub struct ExitHandler;

impl RequestHandler for ExitHandler {
    fn packet_type(&self) -> PacketType {
        PacketType::Exit
    }

    fn handle(&self, packet: &PacketV1, ctx: &mut HandlerContext<'_>) -> HandlerResult {
        let req: ExitRequest = packet.content_or_default()?;

        let conn = ctx
            .state
            .get_mut(ctx.conn_id)
            .ok_or(HandlerError::UnknownConnection(ctx.conn_id))?;
        conn.close = true;
        let announced = conn.is_authenticated().then(|| conn.display_name());
        info!(conn_id = ctx.conn_id, name = %conn.display_name(), reason = ?req.reason, "Peer exiting");

        let mut out = vec![Response::to(
            ctx.conn_id,
            PacketV1::response(Status::Success, &ExitNotice { reason: req.reason })?,
        )];
        if let Some(user) = announced {
            broadcast(ctx, user_exit(&user, req.reason)?, &mut out);
        }
        Ok(out)
    }
}
