use whisper_proto::{
    PacketType, PacketV1, ProtoError, Status,
    messages::{ChatEvent, ExitNotice, InitAccepted, ValidationFailure},
};

use super::ResponseHandler;
use crate::{event::ClientEvent, state::ClientState};

fn rejected(packet: &PacketV1) -> Result<Vec<ClientEvent>, ProtoError> {
    let ValidationFailure { message, field } = packet.decode_content()?;
    Ok(vec![ClientEvent::Rejected { message, field }])
}

/// Handshake and rename acknowledgements.
pub struct InitResponse;

impl ResponseHandler for InitResponse {
    fn packet_type(&self) -> PacketType {
        PacketType::Init
    }

    fn handle(
        &self,
        packet: &PacketV1,
        state: &mut ClientState,
    ) -> Result<Vec<ClientEvent>, ProtoError> {
        if packet.status == Status::ValidationError {
            return rejected(packet);
        }

        let InitAccepted { username, key } = packet.content()?;
        state.username = Some(username.clone());
        state.key = Some(key.clone());
        Ok(vec![ClientEvent::Accepted { username, key }])
    }
}

pub struct ExitResponse;

impl ResponseHandler for ExitResponse {
    fn packet_type(&self) -> PacketType {
        PacketType::Exit
    }

    fn handle(
        &self,
        packet: &PacketV1,
        state: &mut ClientState,
    ) -> Result<Vec<ClientEvent>, ProtoError> {
        if packet.status == Status::ValidationError {
            return rejected(packet);
        }

        let reason = if packet.data.is_empty() {
            None
        } else {
            packet.content::<ExitNotice>()?.reason
        };
        state.exited = true;
        state.roster.clear();
        Ok(vec![ClientEvent::Exited { reason }])
    }
}

/// Chat lines and roster notices.
pub struct MessageResponse;

impl ResponseHandler for MessageResponse {
    fn packet_type(&self) -> PacketType {
        PacketType::Message
    }

    fn handle(
        &self,
        packet: &PacketV1,
        state: &mut ClientState,
    ) -> Result<Vec<ClientEvent>, ProtoError> {
        if packet.status == Status::ValidationError {
            return rejected(packet);
        }

        let event: ChatEvent = packet.content()?;
        state.apply(&event);
        Ok(vec![ClientEvent::Chat(event)])
    }
}
