//! Response dispatch.
//!
//! Server packets are routed to a [`ResponseHandler`] keyed by
//! `(version, packet type)`, mirroring how the server routes requests.

use std::collections::HashMap;

use tracing::warn;
use whisper_proto::{Packet, PacketType, PacketV1, ProtoError, constants::V1};

use crate::{event::ClientEvent, state::ClientState};

mod handlers;

pub use handlers::{ExitResponse, InitResponse, MessageResponse};

/// Turns one server packet of a given type into GUI events.
pub trait ResponseHandler: Send + Sync {
    fn packet_type(&self) -> PacketType;

    fn handle(
        &self,
        packet: &PacketV1,
        state: &mut ClientState,
    ) -> Result<Vec<ClientEvent>, ProtoError>;
}

pub struct ResponseRegistry {
    handlers: HashMap<(u8, PacketType), Box<dyn ResponseHandler>>,
}

impl ResponseRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(V1, Box::new(InitResponse));
        registry.register(V1, Box::new(ExitResponse));
        registry.register(V1, Box::new(MessageResponse));
        registry
    }

    pub fn register(&mut self, version: u8, handler: Box<dyn ResponseHandler>) {
        let key = (version, handler.packet_type());
        if self.handlers.insert(key, handler).is_some() {
            warn!(version, packet_type = ?key.1, "Replacing response handler");
        }
    }

    /// Packets nobody registered for are logged and yield no events.
    pub fn dispatch(
        &self,
        packet: &Packet,
        state: &mut ClientState,
    ) -> Result<Vec<ClientEvent>, ProtoError> {
        let key = (packet.version(), packet.packet_type());
        let Some(handler) = self.handlers.get(&key) else {
            warn!(version = key.0, packet_type = ?key.1, "No handler for server packet");
            return Ok(Vec::new());
        };

        match packet {
            Packet::V1(p) => handler.handle(p, state),
        }
    }
}

impl Default for ResponseRegistry {
    fn default() -> Self {
        Self::new()
    }
}
