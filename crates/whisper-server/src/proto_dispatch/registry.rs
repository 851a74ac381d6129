//! Handler registry for request dispatch.
//!
//! Handlers are keyed by `(version, packet type)`. The packet type half of
//! the key comes from the handler itself, so a handler can only ever be
//! reached by packets it declared.

use std::collections::HashMap;

use tracing::warn;
use whisper_proto::{Packet, PacketType};

use super::error::{HandlerError, HandlerResult};
use super::handlers::{HandlerContext, RequestHandler};

pub struct HandlerRegistry {
    handlers: HashMap<(u8, PacketType), Box<dyn RequestHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Every handler this server ships with.
    pub fn standard() -> Self {
        use super::handlers::{ExitHandler, InitHandler, MessageHandler};
        use whisper_proto::constants::V1;

        crate::register_handlers! {
            V1 => InitHandler,
            V1 => ExitHandler,
            V1 => MessageHandler,
        }
    }

    /// Registers `handler` for `version`. A later registration for the same
    /// key replaces the earlier one.
    pub fn register(&mut self, version: u8, handler: Box<dyn RequestHandler>) {
        let key = (version, handler.packet_type());
        if self.handlers.insert(key, handler).is_some() {
            warn!(version, packet_type = ?key.1, "Replacing request handler");
        }
    }

    pub fn has_handler(&self, version: u8, packet_type: PacketType) -> bool {
        self.handlers.contains_key(&(version, packet_type))
    }

    pub fn dispatch(&self, packet: &Packet, ctx: &mut HandlerContext<'_>) -> HandlerResult {
        let version = packet.version();
        let packet_type = packet.packet_type();
        let handler = self
            .handlers
            .get(&(version, packet_type))
            .ok_or(HandlerError::Unhandled {
                version,
                packet_type,
            })?;

        if handler.packet_type() != packet_type {
            return Err(HandlerError::TypeMismatch {
                expected: handler.packet_type(),
                actual: packet_type,
            });
        }

        match packet {
            Packet::V1(p) => handler.handle(p, ctx),
        }
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds a [`HandlerRegistry`] from `version => handler` pairs.
///
/// # Example
/// ```ignore
/// let registry = register_handlers! {
///     V1 => InitHandler,
///     V1 => MessageHandler,
/// };
/// ```
#[macro_export]
macro_rules! register_handlers {
    ($($version:expr => $handler:expr),* $(,)?) => {{
        let mut registry = $crate::proto_dispatch::registry::HandlerRegistry::new();
        $(
            registry.register($version, Box::new($handler));
        )*
        registry
    }};
}
