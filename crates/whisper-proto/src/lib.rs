//! Wire protocol shared by the whisper chat server and client.
//!
//! A frame is one versioned packet: a version byte, a version-specific
//! header and an opaque payload. The payload of every known packet is a
//! postcard-encoded [`messages::Message`].

pub mod codec;
pub mod constants;
pub mod error;
pub mod header;
pub mod messages;
pub mod packet;
pub mod registry;

pub use error::ProtoError;
pub use packet::{Packet, PacketType, PacketV1, Status};
pub use registry::PacketRegistry;
