/// Version byte of the only packet layout currently on the wire.
pub const V1: u8 = 1;

/// Reserved version byte. Never registered, never valid on the wire.
pub const RESERVED_VERSION: u8 = 0;

/// Metadata bytes in front of a v1 payload: version, type, length (2), status.
pub const V1_HEADER_LEN: usize = 5;

/// Largest payload a v1 packet may carry.
///
/// The whole frame has to stay addressable by a 16-bit length, so the
/// metadata bytes are taken off the top.
pub const V1_MAX_DATA_LEN: usize = 0xFFFF - V1_HEADER_LEN;
