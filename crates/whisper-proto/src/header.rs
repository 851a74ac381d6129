use crate::{
    constants::{V1, V1_HEADER_LEN, V1_MAX_DATA_LEN},
    error::ProtoError,
    packet::{PacketType, Status},
};

/// Metadata in front of every v1 payload (wire format).
///
/// Encoding rules:
/// - Fixed size: exactly `V1_HEADER_LEN` bytes, version byte included.
/// - The length field is big-endian.
/// - The status lives in the high nibble of its byte; the low nibble is
///   reserved and must be zero.
///
/// Decode rules:
/// - Requires `buf.len() >= V1_HEADER_LEN` and `buf[0] == V1`.
/// - Rejects unknown type and status ordinals.
/// - Rejects a declared length above `V1_MAX_DATA_LEN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct V1Header {
    pub packet_type: PacketType,
    pub status: Status,
    /// Payload bytes following the header.
    pub data_len: u16,
}

impl V1Header {
    pub const LEN: usize = V1_HEADER_LEN;

    pub fn new(packet_type: PacketType, status: Status, data_len: usize) -> Result<Self, ProtoError> {
        if data_len > V1_MAX_DATA_LEN {
            return Err(ProtoError::PayloadTooLarge(data_len));
        }
        Ok(Self {
            packet_type,
            status,
            data_len: data_len as u16,
        })
    }

    /// Offsets (bytes):
    /// - 0     version (always `V1`)
    /// - 1     packet type
    /// - 2..4  data_len (u16 BE)
    /// - 4     status << 4
    pub fn encode_into(&self, out: &mut [u8; V1_HEADER_LEN]) {
        out[0] = V1;
        out[1] = self.packet_type as u8;
        out[2..4].copy_from_slice(&self.data_len.to_be_bytes());
        out[4] = (self.status as u8) << 4;
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ProtoError> {
        let buf: &[u8; V1_HEADER_LEN] = buf
            .get(..V1_HEADER_LEN)
            .and_then(|b| b.try_into().ok())
            .ok_or(ProtoError::ConnectionClosed)?;

        if buf[0] != V1 {
            return Err(ProtoError::UnknownVersion(buf[0]));
        }

        let packet_type =
            PacketType::from_repr(buf[1]).ok_or(ProtoError::UnknownPacketType(buf[1]))?;

        let data_len = u16::from_be_bytes([buf[2], buf[3]]);
        if data_len as usize > V1_MAX_DATA_LEN {
            return Err(ProtoError::PayloadTooLarge(data_len as usize));
        }

        let status_byte = buf[4];
        if status_byte & 0x0F != 0 {
            return Err(ProtoError::ReservedBits(status_byte));
        }
        let status =
            Status::from_repr(status_byte >> 4).ok_or(ProtoError::UnknownStatus(status_byte >> 4))?;

        Ok(Self {
            packet_type,
            status,
            data_len,
        })
    }
}
