use bytes::{Bytes, BytesMut};
use serde::{Serialize, de::DeserializeOwned};
use strum::FromRepr;

use crate::{
    constants::{V1, V1_HEADER_LEN, V1_MAX_DATA_LEN},
    error::ProtoError,
    header::V1Header,
    messages::Message,
};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr)]
pub enum PacketType {
    Exit = 0,
    Init = 1,
    Message = 2,
}

/// Outcome carried by a response. Requests always use `Success`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, FromRepr)]
pub enum Status {
    #[default]
    Success = 0,
    ValidationError = 1,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketV1 {
    pub packet_type: PacketType,
    pub status: Status,
    pub data: Bytes,
}

impl PacketV1 {
    pub fn new(
        packet_type: PacketType,
        status: Status,
        data: impl Into<Bytes>,
    ) -> Result<Self, ProtoError> {
        let data = data.into();
        if data.len() > V1_MAX_DATA_LEN {
            return Err(ProtoError::PayloadTooLarge(data.len()));
        }
        Ok(Self {
            packet_type,
            status,
            data,
        })
    }

    /// Builds a request carrying `msg`. The packet type comes from the message.
    pub fn request<M: Message>(msg: &M) -> Result<Self, ProtoError> {
        Self::with_content(M::packet_type(), Status::Success, msg)
    }

    pub fn response<M: Message>(status: Status, msg: &M) -> Result<Self, ProtoError> {
        Self::with_content(M::packet_type(), status, msg)
    }

    /// Serializes arbitrary content under an explicit type.
    ///
    /// Used for payloads that are shared between packet types, such as
    /// validation failures.
    pub fn with_content<T: Serialize>(
        packet_type: PacketType,
        status: Status,
        content: &T,
    ) -> Result<Self, ProtoError> {
        let data = postcard::to_stdvec(content)?;
        Self::new(packet_type, status, data)
    }

    /// Decodes the payload as `M`, refusing packets of another type.
    pub fn content<M: Message>(&self) -> Result<M, ProtoError> {
        if self.packet_type != M::packet_type() {
            return Err(ProtoError::TypeMismatch {
                expected: M::packet_type(),
                actual: self.packet_type,
            });
        }
        self.decode_content()
    }

    /// Like [`content`](Self::content), but an empty payload yields `M::default()`.
    pub fn content_or_default<M: Message + Default>(&self) -> Result<M, ProtoError> {
        if self.data.is_empty() && self.packet_type == M::packet_type() {
            return Ok(M::default());
        }
        self.content()
    }

    pub fn decode_content<T: DeserializeOwned>(&self) -> Result<T, ProtoError> {
        Ok(postcard::from_bytes(&self.data)?)
    }

    pub fn header(&self) -> Result<V1Header, ProtoError> {
        V1Header::new(self.packet_type, self.status, self.data.len())
    }

    pub fn encode_into(&self, out: &mut BytesMut) -> Result<(), ProtoError> {
        let header = self.header()?;
        let mut hbuf = [0u8; V1_HEADER_LEN];
        header.encode_into(&mut hbuf);

        out.reserve(V1_HEADER_LEN + self.data.len());
        out.extend_from_slice(&hbuf);
        out.extend_from_slice(&self.data);
        Ok(())
    }
}

/// A decoded frame of any registered version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    V1(PacketV1),
}

impl Packet {
    pub fn version(&self) -> u8 {
        match self {
            Packet::V1(_) => V1,
        }
    }

    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::V1(p) => p.packet_type,
        }
    }

    pub fn data(&self) -> &Bytes {
        match self {
            Packet::V1(p) => &p.data,
        }
    }

    pub fn as_v1(&self) -> Option<&PacketV1> {
        match self {
            Packet::V1(p) => Some(p),
        }
    }

    /// Encodes the complete frame, version byte first.
    pub fn encode(&self) -> Result<Bytes, ProtoError> {
        let mut out = BytesMut::new();
        match self {
            Packet::V1(p) => p.encode_into(&mut out)?,
        }
        Ok(out.freeze())
    }
}

impl From<PacketV1> for Packet {
    fn from(p: PacketV1) -> Self {
        Packet::V1(p)
    }
}
