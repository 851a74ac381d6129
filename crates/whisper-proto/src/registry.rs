use std::collections::HashMap;

use bytes::Bytes;

use crate::{
    constants::{RESERVED_VERSION, V1},
    error::ProtoError,
    header::V1Header,
    packet::{Packet, PacketV1},
};

/// Decoder for one packet layout, selected by the leading version byte.
pub trait VersionCodec: Send + Sync + 'static {
    fn version(&self) -> u8;

    /// Metadata length, version byte included.
    fn header_len(&self) -> usize;

    /// Payload length declared by a complete header.
    fn payload_len(&self, header: &[u8]) -> Result<usize, ProtoError>;

    fn assemble(&self, header: &[u8], payload: Bytes) -> Result<Packet, ProtoError>;
}

pub struct V1Codec;

impl VersionCodec for V1Codec {
    fn version(&self) -> u8 {
        V1
    }

    fn header_len(&self) -> usize {
        V1Header::LEN
    }

    fn payload_len(&self, header: &[u8]) -> Result<usize, ProtoError> {
        Ok(V1Header::decode(header)?.data_len as usize)
    }

    fn assemble(&self, header: &[u8], payload: Bytes) -> Result<Packet, ProtoError> {
        let h = V1Header::decode(header)?;
        Ok(Packet::V1(PacketV1::new(h.packet_type, h.status, payload)?))
    }
}

/// Version byte to decoder table. Built once at startup, read-only afterwards.
#[derive(Default)]
pub struct PacketRegistry {
    codecs: HashMap<u8, Box<dyn VersionCodec>>,
}

impl PacketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every layout this build understands.
    pub fn standard() -> Self {
        let mut codecs: HashMap<u8, Box<dyn VersionCodec>> = HashMap::new();
        codecs.insert(V1, Box::new(V1Codec));
        Self { codecs }
    }

    pub fn register<C: VersionCodec>(&mut self, codec: C) -> Result<(), ProtoError> {
        let version = codec.version();
        if version == RESERVED_VERSION {
            return Err(ProtoError::ReservedVersion);
        }
        if self.codecs.contains_key(&version) {
            return Err(ProtoError::DuplicateVersion(version));
        }
        self.codecs.insert(version, Box::new(codec));
        Ok(())
    }

    pub fn get(&self, version: u8) -> Result<&dyn VersionCodec, ProtoError> {
        self.codecs
            .get(&version)
            .map(|c| c.as_ref())
            .ok_or(ProtoError::UnknownVersion(version))
    }

    pub fn versions(&self) -> impl Iterator<Item = u8> + '_ {
        self.codecs.keys().copied()
    }
}
