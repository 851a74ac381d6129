use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{error::ProtoError, packet::Packet, registry::PacketRegistry};

/// Reads exactly one packet from `reader`.
///
/// The version byte picks the decoder; the decoder's header then says how
/// many payload bytes follow. A peer that disconnects anywhere inside the
/// frame surfaces as [`ProtoError::ConnectionClosed`].
pub async fn read_packet<R>(registry: &PacketRegistry, reader: &mut R) -> Result<Packet, ProtoError>
where
    R: AsyncRead + Unpin,
{
    let mut version = [0u8; 1];
    read_exact_or_closed(reader, &mut version).await?;

    let codec = registry.get(version[0])?;
    let mut header = vec![0u8; codec.header_len()];
    header[0] = version[0];
    read_exact_or_closed(reader, &mut header[1..]).await?;

    let len = codec.payload_len(&header)?;
    let mut payload = BytesMut::zeroed(len);
    read_exact_or_closed(reader, &mut payload).await?;

    codec.assemble(&header, payload.freeze())
}

async fn read_exact_or_closed<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), ProtoError>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(ProtoError::ConnectionClosed),
        Err(e) => Err(ProtoError::Io(e)),
    }
}

pub async fn write_packet<W>(writer: &mut W, packet: &Packet) -> Result<(), ProtoError>
where
    W: AsyncWrite + Unpin,
{
    let frame = packet.encode()?;
    writer.write_all(&frame).await?;
    Ok(())
}

/// Decodes every complete frame at the front of `in_buf`.
///
/// Returns the packets and the number of bytes they consumed; a trailing
/// partial frame is left for the next call.
pub fn try_decode_frames(
    registry: &PacketRegistry,
    in_buf: &[u8],
) -> Result<(Vec<Packet>, usize), ProtoError> {
    let mut packets = Vec::new();
    let mut offset = 0usize;

    while let Some(&version) = in_buf.get(offset) {
        let codec = registry.get(version)?;
        let header_len = codec.header_len();
        let Some(header) = in_buf.get(offset..offset + header_len) else {
            break;
        };

        let total = header_len + codec.payload_len(header)?;
        let Some(frame) = in_buf.get(offset..offset + total) else {
            break;
        };

        let payload = Bytes::copy_from_slice(&frame[header_len..]);
        packets.push(codec.assemble(header, payload)?);
        offset += total;
    }

    Ok((packets, offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        constants::V1,
        messages::{ChatEvent, InitRequest},
        packet::{PacketType, PacketV1, Status},
    };
    use proptest::prelude::*;

    fn sample() -> Packet {
        PacketV1::request(&InitRequest {
            username: "bob".into(),
        })
        .unwrap()
        .into()
    }

    #[tokio::test]
    async fn read_packet_decodes_one_frame() {
        let registry = PacketRegistry::standard();
        let frame = sample().encode().unwrap();

        let mut reader = &frame[..];
        let packet = read_packet(&registry, &mut reader).await.unwrap();
        assert_eq!(packet, sample());
        assert!(reader.is_empty());
    }

    #[tokio::test]
    async fn truncated_frame_is_connection_closed() {
        let registry = PacketRegistry::standard();
        let frame = sample().encode().unwrap();

        for cut in [0, 1, 4, frame.len() - 1] {
            let mut reader = &frame[..cut];
            let err = read_packet(&registry, &mut reader).await.unwrap_err();
            assert!(err.is_connection_closed(), "cut at {cut}: {err}");
        }
    }

    #[tokio::test]
    async fn unknown_version_is_a_protocol_error() {
        let registry = PacketRegistry::standard();
        let mut reader: &[u8] = &[9, 0, 0, 0, 0];
        let err = read_packet(&registry, &mut reader).await.unwrap_err();
        assert!(matches!(err, ProtoError::UnknownVersion(9)));
        assert!(!err.is_connection_closed());
    }

    #[tokio::test]
    async fn write_packet_emits_the_encoded_frame() {
        let mut out = Vec::new();
        write_packet(&mut out, &sample()).await.unwrap();
        assert_eq!(out, sample().encode().unwrap());
        assert_eq!(out[0], V1);
    }

    #[test]
    fn try_decode_keeps_partial_tail() {
        let registry = PacketRegistry::standard();
        let second: Packet = PacketV1::response(
            Status::Success,
            &ChatEvent::UserJoin { user: "eve".into() },
        )
        .unwrap()
        .into();

        let mut buf = sample().encode().unwrap().to_vec();
        let first_len = buf.len();
        let second_frame = second.encode().unwrap();
        buf.extend_from_slice(&second_frame[..3]);

        let (packets, used) = try_decode_frames(&registry, &buf).unwrap();
        assert_eq!(packets, vec![sample()]);
        assert_eq!(used, first_len);

        buf.extend_from_slice(&second_frame[3..]);
        let (packets, used) = try_decode_frames(&registry, &buf).unwrap();
        assert_eq!(packets, vec![sample(), second]);
        assert_eq!(used, buf.len());
    }

    fn packet_strategy() -> impl Strategy<Value = PacketV1> {
        (
            0u8..3,
            0u8..2,
            proptest::collection::vec(any::<u8>(), 0..1024),
        )
            .prop_map(|(ty, status, data)| {
                PacketV1::new(
                    PacketType::from_repr(ty).unwrap(),
                    Status::from_repr(status).unwrap(),
                    data,
                )
                .unwrap()
            })
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(p in packet_strategy()) {
            let registry = PacketRegistry::standard();
            let packet = Packet::from(p);
            let frame = packet.encode().unwrap();

            let (decoded, used) = try_decode_frames(&registry, &frame).unwrap();
            prop_assert_eq!(used, frame.len());
            prop_assert_eq!(decoded, vec![packet]);
        }
    }
}
