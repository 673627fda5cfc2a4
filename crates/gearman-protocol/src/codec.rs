use crate::packet::parse_header;
use crate::{Packet, ProtocolError, Result, HEADER_SIZE, MAX_PAYLOAD_SIZE};
use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Codec framing packets on a byte stream using the header's length field
///
/// Frame format: [4-byte code] [4-byte type (big-endian)] [4-byte length (big-endian)] [payload]
#[derive(Debug, Default, Clone, Copy)]
pub struct PacketCodec;

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        // A bad code or type can't be resynchronized, so fail before waiting on the payload
        let (code, packet_type, length) = parse_header(&src[..HEADER_SIZE])?;
        if length < 0 {
            return Err(ProtocolError::InvalidLength(length));
        }
        let length = length as usize;
        if length > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge(length));
        }

        // Wait for complete frame
        if src.len() < HEADER_SIZE + length {
            src.reserve(HEADER_SIZE + length - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let payload = src.split_to(length).freeze();

        Ok(Some(Packet::new(code, packet_type, payload)))
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<()> {
        item.write_to(dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Code, PacketType};
    use proptest::prelude::*;

    fn roundtrip(packet: Packet) -> Packet {
        let mut codec = PacketCodec;
        let mut buffer = BytesMut::new();
        codec.encode(packet, &mut buffer).unwrap();
        let decoded = codec.decode(&mut buffer).unwrap().unwrap();
        assert!(buffer.is_empty());
        decoded
    }

    #[test]
    fn test_codec_roundtrip_sizes() {
        for size in [0usize, 1, 70 * 1024] {
            let payload: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
            let packet = Packet::request(PacketType::WorkComplete, payload);
            assert_eq!(roundtrip(packet.clone()), packet);
        }
    }

    #[test]
    fn test_partial_frame() {
        let mut codec = PacketCodec;
        let mut buffer = BytesMut::new();

        let packet = Packet::request(PacketType::SubmitJob, &b"reverse\0id1\0hello"[..]);
        codec.encode(packet.clone(), &mut buffer).unwrap();

        // Header only, payload still missing
        let mut partial = BytesMut::from(&buffer[..HEADER_SIZE + 3]);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        // Short header
        let mut short = BytesMut::from(&buffer[..5]);
        assert!(codec.decode(&mut short).unwrap().is_none());

        partial.extend_from_slice(&buffer[HEADER_SIZE + 3..]);
        assert_eq!(codec.decode(&mut partial).unwrap(), Some(packet));
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut codec = PacketCodec;
        let mut buffer = BytesMut::new();

        let first = Packet::request(PacketType::CanDo, &b"reverse"[..]);
        let second = Packet::request(PacketType::PreSleep, Vec::new());
        codec.encode(first.clone(), &mut buffer).unwrap();
        codec.encode(second.clone(), &mut buffer).unwrap();

        assert_eq!(codec.decode(&mut buffer).unwrap(), Some(first));
        assert_eq!(codec.decode(&mut buffer).unwrap(), Some(second));
        assert!(codec.decode(&mut buffer).unwrap().is_none());
    }

    #[test]
    fn test_framing_errors() {
        let mut codec = PacketCodec;

        let mut bad_code = BytesMut::from(&b"\0FOO\0\0\0\x07\0\0\0\0"[..]);
        assert!(matches!(
            codec.decode(&mut bad_code),
            Err(ProtocolError::InvalidCode(_))
        ));

        let mut bad_type = BytesMut::from(&b"\0REQ\0\0\0\x63\0\0\0\0"[..]);
        assert!(matches!(
            codec.decode(&mut bad_type),
            Err(ProtocolError::InvalidPacketType(99))
        ));

        let mut negative = BytesMut::from(&b"\0REQ\0\0\0\x07\xff\xff\xff\xff"[..]);
        assert!(matches!(
            codec.decode(&mut negative),
            Err(ProtocolError::InvalidLength(-1))
        ));
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut codec = PacketCodec;
        let mut header = BytesMut::new();
        header.extend_from_slice(b"\0REQ");
        header.extend_from_slice(&PacketType::SubmitJob.as_i32().to_be_bytes());
        header.extend_from_slice(&((MAX_PAYLOAD_SIZE + 1) as i32).to_be_bytes());

        assert!(matches!(
            codec.decode(&mut header),
            Err(ProtocolError::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn test_oversized_packet_not_encoded() {
        let mut codec = PacketCodec;
        let mut buffer = BytesMut::new();
        let packet = Packet::request(PacketType::WorkData, vec![0u8; MAX_PAYLOAD_SIZE + 1]);

        assert!(matches!(
            codec.encode(packet, &mut buffer),
            Err(ProtocolError::PayloadTooLarge(_))
        ));
        assert!(buffer.is_empty());
    }

    fn any_packet_type() -> impl Strategy<Value = PacketType> {
        (1i32..=36).prop_filter_map("unassigned type", PacketType::from_i32)
    }

    proptest! {
        #[test]
        fn prop_codec_roundtrip(
            response in any::<bool>(),
            packet_type in any_packet_type(),
            payload in proptest::collection::vec(any::<u8>(), 0..512),
        ) {
            let code = if response { Code::Response } else { Code::Request };
            let packet = Packet::new(code, packet_type, payload);
            prop_assert_eq!(roundtrip(packet.clone()), packet.clone());
            prop_assert_eq!(Packet::from_bytes(&packet.to_bytes().unwrap()).unwrap(), packet);
        }
    }
}
