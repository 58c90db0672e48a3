//! Wire format: the 12-byte packet header plus the frames it carries.
//!
//! Grounded in `webrtc-sctp::packet::Packet`'s unmarshal/marshal shape, with
//! the per-chunk-type dispatch replaced by `frame::Frame` (see that module).

pub mod frame;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::util::packet_checksum;
use frame::Frame;

pub(crate) const HEADER_SIZE: usize = 12;
pub(crate) const PROTOCOL_VERSION: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub version: u8,
    pub connection_id: u32,
    pub packet_id: u32,
    pub checksum: u32,
    pub frames: Vec<Frame>,
}

impl Packet {
    pub fn new(connection_id: u32, packet_id: u32, frames: Vec<Frame>) -> Self {
        let mut pkt = Packet {
            version: PROTOCOL_VERSION,
            connection_id,
            packet_id,
            checksum: 0,
            frames,
        };
        let raw = pkt.marshal();
        pkt.checksum = packet_checksum(&raw);
        pkt
    }

    pub fn serialized_len(&self) -> usize {
        HEADER_SIZE + self.frames.iter().map(Frame::serialized_len).sum::<usize>()
    }

    /// True iff any contained frame is neither `Ack` nor `Exit`.
    pub fn is_ack_eliciting(&self) -> bool {
        self.frames.iter().any(Frame::is_ack_eliciting)
    }

    pub fn marshal(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.serialized_len());
        buf.put_u8(self.version);
        buf.put_u32_le(self.connection_id);
        buf.put_u32_le(self.packet_id);
        // Checksum occupies 3 bytes; written zeroed here, patched below.
        buf.extend_from_slice(&[0u8, 0u8, 0u8]);
        for frame in &self.frames {
            frame.encode(&mut buf);
        }
        let checksum = packet_checksum(&buf);
        buf[9..12].copy_from_slice(&checksum.to_le_bytes()[..3]);
        buf.freeze()
    }

    /// Parses a datagram into a `Packet`. Any failure here — truncation,
    /// unknown frame type, bad `payload_length`, wrong version, or checksum
    /// mismatch — is reported so the caller (the `ConnectionManager`) can
    /// drop the datagram without touching any connection state.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw.len() < HEADER_SIZE {
            return Err(Error::PacketTooSmall);
        }
        let mut r = raw;
        let version = r.get_u8();
        if version != PROTOCOL_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }
        let connection_id = r.get_u32_le();
        let packet_id = r.get_u32_le();
        let mut checksum_bytes = [0u8; 4];
        checksum_bytes[..3].copy_from_slice(&r[..3]);
        let checksum = u32::from_le_bytes(checksum_bytes);
        r.advance(3);

        if packet_checksum(raw) != checksum {
            return Err(Error::ChecksumMismatch);
        }

        let mut frames = Vec::new();
        let mut offset = HEADER_SIZE;
        while offset < raw.len() {
            let (frame, consumed) = Frame::decode(&raw[offset..])?;
            offset += consumed;
            frames.push(frame);
        }

        Ok(Packet {
            version,
            connection_id,
            packet_id,
            checksum,
            frames,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_header_only() {
        let pkt = Packet::new(7, 1, vec![]);
        let raw = pkt.marshal();
        let parsed = Packet::parse(&raw).unwrap();
        assert_eq!(parsed, pkt);
    }

    #[test]
    fn roundtrip_with_frames() {
        let pkt = Packet::new(
            42,
            99,
            vec![
                Frame::Ack { packet_id: 3 },
                Frame::Data {
                    stream_id: 1,
                    offset: 0,
                    payload: Bytes::from_static(b"hello world"),
                },
            ],
        );
        let raw = pkt.marshal();
        let parsed = Packet::parse(&raw).unwrap();
        assert_eq!(parsed, pkt);
        assert!(parsed.is_ack_eliciting());
    }

    #[test]
    fn checksum_mismatch_is_detected() {
        let pkt = Packet::new(1, 1, vec![Frame::Exit]);
        let mut raw = pkt.marshal().to_vec();
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;
        assert_eq!(Packet::parse(&raw), Err(Error::ChecksumMismatch));
    }

    #[test]
    fn wrong_version_is_rejected() {
        let pkt = Packet::new(1, 1, vec![]);
        let mut raw = pkt.marshal().to_vec();
        raw[0] = 2;
        assert!(matches!(
            Packet::parse(&raw),
            Err(Error::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn too_small_is_rejected() {
        assert_eq!(Packet::parse(&[1, 2, 3]), Err(Error::PacketTooSmall));
    }
}
