//! Frame encoder: the inverse of [`FrameDecoder`](super::FrameDecoder).
//!
//! A header part is written as length prefix, type byte and serialized
//! header fields. The length prefix already accounts for the declared body,
//! so body chunks are passed through untouched and `BodyEnd` writes nothing.

use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};

use super::frame::{FramePart, Packet, PacketCodec};
use super::wire_format::{frame_length, FrameHeader, FRAME_HEADER_SIZE, LENGTH_PREFIX_SIZE};
use crate::error::Result;

/// Encoder from frame parts to transport bytes.
pub struct FrameEncoder<C: PacketCodec> {
    codec: Arc<C>,
}

impl<C: PacketCodec> Clone for FrameEncoder<C> {
    fn clone(&self) -> Self {
        Self {
            codec: Arc::clone(&self.codec),
        }
    }
}

impl<C: PacketCodec> FrameEncoder<C> {
    /// Create a new encoder.
    pub fn new(codec: Arc<C>) -> Self {
        Self { codec }
    }

    /// Append the encoded form of `part` to `dst`.
    pub fn encode(&self, part: FramePart<C::Packet>, dst: &mut BytesMut) -> Result<()> {
        match part {
            FramePart::Header {
                packet,
                body_length,
            } => self.encode_header(&packet, body_length, dst),
            FramePart::BodyChunk(chunk) => {
                dst.extend_from_slice(&chunk);
                Ok(())
            }
            FramePart::BodyEnd => Ok(()),
        }
    }

    /// Encode a packet header announcing `body_length` body bytes.
    ///
    /// On failure `dst` is left as it was.
    pub fn encode_header(
        &self,
        packet: &C::Packet,
        body_length: u32,
        dst: &mut BytesMut,
    ) -> Result<()> {
        let start = dst.len();
        dst.put_slice(&FrameHeader::new(0, packet.type_tag()).encode());

        let length = match self.codec.serialize(packet, dst) {
            Ok(()) => frame_length(dst.len() - start - FRAME_HEADER_SIZE, body_length),
            Err(err) => Err(err),
        };

        match length {
            Ok(length) => {
                dst[start..start + LENGTH_PREFIX_SIZE].copy_from_slice(&length.to_be_bytes());
                Ok(())
            }
            Err(err) => {
                dst.truncate(start);
                Err(err)
            }
        }
    }

    /// Encode `part` into its own buffer.
    ///
    /// Body chunks are returned as-is without copying.
    pub fn encode_to_bytes(&self, part: FramePart<C::Packet>) -> Result<Bytes> {
        match part {
            FramePart::BodyChunk(chunk) => Ok(chunk),
            FramePart::BodyEnd => Ok(Bytes::new()),
            FramePart::Header {
                packet,
                body_length,
            } => {
                let mut buf = BytesMut::with_capacity(64);
                self.encode_header(&packet, body_length, &mut buf)?;
                Ok(buf.freeze())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{RawCodec, RawPacket};
    use crate::error::SftpWireError;
    use crate::protocol::{packet_type, UnknownFrame};

    fn encoder() -> FrameEncoder<RawCodec> {
        FrameEncoder::new(Arc::new(RawCodec::sftp_v3()))
    }

    #[test]
    fn test_status_header() {
        let bytes = encoder()
            .encode_to_bytes(FramePart::header(RawPacket::new(101, vec![0, 0, 0, 1]), 0))
            .unwrap();
        assert_eq!(&bytes[..], &[0, 0, 0, 5, 101, 0, 0, 0, 1]);
    }

    #[test]
    fn test_length_covers_declared_body() {
        let encoder = encoder();
        let mut dst = BytesMut::new();
        let header = RawPacket::new(packet_type::DATA, vec![0, 0, 0, 9, 0, 0, 0, 3]);

        encoder.encode(FramePart::header(header, 3), &mut dst).unwrap();
        encoder
            .encode(FramePart::BodyChunk(Bytes::from_static(b"abc")), &mut dst)
            .unwrap();
        encoder.encode(FramePart::BodyEnd, &mut dst).unwrap();

        assert_eq!(&dst[..4], &12u32.to_be_bytes());
        assert_eq!(dst[4], packet_type::DATA);
        assert_eq!(&dst[13..], b"abc");
        assert_eq!(dst.len(), 16);
    }

    #[test]
    fn test_body_chunk_is_not_copied() {
        let chunk = Bytes::from(vec![1u8; 32]);
        let out = encoder()
            .encode_to_bytes(FramePart::BodyChunk(chunk.clone()))
            .unwrap();
        assert_eq!(out.as_ptr(), chunk.as_ptr());
    }

    #[test]
    fn test_failed_header_leaves_buffer_untouched() {
        let encoder = encoder();
        let mut dst = BytesMut::from(&b"prefix"[..]);

        let unknown = RawPacket::Unknown(UnknownFrame {
            type_tag: 77,
            length: 3,
        });
        let err = encoder
            .encode(FramePart::header(unknown, 0), &mut dst)
            .unwrap_err();
        assert!(matches!(err, SftpWireError::Serialize(_)));
        assert_eq!(&dst[..], b"prefix");

        let huge = RawPacket::new(packet_type::DATA, vec![0; 8]);
        let err = encoder
            .encode(FramePart::header(huge, u32::MAX), &mut dst)
            .unwrap_err();
        assert!(matches!(err, SftpWireError::FrameTooLarge(_)));
        assert_eq!(&dst[..], b"prefix");
    }
}
