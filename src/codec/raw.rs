//! Raw codec - header fields kept as opaque bytes.
//!
//! The codec only needs to know where each packet's header fields end.
//! Everything after that point (for body-carrying types) is streamed.
//!
//! # Example
//!
//! ```
//! use sftpwire::codec::{HeaderLength, Layout, RawCodec};
//! use sftpwire::protocol::PacketCodec;
//!
//! // Custom protocol: type 1 has no body, type 2 has a 4-byte header then data.
//! let codec = RawCodec::new()
//!     .with_type(1, Layout::Whole)
//!     .with_type(2, Layout::Body(HeaderLength::Fixed(4)));
//!
//! assert!(codec.is_known(1));
//! assert!(codec.has_body(2));
//! assert!(!codec.is_known(3));
//! ```

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};

use crate::error::{Result, SftpWireError};
use crate::protocol::{packet_type, Packet, PacketCodec, ParseOutcome, UnknownFrame};

/// Packet with opaque header bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawPacket {
    /// A packet of a known type.
    Frame { type_tag: u8, header: Bytes },
    /// Diagnostic emitted in place of a frame of unknown type.
    Unknown(UnknownFrame),
}

impl RawPacket {
    /// Create a packet from its type tag and header bytes.
    pub fn new(type_tag: u8, header: impl Into<Bytes>) -> Self {
        Self::Frame {
            type_tag,
            header: header.into(),
        }
    }

    /// Header bytes (empty for unknown-frame diagnostics).
    pub fn header(&self) -> &[u8] {
        match self {
            Self::Frame { header, .. } => header,
            Self::Unknown(_) => &[],
        }
    }

    /// Leading big-endian request id, as carried by every SFTP packet
    /// except INIT and VERSION.
    pub fn request_id(&self) -> Option<u32> {
        let bytes = self.header().get(..4)?;
        Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Check if this is an unknown-frame diagnostic.
    #[inline]
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown(_))
    }
}

impl Packet for RawPacket {
    fn type_tag(&self) -> u8 {
        match self {
            Self::Frame { type_tag, .. } => *type_tag,
            Self::Unknown(frame) => frame.type_tag,
        }
    }

    fn is_diagnostic(&self) -> bool {
        self.is_unknown()
    }
}

/// How a packet type is laid out after the type byte.
#[derive(Debug, Clone, Copy)]
pub enum Layout {
    /// The whole payload is header fields; no body.
    Whole,
    /// Header fields of the given length, then a streamed body.
    Body(HeaderLength),
}

/// Length of the header fields of a body-carrying type.
#[derive(Debug, Clone, Copy)]
pub enum HeaderLength {
    /// Always this many bytes.
    Fixed(usize),
    /// Computed from the buffered bytes; `None` until enough are buffered.
    Scan(fn(&[u8]) -> Option<usize>),
}

/// Codec that splits frames by a per-type [`Layout`] table.
#[derive(Debug, Clone, Default)]
pub struct RawCodec {
    layouts: HashMap<u8, Layout>,
}

impl RawCodec {
    /// Create a codec that knows no packet types.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the layout of a packet type.
    pub fn with_type(mut self, type_tag: u8, layout: Layout) -> Self {
        self.layouts.insert(type_tag, layout);
        self
    }

    /// SFTP version 3 packet table.
    ///
    /// WRITE streams its data as the body after `id, handle, offset, length`.
    /// DATA streams its data after `id, length`. Every other type is header only.
    pub fn sftp_v3() -> Self {
        use packet_type::*;

        let whole = [
            INIT, VERSION, OPEN, CLOSE, READ, LSTAT, FSTAT, SETSTAT, FSETSTAT, OPENDIR, READDIR,
            REMOVE, MKDIR, RMDIR, REALPATH, STAT, RENAME, READLINK, SYMLINK, STATUS, HANDLE,
            NAME, ATTRS, EXTENDED, EXTENDED_REPLY,
        ];

        whole
            .into_iter()
            .fold(Self::new(), |codec, tag| codec.with_type(tag, Layout::Whole))
            .with_type(WRITE, Layout::Body(HeaderLength::Scan(write_header_len)))
            .with_type(DATA, Layout::Body(HeaderLength::Fixed(8)))
    }
}

/// WRITE header: uint32 id, string handle, uint64 offset, uint32 data length.
fn write_header_len(payload: &[u8]) -> Option<usize> {
    let handle = payload.get(4..8)?;
    let handle_len = u32::from_be_bytes([handle[0], handle[1], handle[2], handle[3]]) as usize;
    let len = 4 + 4 + handle_len + 8 + 4;
    (payload.len() >= len).then_some(len)
}

impl PacketCodec for RawCodec {
    type Packet = RawPacket;

    fn is_known(&self, type_tag: u8) -> bool {
        self.layouts.contains_key(&type_tag)
    }

    fn has_body(&self, type_tag: u8) -> bool {
        matches!(self.layouts.get(&type_tag), Some(Layout::Body(_)))
    }

    fn parse(&self, type_tag: u8, payload: &[u8]) -> ParseOutcome<RawPacket> {
        let consumed = match self.layouts.get(&type_tag) {
            None => return ParseOutcome::Invalid(format!("no layout for packet type {type_tag}")),
            Some(Layout::Whole) => payload.len(),
            Some(Layout::Body(HeaderLength::Fixed(len))) if payload.len() >= *len => *len,
            Some(Layout::Body(HeaderLength::Scan(scan))) => match scan(payload) {
                Some(len) if len <= payload.len() => len,
                _ => return ParseOutcome::NeedMoreData,
            },
            Some(Layout::Body(HeaderLength::Fixed(_))) => return ParseOutcome::NeedMoreData,
        };

        ParseOutcome::Parsed {
            packet: RawPacket::new(type_tag, Bytes::copy_from_slice(&payload[..consumed])),
            consumed,
        }
    }

    fn serialize(&self, packet: &RawPacket, dst: &mut BytesMut) -> Result<()> {
        match packet {
            RawPacket::Frame { header, .. } => {
                dst.extend_from_slice(header);
                Ok(())
            }
            RawPacket::Unknown(frame) => Err(SftpWireError::Serialize(format!(
                "unknown-frame diagnostic for type {} cannot be sent",
                frame.type_tag
            ))),
        }
    }

    fn unknown_frame(&self, frame: UnknownFrame) -> RawPacket {
        RawPacket::Unknown(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_payload(handle: &[u8], data_len: u32) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&1u32.to_be_bytes());
        payload.extend_from_slice(&(handle.len() as u32).to_be_bytes());
        payload.extend_from_slice(handle);
        payload.extend_from_slice(&0u64.to_be_bytes());
        payload.extend_from_slice(&data_len.to_be_bytes());
        payload
    }

    #[test]
    fn test_sftp_v3_table() {
        let codec = RawCodec::sftp_v3();
        assert!(codec.is_known(packet_type::INIT));
        assert!(codec.is_known(packet_type::EXTENDED_REPLY));
        assert!(!codec.is_known(0));
        assert!(!codec.is_known(99));

        assert!(codec.has_body(packet_type::WRITE));
        assert!(codec.has_body(packet_type::DATA));
        assert!(!codec.has_body(packet_type::READ));
    }

    #[test]
    fn test_write_header_scanned() {
        let codec = RawCodec::sftp_v3();
        let mut payload = write_payload(b"h1", 5);
        let header_len = payload.len();
        payload.extend_from_slice(b"hello");

        match codec.parse(packet_type::WRITE, &payload) {
            ParseOutcome::Parsed { packet, consumed } => {
                assert_eq!(consumed, header_len);
                assert_eq!(packet.header(), &payload[..header_len]);
                assert_eq!(packet.request_id(), Some(1));
            }
            other => panic!("expected parsed packet, got {other:?}"),
        }

        // Handle not fully buffered yet.
        assert_eq!(
            codec.parse(packet_type::WRITE, &payload[..9]),
            ParseOutcome::NeedMoreData
        );
    }

    #[test]
    fn test_data_header_fixed() {
        let codec = RawCodec::sftp_v3();
        assert_eq!(
            codec.parse(packet_type::DATA, &[0, 0, 0, 2, 0, 0]),
            ParseOutcome::NeedMoreData
        );

        let outcome = codec.parse(packet_type::DATA, &[0, 0, 0, 2, 0, 0, 0, 4, 0xFF]);
        assert!(matches!(outcome, ParseOutcome::Parsed { consumed: 8, .. }));
    }

    #[test]
    fn test_unknown_packet() {
        let codec = RawCodec::sftp_v3();
        let packet = codec.unknown_frame(UnknownFrame {
            type_tag: 77,
            length: 10,
        });

        assert!(packet.is_unknown());
        assert!(packet.is_diagnostic());
        assert!(!RawPacket::new(packet_type::STAT, vec![0; 4]).is_diagnostic());
        assert_eq!(packet.type_tag(), 77);
        assert_eq!(packet.request_id(), None);

        let mut dst = BytesMut::new();
        assert!(codec.serialize(&packet, &mut dst).is_err());
        assert!(matches!(
            codec.parse(77, &[]),
            ParseOutcome::Invalid(_)
        ));
    }

    #[test]
    fn test_serialize_copies_header() {
        let codec = RawCodec::sftp_v3();
        let mut dst = BytesMut::new();
        codec
            .serialize(&RawPacket::new(101, vec![0, 0, 0, 1]), &mut dst)
            .unwrap();
        assert_eq!(&dst[..], &[0, 0, 0, 1]);
    }
}
