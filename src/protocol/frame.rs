//! Frame parts and the packet seam.
//!
//! The framing layer never looks inside a packet. It needs a type tag from
//! each packet and a [`PacketCodec`] that knows, per type, whether a body
//! follows the header fields and how to turn header bytes into a packet.

use std::fmt;

use bytes::{Bytes, BytesMut};

use crate::error::Result;

/// An externally defined protocol packet.
pub trait Packet: fmt::Debug + Send + 'static {
    /// Wire type tag of this packet.
    fn type_tag(&self) -> u8;

    /// Whether this packet stands in for a skipped frame of unknown type.
    ///
    /// A diagnostic that no handler accepts is logged and dropped instead
    /// of ending the session.
    fn is_diagnostic(&self) -> bool {
        false
    }
}

/// One step of the decoded (or to-be-encoded) frame sequence.
///
/// A `Header` whose type carries a body is followed by zero or more
/// `BodyChunk`s and exactly one `BodyEnd` before the next `Header`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramePart<P> {
    /// Parsed packet plus the number of body bytes that follow it.
    Header { packet: P, body_length: u32 },
    /// A slice of the body, verbatim.
    BodyChunk(Bytes),
    /// The declared body length has been reached.
    BodyEnd,
}

impl<P> FramePart<P> {
    /// Shorthand for a header part.
    pub fn header(packet: P, body_length: u32) -> Self {
        Self::Header {
            packet,
            body_length,
        }
    }

    /// Check if this is a header.
    #[inline]
    pub fn is_header(&self) -> bool {
        matches!(self, Self::Header { .. })
    }
}

/// Result of asking a codec to parse header bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome<P> {
    /// Packet parsed from the first `consumed` bytes.
    Parsed { packet: P, consumed: usize },
    /// The header fields are not all buffered yet.
    NeedMoreData,
    /// The bytes can never form a valid packet.
    Invalid(String),
}

/// Description of a frame whose type tag the codec does not know.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownFrame {
    pub type_tag: u8,
    /// Length prefix as claimed on the wire.
    pub length: u32,
}

/// Per-protocol-version packet parser and serializer.
pub trait PacketCodec: Send + Sync + 'static {
    /// Packet type produced and consumed by this codec.
    type Packet: Packet;

    /// Whether `type_tag` names a packet this codec understands.
    fn is_known(&self, type_tag: u8) -> bool;

    /// Whether packets of this type are followed by a streamed body.
    fn has_body(&self, type_tag: u8) -> bool;

    /// Parse header fields from the start of `payload`.
    ///
    /// For body-carrying types `payload` holds whatever is buffered so far
    /// (never more than the frame); for other types it is the whole frame.
    fn parse(&self, type_tag: u8, payload: &[u8]) -> ParseOutcome<Self::Packet>;

    /// Append the header fields of `packet` (not its body) to `dst`.
    fn serialize(&self, packet: &Self::Packet, dst: &mut BytesMut) -> Result<()>;

    /// Build the diagnostic packet emitted in place of an unknown frame.
    fn unknown_frame(&self, frame: UnknownFrame) -> Self::Packet;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_part_helpers() {
        let header: FramePart<u8> = FramePart::header(7, 12);
        assert!(header.is_header());
        assert_eq!(
            header,
            FramePart::Header {
                packet: 7,
                body_length: 12
            }
        );

        let chunk: FramePart<u8> = FramePart::BodyChunk(Bytes::from_static(b"abc"));
        assert!(!chunk.is_header());
        assert!(!FramePart::<u8>::BodyEnd.is_header());
    }
}
