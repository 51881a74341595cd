//! Message: a decoded packet header paired with its body stream.

use crate::body::BodyStream;
use crate::protocol::Packet;
use crate::sink::DEFAULT_MAX_CONCURRENT_CHUNKS;

/// A packet plus exactly one body stream.
///
/// Inbound messages are built by the session when a header is decoded;
/// outbound messages are built by handlers as replies.
#[derive(Debug)]
pub struct Message<P> {
    packet: P,
    body_length: u32,
    body: BodyStream,
}

impl<P: Packet> Message<P> {
    /// Create a message declaring `body_length` body bytes.
    ///
    /// A zero-length body is already complete. Otherwise the caller pushes
    /// exactly `body_length` bytes into [`body`](Self::body) and completes it.
    pub fn new(packet: P, body_length: u32) -> Self {
        Self::with_concurrency(packet, body_length, DEFAULT_MAX_CONCURRENT_CHUNKS)
    }

    /// Create a message whose body consumer may run `max_concurrent` units.
    pub fn with_concurrency(packet: P, body_length: u32, max_concurrent: usize) -> Self {
        let body = if body_length == 0 {
            BodyStream::empty()
        } else {
            BodyStream::new(body_length, max_concurrent)
        };
        Self::from_parts(packet, body_length, body)
    }

    pub(crate) fn from_parts(packet: P, body_length: u32, body: BodyStream) -> Self {
        Self {
            packet,
            body_length,
            body,
        }
    }

    /// The header packet.
    #[inline]
    pub fn packet(&self) -> &P {
        &self.packet
    }

    /// Wire type tag of the header packet.
    #[inline]
    pub fn type_tag(&self) -> u8 {
        self.packet.type_tag()
    }

    /// Declared body length.
    #[inline]
    pub fn body_length(&self) -> u32 {
        self.body_length
    }

    /// The body stream (always present, possibly empty).
    #[inline]
    pub fn body(&self) -> &BodyStream {
        &self.body
    }

    /// Split into packet and body stream.
    pub fn into_parts(self) -> (P, BodyStream) {
        (self.packet, self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::RawPacket;
    use bytes::Bytes;

    #[test]
    fn test_bodyless_message_is_complete() {
        let message = Message::new(RawPacket::new(101, vec![0, 0, 0, 1]), 0);
        assert_eq!(message.type_tag(), 101);
        assert!(message.body().is_completed());
        assert!(message.body().can_accept_more());
    }

    #[test]
    fn test_body_message_waits_for_data() {
        let message = Message::new(RawPacket::new(103, vec![0; 8]), 3);
        assert_eq!(message.body().declared_length(), 3);
        assert!(!message.body().is_completed());

        message.body().push(Bytes::from_static(b"abc")).unwrap();
        message.body().complete().unwrap();

        let (packet, body) = message.into_parts();
        assert_eq!(packet.header(), &[0; 8]);
        assert_eq!(body.remaining(), 0);
    }
}
