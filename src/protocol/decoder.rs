//! Incremental frame decoder.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management and turns the raw
//! transport byte stream into [`FramePart`]s:
//! - `AwaitingHeader`: need at least 5 bytes plus the packet header fields
//! - `ReadingBody`: header emitted, hand out body bytes as they arrive
//! - `Discarding`: oversized frame of unknown type, drop bytes as they arrive
//!
//! Body bytes are never accumulated: every call hands out whatever part of
//! the body is buffered, so memory stays bounded by one transport read.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use sftpwire::codec::RawCodec;
//! use sftpwire::protocol::{FrameDecoder, FramePart};
//!
//! let mut decoder = FrameDecoder::new(Arc::new(RawCodec::sftp_v3()));
//! let parts = decoder.push(&[0, 0, 0, 5, 101, 0, 0, 0, 1]).unwrap();
//!
//! assert_eq!(parts.len(), 1);
//! assert!(matches!(parts[0], FramePart::Header { body_length: 0, .. }));
//! ```

use std::sync::Arc;

use bytes::{Buf, BytesMut};

use super::frame::{FramePart, PacketCodec, ParseOutcome, UnknownFrame};
use super::wire_format::{
    FrameHeader, DEFAULT_LARGE_FRAME_THRESHOLD, DEFAULT_MAX_HEADER_SIZE, FRAME_HEADER_SIZE,
};
use crate::error::{Result, SftpWireError};

/// Size limits applied while decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    /// Unknown frames above this length are discarded while streaming.
    pub large_frame_threshold: u32,
    /// Maximum bytes buffered to parse one packet header.
    pub max_header_size: u32,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            large_frame_threshold: DEFAULT_LARGE_FRAME_THRESHOLD,
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitingHeader,
    ReadingBody { remaining: u32 },
    Discarding { remaining: u32 },
    /// Corrupted input was seen; nothing after it can be trusted.
    Poisoned,
}

/// Decoder from transport bytes to frame parts.
pub struct FrameDecoder<C: PacketCodec> {
    codec: Arc<C>,
    /// Bytes received but not yet handed out.
    buffer: BytesMut,
    state: State,
    limits: FrameLimits,
}

impl<C: PacketCodec> FrameDecoder<C> {
    /// Create a decoder with default limits.
    pub fn new(codec: Arc<C>) -> Self {
        Self::with_limits(codec, FrameLimits::default())
    }

    /// Create a decoder with custom limits.
    pub fn with_limits(codec: Arc<C>, limits: FrameLimits) -> Self {
        Self {
            codec,
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::AwaitingHeader,
            limits,
        }
    }

    /// Append transport bytes without decoding.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Append transport bytes and decode every part that is ready.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<FramePart<C::Packet>>> {
        self.extend(data);

        let mut parts = Vec::new();
        while let Some(part) = self.next_part()? {
            parts.push(part);
        }
        Ok(parts)
    }

    /// Decode the next frame part.
    ///
    /// Returns:
    /// - `Ok(Some(part))` when a part is ready
    /// - `Ok(None)` if more transport bytes are needed
    /// - `Err(InvalidFrame)` on corrupted input; every later call fails too
    pub fn next_part(&mut self) -> Result<Option<FramePart<C::Packet>>> {
        loop {
            match self.state {
                State::Poisoned => {
                    return Err(SftpWireError::InvalidFrame(
                        "decoder stopped after corrupted input".to_string(),
                    ));
                }
                State::Discarding { remaining } => {
                    let skipped = (remaining as usize).min(self.buffer.len());
                    self.buffer.advance(skipped);
                    let remaining = remaining - skipped as u32;
                    if remaining > 0 {
                        self.state = State::Discarding { remaining };
                        return Ok(None);
                    }
                    self.state = State::AwaitingHeader;
                }
                State::ReadingBody { remaining: 0 } => {
                    self.state = State::AwaitingHeader;
                    return Ok(Some(FramePart::BodyEnd));
                }
                State::ReadingBody { remaining } => {
                    if self.buffer.is_empty() {
                        return Ok(None);
                    }
                    let take = (remaining as usize).min(self.buffer.len());
                    let chunk = self.buffer.split_to(take).freeze();
                    self.state = State::ReadingBody {
                        remaining: remaining - take as u32,
                    };
                    return Ok(Some(FramePart::BodyChunk(chunk)));
                }
                State::AwaitingHeader => return self.decode_header(),
            }
        }
    }

    /// Whether the last header announced a body that has not ended yet.
    #[inline]
    pub fn is_reading_body(&self) -> bool {
        matches!(self.state, State::ReadingBody { .. })
    }

    /// True on a frame boundary with nothing buffered.
    pub fn is_idle(&self) -> bool {
        self.state == State::AwaitingHeader && self.buffer.is_empty()
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    fn decode_header(&mut self) -> Result<Option<FramePart<C::Packet>>> {
        let Some(frame) = FrameHeader::decode(&self.buffer) else {
            return Ok(None);
        };
        if let Err(err) = frame.validate() {
            return Err(self.poison(err));
        }

        let payload_len = frame.payload_len() as usize;
        let buffered = self.buffer.len() - FRAME_HEADER_SIZE;

        if !self.codec.is_known(frame.type_tag) {
            return Ok(self.skip_unknown(frame, buffered));
        }

        let has_body = self.codec.has_body(frame.type_tag);
        if !has_body && frame.payload_len() > self.limits.max_header_size {
            return Err(self.poison(SftpWireError::InvalidFrame(format!(
                "packet type {} claims {} bytes, limit is {}",
                frame.type_tag,
                payload_len,
                self.limits.max_header_size
            ))));
        }

        let available = payload_len.min(buffered);
        if !has_body && available < payload_len {
            return Ok(None);
        }

        let header_bytes = &self.buffer[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + available];
        match self.codec.parse(frame.type_tag, header_bytes) {
            ParseOutcome::NeedMoreData => {
                if available == payload_len || available >= self.limits.max_header_size as usize {
                    return Err(self.poison(SftpWireError::InvalidFrame(format!(
                        "packet type {} header does not fit its {}-byte frame",
                        frame.type_tag, frame.length
                    ))));
                }
                Ok(None)
            }
            ParseOutcome::Invalid(reason) => Err(self.poison(SftpWireError::InvalidFrame(
                format!("packet type {}: {}", frame.type_tag, reason),
            ))),
            ParseOutcome::Parsed { consumed, .. } if consumed > available => {
                Err(self.poison(SftpWireError::InvalidFrame(format!(
                    "packet type {} parser consumed {} of {} bytes",
                    frame.type_tag, consumed, available
                ))))
            }
            ParseOutcome::Parsed { packet, consumed } => {
                if has_body {
                    self.buffer.advance(FRAME_HEADER_SIZE + consumed);
                    let body_length = (payload_len - consumed) as u32;
                    self.state = State::ReadingBody {
                        remaining: body_length,
                    };
                    Ok(Some(FramePart::header(packet, body_length)))
                } else {
                    if consumed < available {
                        tracing::trace!(
                            type_tag = frame.type_tag,
                            trailing = available - consumed,
                            "ignoring trailing header bytes"
                        );
                    }
                    self.buffer.advance(FRAME_HEADER_SIZE + available);
                    Ok(Some(FramePart::header(packet, 0)))
                }
            }
        }
    }

    /// Step over a frame of unknown type and emit the codec's diagnostic.
    fn skip_unknown(&mut self, frame: FrameHeader, buffered: usize) -> Option<FramePart<C::Packet>> {
        let payload_len = frame.payload_len();

        if frame.length > self.limits.large_frame_threshold {
            tracing::warn!(
                type_tag = frame.type_tag,
                length = frame.length,
                "discarding oversized frame of unknown type"
            );
            self.buffer.advance(FRAME_HEADER_SIZE);
            self.state = State::Discarding {
                remaining: payload_len,
            };
        } else if buffered < payload_len as usize {
            return None;
        } else {
            tracing::warn!(
                type_tag = frame.type_tag,
                length = frame.length,
                "skipping frame of unknown type"
            );
            self.buffer.advance(FRAME_HEADER_SIZE + payload_len as usize);
        }

        let packet = self.codec.unknown_frame(UnknownFrame {
            type_tag: frame.type_tag,
            length: frame.length,
        });
        Some(FramePart::header(packet, 0))
    }

    fn poison(&mut self, err: SftpWireError) -> SftpWireError {
        tracing::debug!(error = %err, "corrupted frame, decoder stopped");
        self.state = State::Poisoned;
        self.buffer.clear();
        err
    }
}
