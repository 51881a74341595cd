//! Protocol module - wire format, framing, and frame parts.
//!
//! This module implements the length-prefixed framing layer:
//! - 5-byte frame prefix encoding/decoding
//! - Incremental decoder that streams bodies instead of buffering them
//! - Encoder that writes headers and passes body chunks through

mod decoder;
mod encoder;
mod frame;
mod wire_format;

pub use decoder::{FrameDecoder, FrameLimits};
pub use encoder::FrameEncoder;
pub use frame::{FramePart, Packet, PacketCodec, ParseOutcome, UnknownFrame};
pub use wire_format::{
    frame_length, packet_type, FrameHeader, DEFAULT_LARGE_FRAME_THRESHOLD,
    DEFAULT_MAX_HEADER_SIZE, FRAME_HEADER_SIZE, LENGTH_PREFIX_SIZE,
};
