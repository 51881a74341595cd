//! Wire format encoding and decoding.
//!
//! Every packet travels as one length-prefixed frame:
//! ```text
//! ┌──────────────┬──────────┬──────────────────────┬──────────────────────┐
//! │ Length       │ Type     │ Header fields        │ Body (optional)      │
//! │ 4 bytes      │ 1 byte   │ parsed by the codec  │ streamed verbatim    │
//! │ uint32 BE    │          │                      │                      │
//! └──────────────┴──────────┴──────────────────────┴──────────────────────┘
//! ```
//!
//! `Length` counts the type byte, the header fields and the body. There is no
//! separate end marker: the length already tells where the body stops.

use crate::error::{Result, SftpWireError};

/// Size of the big-endian length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Length prefix plus type byte (fixed, exactly 5).
pub const FRAME_HEADER_SIZE: usize = 5;

/// Unknown frames claiming more than this are discarded as they stream in (256 KiB).
pub const DEFAULT_LARGE_FRAME_THRESHOLD: u32 = 256 * 1024;

/// Upper bound on bytes buffered to parse one packet header (256 KiB).
pub const DEFAULT_MAX_HEADER_SIZE: u32 = 256 * 1024;

/// SFTP v3 packet type tags.
pub mod packet_type {
    pub const INIT: u8 = 1;
    pub const VERSION: u8 = 2;
    pub const OPEN: u8 = 3;
    pub const CLOSE: u8 = 4;
    pub const READ: u8 = 5;
    /// Carries the written data as a streamed body.
    pub const WRITE: u8 = 6;
    pub const LSTAT: u8 = 7;
    pub const FSTAT: u8 = 8;
    pub const SETSTAT: u8 = 9;
    pub const FSETSTAT: u8 = 10;
    pub const OPENDIR: u8 = 11;
    pub const READDIR: u8 = 12;
    pub const REMOVE: u8 = 13;
    pub const MKDIR: u8 = 14;
    pub const RMDIR: u8 = 15;
    pub const REALPATH: u8 = 16;
    pub const STAT: u8 = 17;
    pub const RENAME: u8 = 18;
    pub const READLINK: u8 = 19;
    pub const SYMLINK: u8 = 20;
    pub const STATUS: u8 = 101;
    pub const HANDLE: u8 = 102;
    /// Carries the read data as a streamed body.
    pub const DATA: u8 = 103;
    pub const NAME: u8 = 104;
    pub const ATTRS: u8 = 105;
    pub const EXTENDED: u8 = 200;
    pub const EXTENDED_REPLY: u8 = 201;
}

/// Decoded frame prefix (length + type).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Bytes following the length prefix, type byte included.
    pub length: u32,
    /// Packet type tag.
    pub type_tag: u8,
}

impl FrameHeader {
    /// Create a new frame header.
    pub fn new(length: u32, type_tag: u8) -> Self {
        Self { length, type_tag }
    }

    /// Encode to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use sftpwire::protocol::FrameHeader;
    ///
    /// let bytes = FrameHeader::new(5, 101).encode();
    /// assert_eq!(bytes, [0, 0, 0, 5, 101]);
    /// ```
    pub fn encode(&self) -> [u8; FRAME_HEADER_SIZE] {
        let mut buf = [0u8; FRAME_HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.length.to_be_bytes());
        buf[4] = self.type_tag;
        buf
    }

    /// Decode from bytes.
    ///
    /// Returns `None` if fewer than 5 bytes are available.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < FRAME_HEADER_SIZE {
            return None;
        }
        Some(Self {
            length: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            type_tag: buf[4],
        })
    }

    /// Reject frames that cannot carry a type byte.
    pub fn validate(&self) -> Result<()> {
        if self.length == 0 {
            return Err(SftpWireError::InvalidFrame(
                "zero-length frame has no type byte".to_string(),
            ));
        }
        Ok(())
    }

    /// Bytes after the type byte (header fields + body).
    #[inline]
    pub fn payload_len(&self) -> u32 {
        self.length.saturating_sub(1)
    }
}

/// Compute the length prefix for a header payload plus a declared body.
///
/// Fails with `FrameTooLarge` when the total does not fit in 32 bits.
pub fn frame_length(payload_len: usize, body_length: u32) -> Result<u32> {
    let total = 1u64 + payload_len as u64 + u64::from(body_length);
    u32::try_from(total).map_err(|_| SftpWireError::FrameTooLarge(total))
}
