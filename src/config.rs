//! Session configuration.
//!
//! [`SessionConfig`] can be built in code, through the fluent
//! [`SessionBuilder`](crate::SessionBuilder), or deserialized from any serde
//! format. Missing fields take their defaults.
//!
//! # Example
//!
//! ```
//! use sftpwire::SessionConfig;
//!
//! let config = SessionConfig {
//!     max_concurrent_chunks: 8,
//!     ..SessionConfig::default()
//! };
//! assert_eq!(config.read_buffer_size, 64 * 1024);
//! ```

use serde::Deserialize;

use crate::protocol::{FrameLimits, DEFAULT_LARGE_FRAME_THRESHOLD, DEFAULT_MAX_HEADER_SIZE};
use crate::sink::DEFAULT_MAX_CONCURRENT_CHUNKS;

/// Default size of one transport read.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Default number of finished replies allowed to wait for the transport.
pub const DEFAULT_MAX_PENDING_REPLIES: usize = 64;

/// Tunables for one session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Per-chunk units a body consumer may run at once.
    pub max_concurrent_chunks: usize,
    /// Bytes requested from the transport per read.
    pub read_buffer_size: usize,
    /// Unknown frames claiming more than this are discarded while streaming.
    pub large_frame_threshold: u32,
    /// Maximum bytes buffered to parse one packet header.
    pub max_header_size: u32,
    /// Transport reads pause while this many replies wait to be sent.
    pub max_pending_replies: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_chunks: DEFAULT_MAX_CONCURRENT_CHUNKS,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            large_frame_threshold: DEFAULT_LARGE_FRAME_THRESHOLD,
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
            max_pending_replies: DEFAULT_MAX_PENDING_REPLIES,
        }
    }
}

impl SessionConfig {
    /// Decoder limits derived from this configuration.
    pub fn frame_limits(&self) -> FrameLimits {
        FrameLimits {
            large_frame_threshold: self.large_frame_threshold,
            max_header_size: self.max_header_size,
        }
    }
}
