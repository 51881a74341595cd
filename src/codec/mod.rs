//! Codec module - packet header parsing and serialization.
//!
//! - [`RawCodec`] - keeps header fields as opaque bytes, one [`Layout`] per type
//!
//! # Design
//!
//! Any type implementing [`PacketCodec`](crate::protocol::PacketCodec) can drive
//! a session. `RawCodec` covers the common case where handlers decode the
//! header fields themselves and the framing layer only has to know where the
//! header ends and the body begins.
//!
//! # Example
//!
//! ```
//! use sftpwire::codec::{RawCodec, RawPacket};
//! use sftpwire::protocol::{packet_type, PacketCodec, ParseOutcome};
//!
//! let codec = RawCodec::sftp_v3();
//! assert!(codec.has_body(packet_type::WRITE));
//! assert!(!codec.has_body(packet_type::STATUS));
//!
//! let outcome = codec.parse(packet_type::STATUS, &[0, 0, 0, 1]);
//! assert_eq!(
//!     outcome,
//!     ParseOutcome::Parsed { packet: RawPacket::new(101, vec![0, 0, 0, 1]), consumed: 4 }
//! );
//! ```

mod raw;

pub use raw::{HeaderLength, Layout, RawCodec, RawPacket};
