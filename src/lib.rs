//! # sftpwire
//!
//! Streaming frame transport for SFTP-style file transfer sessions.
//!
//! This crate turns an ordered byte stream into typed packets with
//! streamed bodies, without ever buffering a whole body and without reading
//! from the transport faster than handlers consume.
//!
//! ## Architecture
//!
//! - **Frame codec** ([`protocol`]): bytes ⇄ `Header` / `BodyChunk` / `BodyEnd`
//! - **Body stream** ([`BodyStream`]): bounded chunk pipe reporting backpressure
//! - **Concurrency sink** ([`ConcurrencySink`]): at most N per-chunk units in flight
//! - **Session** ([`Session`]): per-connection loop, FIFO dispatch, ordered replies
//!
//! Packet layouts are pluggable through [`protocol::PacketCodec`];
//! [`codec::RawCodec`] ships an SFTP v3 table.
//!
//! ## Example
//!
//! ```ignore
//! use sftpwire::codec::{RawCodec, RawPacket};
//! use sftpwire::handler::Router;
//! use sftpwire::protocol::packet_type;
//! use sftpwire::{Message, Session};
//!
//! #[tokio::main]
//! async fn main() -> sftpwire::Result<()> {
//!     let router = Router::new().route(packet_type::WRITE, |msg: Message<RawPacket>| async move {
//!         let data = msg.body().read_to_end().await?;
//!         // ... store `data` ...
//!         let mut status = msg.packet().request_id().unwrap_or(0).to_be_bytes().to_vec();
//!         status.extend_from_slice(&0u32.to_be_bytes());
//!         Ok(Message::new(RawPacket::new(packet_type::STATUS, status), 0))
//!     });
//!
//!     Session::builder(RawCodec::sftp_v3(), router)
//!         .build()
//!         .serve_stdio()
//!         .await
//! }
//! ```

pub mod codec;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod transport;

mod body;
mod config;
mod message;
mod session;
mod sink;
mod writer;

pub use body::BodyStream;
pub use config::{SessionConfig, DEFAULT_MAX_PENDING_REPLIES, DEFAULT_READ_BUFFER_SIZE};
pub use error::{BodyFailure, Result, SftpWireError};
pub use handler::{Handler, HandlerResult, Router};
pub use message::Message;
pub use session::{Session, SessionBuilder};
pub use sink::{ConcurrencySink, DEFAULT_MAX_CONCURRENT_CHUNKS};
pub use writer::{spawn_writer_task, WriteReceipt, WriterHandle};
