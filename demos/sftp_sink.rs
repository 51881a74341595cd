//! SFTP sink - accepts uploads and throws the data away.
//!
//! This example demonstrates:
//! - Serving a session on stdin/stdout, as an SSH subsystem does
//! - Routing packet types to handlers, with a fallback for the rest
//! - Draining WRITE bodies chunk by chunk under bounded concurrency
//!
//! Logs go to stderr; set `RUST_LOG=sftpwire=trace` to watch the frames.
//! Set `SFTPWIRE_CONFIG` to a JSON file to override the session settings:
//!
//! ```json
//! { "max_concurrent_chunks": 8, "read_buffer_size": 32768 }
//! ```
//!
//! # Running
//!
//! ```sh
//! cargo build --example sftp_sink
//! sftp -D ./target/debug/examples/sftp_sink
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use sftpwire::codec::{RawCodec, RawPacket};
use sftpwire::protocol::packet_type;
use sftpwire::{HandlerResult, Message, Router, Session, SessionConfig, SftpWireError};
use tracing_subscriber::EnvFilter;

const SFTP_VERSION: u32 = 3;
const SSH_FX_OK: u32 = 0;
const SSH_FX_OP_UNSUPPORTED: u32 = 8;

fn status(id: u32, code: u32) -> Message<RawPacket> {
    let mut header = Vec::with_capacity(8);
    header.extend_from_slice(&id.to_be_bytes());
    header.extend_from_slice(&code.to_be_bytes());
    Message::new(RawPacket::new(packet_type::STATUS, header), 0)
}

async fn init(_message: Message<RawPacket>) -> HandlerResult<RawPacket> {
    Ok(Message::new(
        RawPacket::new(packet_type::VERSION, SFTP_VERSION.to_be_bytes().to_vec()),
        0,
    ))
}

async fn unsupported(message: Message<RawPacket>) -> HandlerResult<RawPacket> {
    // Bodies must be drained before the reply, whatever the type.
    message.body().read_to_end().await?;
    let id = message.packet().request_id().unwrap_or(0);
    tracing::info!(type_tag = message.type_tag(), id, "unsupported request");
    Ok(status(id, SSH_FX_OP_UNSUPPORTED))
}

fn load_config() -> Result<SessionConfig, Box<dyn std::error::Error>> {
    match std::env::var_os("SFTPWIRE_CONFIG") {
        Some(path) => Ok(serde_json::from_slice(&std::fs::read(path)?)?),
        None => Ok(SessionConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // stdout carries frames; logs must stay on stderr
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let total = Arc::new(AtomicU64::new(0));
    let write = {
        let total = total.clone();
        move |message: Message<RawPacket>| {
            let total = total.clone();
            async move {
                let counted = total.clone();
                message
                    .body()
                    .attach_consumer(move |chunk: Bytes| {
                        counted.fetch_add(chunk.len() as u64, Ordering::Relaxed);
                        async { Ok::<_, SftpWireError>(()) }
                    })?
                    .await?;

                let id = message.packet().request_id().unwrap_or(0);
                tracing::debug!(
                    id,
                    bytes = message.body_length(),
                    total = total.load(Ordering::Relaxed),
                    "write drained"
                );
                Ok::<_, SftpWireError>(status(id, SSH_FX_OK))
            }
        }
    };

    let router = Router::new()
        .route(packet_type::INIT, init)
        .route(packet_type::WRITE, write)
        .fallback(unsupported);

    Session::builder(RawCodec::sftp_v3(), router)
        .config(load_config()?)
        .build()
        .serve_stdio()
        .await?;

    tracing::info!(total = total.load(Ordering::Relaxed), "session closed");
    Ok(())
}
