//! Transport module - byte streams a session can run on.
//!
//! A transport is anything that splits into an ordered read half and an
//! ordered write half:
//! - TCP streams
//! - Unix Domain Sockets (Unix only)
//! - In-memory duplex streams (tests, embedding)
//! - [`Stdio`], for running as a subsystem of an SSH server
//!
//! # Example
//!
//! ```no_run
//! use sftpwire::codec::RawCodec;
//! use sftpwire::handler::Router;
//! use sftpwire::Session;
//! use tokio::net::TcpListener;
//!
//! # async fn serve() -> sftpwire::Result<()> {
//! let session = Session::builder(RawCodec::sftp_v3(), Router::new()).build();
//! let listener = TcpListener::bind("127.0.0.1:2222").await?;
//! let (stream, _) = listener.accept().await?;
//! session.serve(stream).await
//! # }
//! ```

mod stdio;

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadHalf, WriteHalf};
use tokio::net::{tcp, TcpStream};

pub use stdio::Stdio;

/// A bidirectional byte stream that can be split into halves.
pub trait Transport: Send + 'static {
    /// Read half.
    type Reader: AsyncRead + Unpin + Send + 'static;
    /// Write half.
    type Writer: AsyncWrite + Unpin + Send + 'static;

    /// Split into independently owned halves.
    fn into_split(self) -> (Self::Reader, Self::Writer);
}

impl Transport for TcpStream {
    type Reader = tcp::OwnedReadHalf;
    type Writer = tcp::OwnedWriteHalf;

    fn into_split(self) -> (Self::Reader, Self::Writer) {
        TcpStream::into_split(self)
    }
}

#[cfg(unix)]
impl Transport for tokio::net::UnixStream {
    type Reader = tokio::net::unix::OwnedReadHalf;
    type Writer = tokio::net::unix::OwnedWriteHalf;

    fn into_split(self) -> (Self::Reader, Self::Writer) {
        tokio::net::UnixStream::into_split(self)
    }
}

impl Transport for DuplexStream {
    type Reader = ReadHalf<DuplexStream>;
    type Writer = WriteHalf<DuplexStream>;

    fn into_split(self) -> (Self::Reader, Self::Writer) {
        tokio::io::split(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_duplex_halves() {
        let (local, mut remote) = duplex(64);
        let (mut reader, mut writer) = Transport::into_split(local);

        writer.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        remote.write_all(b"pong").await.unwrap();
        reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unix_socket_halves() {
        let (local, mut remote) = tokio::net::UnixStream::pair().unwrap();
        let (_reader, mut writer) = Transport::into_split(local);

        writer.write_all(b"data").await.unwrap();
        let mut buf = [0u8; 4];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"data");
    }
}
