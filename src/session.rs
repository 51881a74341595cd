//! Session builder and per-connection loop.
//!
//! The [`SessionBuilder`] provides a fluent API for configuring a session.
//! A [`Session`] serves one connection at a time per call to
//! [`run`](Session::run):
//! 1. Spawn the writer task on the write half
//! 2. Read transport bytes and decode them into frame parts
//! 3. Turn headers into messages and hand them to the handler in arrival order
//! 4. Route body chunks into the body stream of the message being received
//! 5. Send replies one after another, streaming their bodies
//!
//! Transport reads are governed by the consumer: while a message is being
//! handled, more bytes are read only when no later message is queued and the
//! current message's body stream reports capacity.
//!
//! # Example
//!
//! ```no_run
//! use sftpwire::codec::{RawCodec, RawPacket};
//! use sftpwire::handler::Router;
//! use sftpwire::protocol::packet_type;
//! use sftpwire::{Message, Session};
//!
//! #[tokio::main]
//! async fn main() -> sftpwire::Result<()> {
//!     let router = Router::new().route(packet_type::INIT, |_msg: Message<RawPacket>| async move {
//!         Ok(Message::new(RawPacket::new(packet_type::VERSION, vec![0, 0, 0, 3]), 0))
//!     });
//!
//!     Session::builder(RawCodec::sftp_v3(), router)
//!         .max_concurrent_chunks(8)
//!         .build()
//!         .serve_stdio()
//!         .await
//! }
//! ```

use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::watch;

use crate::body::BodyStream;
use crate::config::SessionConfig;
use crate::error::{Result, SftpWireError};
use crate::handler::{BoxFuture, Handler, HandlerResult};
use crate::message::Message;
use crate::protocol::{FrameDecoder, FrameEncoder, FramePart, Packet, PacketCodec};
use crate::transport::{Stdio, Transport};
use crate::writer::{spawn_writer_task, WriterHandle};

/// Builder for configuring and creating a [`Session`].
pub struct SessionBuilder<C, H> {
    codec: C,
    handler: H,
    config: SessionConfig,
}

impl<C, H> SessionBuilder<C, H>
where
    C: PacketCodec,
    H: Handler<C::Packet>,
{
    /// Create a new session builder.
    pub fn new(codec: C, handler: H) -> Self {
        Self {
            codec,
            handler,
            config: SessionConfig::default(),
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Set how many per-chunk units an inbound body consumer may run at once.
    ///
    /// Default: 4
    pub fn max_concurrent_chunks(mut self, limit: usize) -> Self {
        self.config.max_concurrent_chunks = limit;
        self
    }

    /// Set the transport read size.
    ///
    /// Default: 64 KiB
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size;
        self
    }

    /// Set the length above which unknown frames are discarded while streaming.
    ///
    /// Default: 256 KiB
    pub fn large_frame_threshold(mut self, length: u32) -> Self {
        self.config.large_frame_threshold = length;
        self
    }

    /// Set the maximum bytes buffered to parse one packet header.
    ///
    /// Default: 256 KiB
    pub fn max_header_size(mut self, size: u32) -> Self {
        self.config.max_header_size = size;
        self
    }

    /// Set how many finished replies may wait before reads pause.
    ///
    /// Default: 64
    pub fn max_pending_replies(mut self, limit: usize) -> Self {
        self.config.max_pending_replies = limit;
        self
    }

    /// Build the session.
    pub fn build(self) -> Session<C, H> {
        Session {
            codec: Arc::new(self.codec),
            handler: Arc::new(self.handler),
            config: self.config,
        }
    }
}

/// Serves connections with one codec and one handler.
///
/// Cloning is cheap; clones share the codec and handler.
pub struct Session<C, H> {
    codec: Arc<C>,
    handler: Arc<H>,
    config: SessionConfig,
}

impl<C, H> Clone for Session<C, H> {
    fn clone(&self) -> Self {
        Self {
            codec: Arc::clone(&self.codec),
            handler: Arc::clone(&self.handler),
            config: self.config.clone(),
        }
    }
}

impl<C, H> Session<C, H>
where
    C: PacketCodec,
    H: Handler<C::Packet>,
{
    /// Create a new session builder.
    pub fn builder(codec: C, handler: H) -> SessionBuilder<C, H> {
        SessionBuilder::new(codec, handler)
    }

    /// Get the session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Serve one connection on `transport`.
    pub async fn serve<T: Transport>(&self, transport: T) -> Result<()> {
        let (reader, writer) = transport.into_split();
        self.run(reader, writer).await
    }

    /// Serve one connection on the process's stdin and stdout.
    pub async fn serve_stdio(&self) -> Result<()> {
        self.serve(Stdio::new()).await
    }

    /// Serve one connection until the peer closes it or a fatal error occurs.
    ///
    /// A clean end of stream on a frame boundary finishes every queued
    /// message and pending reply, then returns `Ok(())`. Any fatal error
    /// aborts the live body streams, stops the writer and is returned.
    pub async fn run<R, W>(&self, mut reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (writer, writer_task) = spawn_writer_task(writer);
        let mut connection = Connection::new(self, writer);
        tracing::debug!("session started");

        match connection.drive(&mut reader).await {
            Ok(()) => {
                drop(connection);
                writer_task
                    .await
                    .map_err(|err| SftpWireError::Io(io::Error::new(io::ErrorKind::Other, err)))??;
                tracing::debug!("session finished");
                Ok(())
            }
            Err(err) => {
                connection.abort_bodies(&err);
                writer_task.abort();
                tracing::error!(error = %err, "session failed");
                Err(err)
            }
        }
    }
}

/// A message whose handler is running.
struct InFlight<P> {
    reply: BoxFuture<'static, HandlerResult<P>>,
    /// Capacity of the message's body stream.
    capacity: watch::Receiver<bool>,
    /// The message stands in for a skipped unknown frame.
    diagnostic: bool,
}

enum SessionState<P> {
    AwaitingHeader,
    ProcessingMessage {
        current: InFlight<P>,
        /// Messages fully headed but not yet handed to the handler.
        queue: VecDeque<Message<P>>,
        needs_deferred_read: bool,
        transport_may_push_body: bool,
    },
}

enum Event<P> {
    Read(io::Result<usize>),
    HandlerDone(HandlerResult<P>),
    ReplySent(Result<()>),
    Capacity,
    Idle,
}

/// State of one served connection.
struct Connection<'s, C: PacketCodec, H> {
    session: &'s Session<C, H>,
    decoder: FrameDecoder<C>,
    encoder: FrameEncoder<C>,
    writer: WriterHandle,
    state: SessionState<C::Packet>,
    /// Body stream receiving the frame currently being decoded.
    inbound_body: Option<BodyStream>,
    /// Replies waiting for the one being sent.
    replies: VecDeque<Message<C::Packet>>,
    sending: Option<BoxFuture<'static, Result<()>>>,
    sending_body: Option<BodyStream>,
    reader_closed: bool,
}

impl<'s, C, H> Connection<'s, C, H>
where
    C: PacketCodec,
    H: Handler<C::Packet>,
{
    fn new(session: &'s Session<C, H>, writer: WriterHandle) -> Self {
        Self {
            session,
            decoder: FrameDecoder::with_limits(
                Arc::clone(&session.codec),
                session.config.frame_limits(),
            ),
            encoder: FrameEncoder::new(Arc::clone(&session.codec)),
            writer,
            state: SessionState::AwaitingHeader,
            inbound_body: None,
            replies: VecDeque::new(),
            sending: None,
            sending_body: None,
            reader_closed: false,
        }
    }

    async fn drive<R: AsyncRead + Unpin>(&mut self, reader: &mut R) -> Result<()> {
        let mut buf = vec![0u8; self.session.config.read_buffer_size.max(1)];

        loop {
            match self.next_event(reader, &mut buf).await {
                Event::Read(Ok(0)) => self.on_eof()?,
                Event::Read(Ok(n)) => self.on_bytes(&buf[..n])?,
                Event::Read(Err(err)) => return Err(err.into()),
                Event::HandlerDone(result) => self.on_handler_done(result)?,
                Event::ReplySent(result) => {
                    self.sending = None;
                    self.sending_body = None;
                    result?;
                    self.start_next_reply();
                }
                Event::Capacity => self.on_capacity(),
                Event::Idle => return Ok(()),
            }
        }
    }

    async fn next_event<R: AsyncRead + Unpin>(
        &mut self,
        reader: &mut R,
        buf: &mut [u8],
    ) -> Event<C::Packet> {
        let wants_read = self.update_read_gate();

        let Connection { state, sending, .. } = self;
        let (reply, capacity, deferred) = match state {
            SessionState::AwaitingHeader => (None, None, false),
            SessionState::ProcessingMessage {
                current,
                queue,
                needs_deferred_read,
                ..
            } => (
                Some(&mut current.reply),
                Some(&mut current.capacity),
                *needs_deferred_read && queue.is_empty(),
            ),
        };
        let is_sending = sending.is_some();
        let is_handling = reply.is_some();

        tokio::select! {
            biased;

            result = poll_optional(sending.as_mut()), if is_sending => Event::ReplySent(result),
            result = poll_optional(reply), if is_handling => Event::HandlerDone(result),
            () = wait_for_capacity(capacity), if deferred => Event::Capacity,
            read = reader.read(buf), if wants_read => Event::Read(read),
            else => Event::Idle,
        }
    }

    /// Decide whether the transport may be read, recording why not.
    fn update_read_gate(&mut self) -> bool {
        if self.reader_closed {
            return false;
        }
        if self.replies.len() >= self.session.config.max_pending_replies.max(1) {
            return false;
        }

        match &mut self.state {
            SessionState::AwaitingHeader => true,
            SessionState::ProcessingMessage {
                current,
                queue,
                needs_deferred_read,
                transport_may_push_body,
            } => {
                *transport_may_push_body = *current.capacity.borrow_and_update();
                let may_read = *transport_may_push_body && queue.is_empty();
                *needs_deferred_read = !may_read;
                may_read
            }
        }
    }

    fn on_capacity(&mut self) {
        if let SessionState::ProcessingMessage {
            needs_deferred_read,
            transport_may_push_body,
            ..
        } = &mut self.state
        {
            tracing::trace!("body stream has capacity, resuming reads");
            *needs_deferred_read = false;
            *transport_may_push_body = true;
        }
    }

    fn on_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.decoder.extend(data);
        while let Some(part) = self.decoder.next_part()? {
            self.on_part(part)?;
        }
        Ok(())
    }

    fn on_part(&mut self, part: FramePart<C::Packet>) -> Result<()> {
        match part {
            FramePart::Header {
                packet,
                body_length,
            } => {
                let message = Message::with_concurrency(
                    packet,
                    body_length,
                    self.session.config.max_concurrent_chunks,
                );
                tracing::trace!(type_tag = message.type_tag(), body_length, "header received");
                if self.decoder.is_reading_body() {
                    self.inbound_body = Some(message.body().clone());
                }

                if let SessionState::ProcessingMessage { queue, .. } = &mut self.state {
                    queue.push_back(message);
                } else {
                    let current = self.dispatch(message);
                    self.state = SessionState::ProcessingMessage {
                        current,
                        queue: VecDeque::new(),
                        needs_deferred_read: false,
                        transport_may_push_body: false,
                    };
                }
            }
            FramePart::BodyChunk(chunk) => {
                let body = self.body_target()?;
                if let Err(err) = body.push(chunk) {
                    tracing::debug!(error = %err, "dropping body chunk");
                }
            }
            FramePart::BodyEnd => {
                let body = self.body_target()?;
                self.inbound_body = None;
                if let Err(err) = body.complete() {
                    tracing::debug!(error = %err, "body ended in failed stream");
                }
            }
        }
        Ok(())
    }

    fn body_target(&self) -> Result<BodyStream> {
        if matches!(self.state, SessionState::AwaitingHeader) {
            return Err(SftpWireError::UnexpectedFramePart(
                "body data while awaiting a header",
            ));
        }
        self.inbound_body
            .clone()
            .ok_or(SftpWireError::UnexpectedFramePart("body data without an open body"))
    }

    fn dispatch(&self, message: Message<C::Packet>) -> InFlight<C::Packet> {
        tracing::debug!(type_tag = message.type_tag(), "dispatching message");
        InFlight {
            capacity: message.body().capacity(),
            diagnostic: message.packet().is_diagnostic(),
            reply: self.session.handler.handle(message),
        }
    }

    fn on_handler_done(&mut self, result: HandlerResult<C::Packet>) -> Result<()> {
        let (diagnostic, queue_empty) = match &self.state {
            SessionState::ProcessingMessage { current, queue, .. } => {
                (current.diagnostic, queue.is_empty())
            }
            SessionState::AwaitingHeader => (false, true),
        };

        match result {
            Ok(reply) => {
                self.replies.push_back(reply);
                self.start_next_reply();
            }
            Err(SftpWireError::HandlerNotFound(type_tag)) if diagnostic => {
                tracing::warn!(type_tag, "no handler for unknown frame, dropping it");
            }
            Err(err) => return Err(err),
        }

        if queue_empty && self.inbound_body.is_some() {
            tracing::warn!(
                "handler finished before its body ended; further body data is a protocol error"
            );
        }

        let state = std::mem::replace(&mut self.state, SessionState::AwaitingHeader);
        if let SessionState::ProcessingMessage { mut queue, .. } = state {
            if let Some(next) = queue.pop_front() {
                let current = self.dispatch(next);
                self.state = SessionState::ProcessingMessage {
                    current,
                    queue,
                    needs_deferred_read: false,
                    transport_may_push_body: false,
                };
            }
        }
        Ok(())
    }

    fn start_next_reply(&mut self) {
        if self.sending.is_some() {
            return;
        }
        if let Some(reply) = self.replies.pop_front() {
            self.sending_body = Some(reply.body().clone());
            self.sending = Some(send_reply(
                self.encoder.clone(),
                self.writer.clone(),
                reply,
            ));
        }
    }

    fn on_eof(&mut self) -> Result<()> {
        self.reader_closed = true;
        if self.decoder.is_idle() {
            tracing::debug!("transport closed, finishing pending work");
            return Ok(());
        }
        tracing::debug!(buffered = self.decoder.len(), "transport closed inside a frame");
        Err(SftpWireError::ConnectionClosed)
    }

    fn abort_bodies(&self, err: &SftpWireError) {
        let reason = err.to_string();
        let queued = match &self.state {
            SessionState::ProcessingMessage { queue, .. } => Some(queue),
            SessionState::AwaitingHeader => None,
        };

        let bodies = self
            .inbound_body
            .iter()
            .chain(self.sending_body.iter())
            .chain(self.replies.iter().map(|reply| reply.body()))
            .chain(queued.into_iter().flatten().map(|message| message.body()));
        for body in bodies {
            body.abort(reason.clone());
        }
    }
}

/// Write one reply: header, body chunks as the body yields them, end marker.
///
/// Resolves once every piece has been written.
fn send_reply<C: PacketCodec>(
    encoder: FrameEncoder<C>,
    writer: WriterHandle,
    reply: Message<C::Packet>,
) -> BoxFuture<'static, Result<()>> {
    Box::pin(async move {
        let body_length = reply.body_length();
        let (packet, body) = reply.into_parts();
        tracing::trace!(body_length, "sending reply");

        let header = encoder.encode_to_bytes(FramePart::header(packet, body_length))?;
        let header_sent = writer.enqueue(header);

        if body_length > 0 {
            // Chunks encode to themselves; each unit is one write receipt.
            let chunk_writer = writer.clone();
            body.attach_consumer(move |chunk| chunk_writer.enqueue(chunk))?
                .await?;
        }

        let end_sent = writer.enqueue(encoder.encode_to_bytes(FramePart::BodyEnd)?);
        header_sent.await?;
        end_sent.await
    })
}

async fn poll_optional<F>(future: Option<&mut F>) -> F::Output
where
    F: Future + Unpin,
{
    match future {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}

async fn wait_for_capacity(capacity: Option<&mut watch::Receiver<bool>>) {
    if let Some(capacity) = capacity {
        if capacity.wait_for(|can_accept| *can_accept).await.is_ok() {
            return;
        }
    }
    std::future::pending::<()>().await
}
