//! Dedicated writer task for ordered, batched transport writes.
//!
//! Encoded frames are handed to a writer task over an mpsc channel. Enqueueing
//! is synchronous, so the order of `enqueue` calls is the order bytes hit the
//! transport. Each enqueue returns a [`WriteReceipt`] that resolves once the
//! buffer has been written and flushed.
//!
//! # Architecture
//!
//! ```text
//! Reply header ─┐
//! Body chunks  ─┼─► mpsc::UnboundedSender<OutboundFrame> ─► Writer Task ─► Transport
//! End marker   ─┘
//! ```
//!
//! Frames that are ready together are written with one vectored write.

use std::future::Future;
use std::io::{self, IoSlice};
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{Result, SftpWireError};

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// Encoded bytes waiting for the writer task.
#[derive(Debug)]
struct OutboundFrame {
    bytes: Bytes,
    ack: oneshot::Sender<Result<()>>,
}

/// Resolves once the enqueued bytes are written and flushed.
///
/// Resolves to `ConnectionClosed` if the writer task stopped first.
#[derive(Debug)]
#[must_use = "a receipt does nothing unless awaited"]
pub struct WriteReceipt {
    rx: oneshot::Receiver<Result<()>>,
}

impl Future for WriteReceipt {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|ack| ack.unwrap_or_else(|_| Err(SftpWireError::ConnectionClosed)))
    }
}

/// Handle for sending frames to the writer task.
///
/// This is cheaply cloneable.
#[derive(Debug, Clone)]
pub struct WriterHandle {
    tx: mpsc::UnboundedSender<OutboundFrame>,
}

impl WriterHandle {
    /// Queue bytes for writing.
    ///
    /// Empty buffers are not written but their receipt still resolves in
    /// order with the buffers around them.
    pub fn enqueue(&self, bytes: Bytes) -> WriteReceipt {
        let (ack, rx) = oneshot::channel();
        // On a stopped writer the ack is dropped and the receipt reports ConnectionClosed.
        let _ = self.tx.send(OutboundFrame { bytes, ack });
        WriteReceipt { rx }
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// The task ends with `Ok(())` once every handle is dropped and the queue
/// is written, or with the first I/O error.
pub fn spawn_writer_task<W>(writer: W) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(writer_loop(rx, writer));
    let handle = WriterHandle { tx };

    (handle, task)
}

/// Main writer loop - receives frames and writes them to the transport.
async fn writer_loop<W>(
    mut rx: mpsc::UnboundedReceiver<OutboundFrame>,
    mut writer: W,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);

    while let Some(first) = rx.recv().await {
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        let result = write_batch(&mut writer, &batch).await;

        match result {
            Ok(()) => {
                for frame in batch.drain(..) {
                    let _ = frame.ack.send(Ok(()));
                }
            }
            Err(err) => {
                tracing::debug!(error = %err, frames = batch.len(), "transport write failed");
                for frame in batch.drain(..) {
                    let copy = io::Error::new(err.kind(), err.to_string());
                    let _ = frame.ack.send(Err(SftpWireError::Io(copy)));
                }
                return Err(err.into());
            }
        }
    }

    Ok(())
}

/// Write a batch of frames using scatter/gather I/O (write_vectored).
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total_size: usize = batch.iter().map(|f| f.bytes.len()).sum();
    if total_size == 0 {
        return Ok(());
    }

    let mut total_written = 0;
    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            ));
        }
        total_written += written;
    }

    writer.flush().await
}

/// Build IoSlice array for the data after `skip_bytes`.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len());
    let mut start = 0;

    for frame in batch {
        let end = start + frame.bytes.len();
        if skip_bytes < end && !frame.bytes.is_empty() {
            let offset = skip_bytes.saturating_sub(start);
            slices.push(IoSlice::new(&frame.bytes[offset..]));
        }
        start = end;
    }

    slices
}
