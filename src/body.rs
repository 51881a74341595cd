//! Body stream: a bounded, backpressure-reporting chunk pipe.
//!
//! Every [`Message`](crate::Message) owns one body stream. Inbound, the
//! session pushes body chunks as the decoder produces them and the handler
//! consumes them. Outbound, the handler pushes reply chunks and the session
//! consumes them onto the transport.
//!
//! The producer side is synchronous (`push`, `complete`, `abort`). The
//! consumer side is a future returned by [`BodyStream::attach_consumer`]
//! that drains queued chunks through a [`ConcurrencySink`]. Whether the
//! stream can take more data is published on a `watch` channel so a
//! producer can wait for capacity instead of polling.
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use sftpwire::BodyStream;
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let body = BodyStream::new(4, 2);
//! body.push(Bytes::from_static(&[1])).unwrap();
//! body.push(Bytes::from_static(&[2, 3, 4])).unwrap();
//! body.complete().unwrap();
//!
//! let data = body.read_to_end().await.unwrap();
//! assert_eq!(&data[..], &[1, 2, 3, 4]);
//! # });
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

use bytes::{Bytes, BytesMut};
use futures::Stream;
use tokio::sync::watch;

use crate::error::{BodyFailure, Result, SftpWireError};
use crate::handler::BoxFuture;
use crate::sink::ConcurrencySink;

struct BodyState {
    queued: VecDeque<Bytes>,
    /// Declared bytes not yet pushed.
    remaining: u32,
    completed: bool,
    failure: Option<BodyFailure>,
    consumer_attached: bool,
    /// Units started by the consumer and not yet finished.
    outstanding: usize,
    waker: Option<Waker>,
}

struct Shared {
    declared: u32,
    max_concurrent: usize,
    state: Mutex<BodyState>,
    capacity: watch::Sender<bool>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, BodyState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Recompute the capacity flag and wake the consumer if requested.
    ///
    /// Takes the guard so the waker runs after the lock is released.
    fn publish(&self, mut state: MutexGuard<'_, BodyState>, wake: bool) {
        // Nothing drains an open stream before its consumer attaches.
        let can_accept = (state.consumer_attached || state.completed)
            && state.outstanding < self.max_concurrent
            && state.queued.is_empty();
        let waker = if wake { state.waker.take() } else { None };
        drop(state);

        self.capacity.send_if_modified(|current| {
            let changed = *current != can_accept;
            *current = can_accept;
            changed
        });
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    fn fail(&self, mut state: MutexGuard<'_, BodyState>, failure: BodyFailure) {
        if state.failure.is_none() {
            state.failure = Some(failure);
        }
        state.completed = true;
        state.queued.clear();
        self.publish(state, true);
    }

    fn set_outstanding(&self, outstanding: usize) {
        let mut state = self.lock();
        state.outstanding = outstanding;
        self.publish(state, false);
    }
}

/// Flow-controlled chunk pipe carrying a message body.
///
/// Cloning yields another handle to the same stream.
#[derive(Clone)]
pub struct BodyStream {
    shared: Arc<Shared>,
}

impl BodyStream {
    /// Create an open stream expecting exactly `declared_length` bytes.
    ///
    /// The capacity flag starts out `false`: nothing drains the stream
    /// until a consumer is attached.
    pub fn new(declared_length: u32, max_concurrent: usize) -> Self {
        Self::build(declared_length, max_concurrent, false)
    }

    /// Create an already-completed stream with no body.
    pub fn empty() -> Self {
        Self::build(0, 1, true)
    }

    fn build(declared: u32, max_concurrent: usize, completed: bool) -> Self {
        let (capacity, _) = watch::channel(completed);
        Self {
            shared: Arc::new(Shared {
                declared,
                max_concurrent: max_concurrent.max(1),
                state: Mutex::new(BodyState {
                    queued: VecDeque::new(),
                    remaining: declared,
                    completed,
                    failure: None,
                    consumer_attached: false,
                    outstanding: 0,
                    waker: None,
                }),
                capacity,
            }),
        }
    }

    /// Queue a chunk for the consumer.
    ///
    /// Fails with [`BodyFailure::Overflow`] if the chunk would take the body
    /// past its declared length. The stream is then failed: queued chunks are
    /// dropped and the consumer sees the overflow instead of more data.
    pub fn push(&self, chunk: Bytes) -> Result<()> {
        let mut state = self.shared.lock();
        if let Some(failure) = &state.failure {
            return Err(failure.clone().into());
        }
        if state.completed {
            return Err(SftpWireError::BodyClosed);
        }
        if chunk.is_empty() {
            return Ok(());
        }

        let len = chunk.len() as u64;
        if len > u64::from(state.remaining) {
            let failure = BodyFailure::Overflow {
                declared: self.shared.declared,
                received: u64::from(self.shared.declared - state.remaining) + len,
            };
            tracing::debug!(%failure, "body stream overflow");
            self.shared.fail(state, failure.clone());
            return Err(failure.into());
        }

        state.remaining -= len as u32;
        state.queued.push_back(chunk);
        self.shared.publish(state, true);
        Ok(())
    }

    /// Mark the end of the body.
    ///
    /// Fails with [`BodyFailure::Underflow`] if fewer bytes than declared
    /// were pushed. Completing twice is a no-op.
    pub fn complete(&self) -> Result<()> {
        let mut state = self.shared.lock();
        if let Some(failure) = &state.failure {
            return Err(failure.clone().into());
        }
        if state.completed {
            return Ok(());
        }
        if state.remaining > 0 {
            let failure = BodyFailure::Underflow {
                declared: self.shared.declared,
                missing: state.remaining,
            };
            self.shared.fail(state, failure.clone());
            return Err(failure.into());
        }

        state.completed = true;
        self.shared.publish(state, true);
        Ok(())
    }

    /// Tear the stream down unless it already completed.
    pub fn abort(&self, reason: impl Into<String>) {
        let state = self.shared.lock();
        if state.completed {
            return;
        }
        self.shared.fail(state, BodyFailure::Aborted(reason.into()));
    }

    /// Attach the one consumer of this stream.
    ///
    /// `handler` is called once per chunk, in push order, with at most
    /// `max_concurrent` returned futures outstanding. The returned future
    /// drives the consumer: it resolves once the stream has completed and
    /// every unit has finished, or with the first failure.
    pub fn attach_consumer<H, Fut>(&self, handler: H) -> Result<BoxFuture<'static, Result<()>>>
    where
        H: FnMut(Bytes) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        {
            let mut state = self.shared.lock();
            if state.consumer_attached {
                return Err(SftpWireError::ConsumerAlreadyAttached);
            }
            state.consumer_attached = true;
            self.shared.publish(state, false);
        }

        let shared = Arc::clone(&self.shared);
        let sink = ConcurrencySink::new(shared.max_concurrent);

        Ok(Box::pin(async move {
            let source = BodySource {
                shared: Arc::clone(&shared),
            };
            let observer = Arc::clone(&shared);
            let result = sink
                .drain_observed(source, handler, move |outstanding| {
                    observer.set_outstanding(outstanding)
                })
                .await;

            match &result {
                Ok(()) => shared.set_outstanding(0),
                Err(SftpWireError::Body(failure)) => shared.fail(shared.lock(), failure.clone()),
                Err(err) => {
                    shared.fail(shared.lock(), BodyFailure::ConsumerFailed(err.to_string()))
                }
            }
            result
        }))
    }

    /// Consume the whole body into one buffer.
    pub async fn read_to_end(&self) -> Result<Bytes> {
        let collected = Arc::new(Mutex::new(BytesMut::new()));
        let target = Arc::clone(&collected);

        self.attach_consumer(move |chunk: Bytes| {
            target
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend_from_slice(&chunk);
            futures::future::ready(Ok(()))
        })?
        .await?;

        let mut body = collected.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(std::mem::take(&mut *body).freeze())
    }

    /// Whether the consumer has room for more data right now.
    pub fn can_accept_more(&self) -> bool {
        *self.shared.capacity.borrow()
    }

    /// Subscribe to changes of [`can_accept_more`](Self::can_accept_more).
    pub fn capacity(&self) -> watch::Receiver<bool> {
        self.shared.capacity.subscribe()
    }

    /// Body length declared by the header.
    #[inline]
    pub fn declared_length(&self) -> u32 {
        self.shared.declared
    }

    /// Declared bytes not yet pushed.
    pub fn remaining(&self) -> u32 {
        self.shared.lock().remaining
    }

    /// Whether the producer side is finished (normally or by failure).
    pub fn is_completed(&self) -> bool {
        self.shared.lock().completed
    }

    /// The failure recorded in this stream, if any.
    pub fn failure(&self) -> Option<BodyFailure> {
        self.shared.lock().failure.clone()
    }
}

impl fmt::Debug for BodyStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("BodyStream")
            .field("declared", &self.shared.declared)
            .field("remaining", &state.remaining)
            .field("queued", &state.queued.len())
            .field("outstanding", &state.outstanding)
            .field("completed", &state.completed)
            .field("failure", &state.failure)
            .finish()
    }
}

/// Consumer-side view of the queue.
struct BodySource {
    shared: Arc<Shared>,
}

impl Stream for BodySource {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut state = self.shared.lock();
        if let Some(failure) = &state.failure {
            return Poll::Ready(Some(Err(failure.clone().into())));
        }
        if let Some(chunk) = state.queued.pop_front() {
            return Poll::Ready(Some(Ok(chunk)));
        }
        if state.completed {
            return Poll::Ready(None);
        }
        state.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::{mpsc, oneshot};

    fn bytes(data: &[u8]) -> Bytes {
        Bytes::copy_from_slice(data)
    }

    #[tokio::test]
    async fn test_chunks_pushed_before_attach_are_delivered_in_order() {
        let body = BodyStream::new(4, 4);
        body.push(bytes(&[0x01])).unwrap();
        body.push(bytes(&[0x02, 0x03])).unwrap();
        body.push(bytes(&[0x04])).unwrap();
        body.complete().unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let consumer = body
            .attach_consumer(move |chunk| {
                let _ = tx.send(chunk);
                async { Ok(()) }
            })
            .unwrap();
        consumer.await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), bytes(&[0x01]));
        assert_eq!(rx.recv().await.unwrap(), bytes(&[0x02, 0x03]));
        assert_eq!(rx.recv().await.unwrap(), bytes(&[0x04]));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_overflow_fails_stream() {
        let body = BodyStream::new(3, 2);
        body.push(bytes(&[1, 2])).unwrap();

        let err = body.push(bytes(&[3, 4])).unwrap_err();
        assert!(matches!(
            err,
            SftpWireError::Body(BodyFailure::Overflow {
                declared: 3,
                received: 4
            })
        ));
        assert!(body.is_completed());

        // Nothing reaches a consumer after the overflow.
        let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
        let err = body
            .attach_consumer(move |chunk| {
                let _ = tx.send(chunk);
                async { Ok(()) }
            })
            .unwrap()
            .await
            .unwrap_err();
        assert!(matches!(err, SftpWireError::Body(BodyFailure::Overflow { .. })));
        assert!(rx.recv().await.is_none());

        assert!(body.push(bytes(&[1])).is_err());
    }

    #[test]
    fn test_underflow_on_early_complete() {
        let body = BodyStream::new(10, 1);
        body.push(bytes(&[0; 4])).unwrap();

        let err = body.complete().unwrap_err();
        assert!(matches!(
            err,
            SftpWireError::Body(BodyFailure::Underflow {
                declared: 10,
                missing: 6
            })
        ));
    }

    #[test]
    fn test_push_after_complete() {
        let body = BodyStream::new(1, 1);
        body.push(bytes(&[9])).unwrap();
        body.complete().unwrap();
        body.complete().unwrap();
        assert!(matches!(
            body.push(bytes(&[9])),
            Err(SftpWireError::BodyClosed)
        ));
    }

    #[tokio::test]
    async fn test_idle_consumer_reports_capacity() {
        let body = BodyStream::new(5, 2);
        let mut capacity = body.capacity();
        assert!(!body.can_accept_more());

        let reader = body.clone();
        let consumer = tokio::spawn(async move { reader.read_to_end().await });
        capacity.wait_for(|can| *can).await.unwrap();
        assert!(body.can_accept_more());

        body.push(bytes(b"later")).unwrap();
        body.complete().unwrap();
        assert_eq!(&consumer.await.unwrap().unwrap()[..], b"later");
    }

    #[test]
    fn test_attach_with_empty_queue_reports_capacity() {
        let body = BodyStream::new(3, 1);
        let _consumer = body.attach_consumer(|_| async { Ok(()) }).unwrap();
        assert!(body.can_accept_more());
    }

    #[tokio::test]
    async fn test_second_consumer_rejected() {
        let body = BodyStream::new(0, 1);
        let _first = body.attach_consumer(|_| async { Ok(()) }).unwrap();
        let second = body.attach_consumer(|_| async { Ok(()) });
        assert!(matches!(second, Err(SftpWireError::ConsumerAlreadyAttached)));
    }

    #[tokio::test]
    async fn test_bounded_concurrency() {
        let body = BodyStream::new(6, 2);
        for i in 0..6u8 {
            body.push(bytes(&[i])).unwrap();
        }
        body.complete().unwrap();

        let (started_tx, mut started_rx) = mpsc::unbounded_channel();
        let consumer = body
            .attach_consumer(move |chunk| {
                let (release_tx, release_rx) = oneshot::channel::<()>();
                let _ = started_tx.send((chunk[0], release_tx));
                async move {
                    let _ = release_rx.await;
                    Ok(())
                }
            })
            .unwrap();
        let consumer = tokio::spawn(consumer);

        let (first, release_first) = started_rx.recv().await.unwrap();
        let (second, _release_second) = started_rx.recv().await.unwrap();
        assert_eq!((first, second), (0, 1));

        tokio::task::yield_now().await;
        assert!(started_rx.try_recv().is_err(), "third unit started early");

        release_first.send(()).unwrap();
        let (third, _release_third) = started_rx.recv().await.unwrap();
        assert_eq!(third, 2);

        tokio::task::yield_now().await;
        assert!(started_rx.try_recv().is_err(), "only one unit may follow a release");

        consumer.abort();
    }

    #[tokio::test]
    async fn test_backpressure_converges() {
        let body = BodyStream::new(5, 2);
        for i in 0..5u8 {
            body.push(bytes(&[i])).unwrap();
        }
        assert!(!body.can_accept_more());

        let (started_tx, mut started_rx) = mpsc::unbounded_channel();
        let consumer = tokio::spawn(
            body.attach_consumer(move |_| {
                let (release_tx, release_rx) = oneshot::channel::<()>();
                let _ = started_tx.send(release_tx);
                async move {
                    let _ = release_rx.await;
                    Ok(())
                }
            })
            .unwrap(),
        );

        let mut capacity = body.capacity();
        for resolved in 1..=3 {
            let release: oneshot::Sender<()> = started_rx.recv().await.unwrap();
            release.send(()).unwrap();
            tokio::task::yield_now().await;
            assert!(!body.can_accept_more(), "capacity reported after {resolved} resolutions");
        }

        // Queue is empty now; the fourth resolution frees a slot.
        let release = started_rx.recv().await.unwrap();
        release.send(()).unwrap();
        capacity.wait_for(|can| *can).await.unwrap();
        assert!(body.can_accept_more());

        let release = started_rx.recv().await.unwrap();
        release.send(()).unwrap();
        body.complete().unwrap();
        consumer.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_consumer_failure_discards_queue() {
        let body = BodyStream::new(3, 1);
        for i in 0..3u8 {
            body.push(bytes(&[i])).unwrap();
        }
        body.complete().unwrap();

        let err = body
            .attach_consumer(|chunk| async move {
                if chunk[0] == 0 {
                    Err(SftpWireError::HandlerFailure("write failed".into()))
                } else {
                    Ok(())
                }
            })
            .unwrap()
            .await
            .unwrap_err();

        assert!(matches!(err, SftpWireError::HandlerFailure(_)));
        assert!(matches!(
            body.failure(),
            Some(BodyFailure::ConsumerFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_abort_reaches_waiting_consumer() {
        let body = BodyStream::new(100, 2);
        let reader = body.clone();
        let task = tokio::spawn(async move { reader.read_to_end().await });

        body.push(bytes(b"partial")).unwrap();
        tokio::task::yield_now().await;
        body.abort("transport closed");

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, SftpWireError::Body(BodyFailure::Aborted(_))));
    }

    #[tokio::test]
    async fn test_empty_stream() {
        let body = BodyStream::empty();
        assert!(body.is_completed());
        assert!(body.can_accept_more());
        assert!(body.read_to_end().await.unwrap().is_empty());
    }
}
