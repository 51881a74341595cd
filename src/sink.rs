//! Bounded concurrency sink.
//!
//! Drains a chunk source into an async per-chunk handler while keeping at
//! most `max_concurrent` handler futures outstanding. Units are started in
//! source order; they may finish in any order.
//!
//! The sink is used on both sides of a session: handlers drain inbound
//! bodies through it (via [`BodyStream::attach_consumer`]), and the session
//! drains reply bodies through it onto the transport.
//!
//! [`BodyStream::attach_consumer`]: crate::BodyStream::attach_consumer
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use futures::stream;
//! use sftpwire::ConcurrencySink;
//!
//! # tokio_test_block_on(async {
//! let chunks = stream::iter(vec![Ok(Bytes::from_static(b"a")), Ok(Bytes::from_static(b"b"))]);
//! ConcurrencySink::new(2)
//!     .drain(chunks, |chunk| async move {
//!         assert_eq!(chunk.len(), 1);
//!         Ok(())
//!     })
//!     .await
//!     .unwrap();
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use std::future::Future;

use bytes::Bytes;
use futures::stream::{FuturesUnordered, Stream, StreamExt};

use crate::error::Result;

/// Default number of per-chunk units allowed in flight.
pub const DEFAULT_MAX_CONCURRENT_CHUNKS: usize = 4;

/// Drains a source into at most `max_concurrent` outstanding futures.
#[derive(Debug, Clone, Copy)]
pub struct ConcurrencySink {
    max_concurrent: usize,
}

impl Default for ConcurrencySink {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT_CHUNKS)
    }
}

impl ConcurrencySink {
    /// Create a sink. A limit of zero is treated as one.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Maximum number of outstanding units.
    #[inline]
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Drain `source` through `handler`.
    ///
    /// Resolves once the source has ended and every unit has finished. The
    /// first error (from the source or a unit) is returned at once; the
    /// source and the remaining units are dropped.
    pub async fn drain<S, H, Fut>(&self, source: S, handler: H) -> Result<()>
    where
        S: Stream<Item = Result<Bytes>> + Unpin,
        H: FnMut(Bytes) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        self.drain_observed(source, handler, |_| {}).await
    }

    /// Like [`drain`](Self::drain), reporting the number of outstanding
    /// units to `observe` every time it changes.
    pub async fn drain_observed<S, H, Fut, O>(
        &self,
        mut source: S,
        mut handler: H,
        mut observe: O,
    ) -> Result<()>
    where
        S: Stream<Item = Result<Bytes>> + Unpin,
        H: FnMut(Bytes) -> Fut,
        Fut: Future<Output = Result<()>>,
        O: FnMut(usize),
    {
        let mut in_flight = FuturesUnordered::new();
        let mut exhausted = false;

        loop {
            if exhausted && in_flight.is_empty() {
                return Ok(());
            }

            tokio::select! {
                biased;

                Some(result) = in_flight.next(), if !in_flight.is_empty() => {
                    result?;
                    observe(in_flight.len());
                }

                item = source.next(), if !exhausted && in_flight.len() < self.max_concurrent => {
                    match item {
                        Some(Ok(chunk)) => {
                            in_flight.push(handler(chunk));
                            observe(in_flight.len());
                        }
                        Some(Err(err)) => return Err(err),
                        None => exhausted = true,
                    }
                }

                else => return Ok(()),
            }
        }
    }
}
