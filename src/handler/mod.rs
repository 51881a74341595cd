//! Handler module - message handling and dispatch.
//!
//! Provides:
//! - [`Handler`] - turns an inbound [`Message`] into a reply message
//! - [`Router`] - dispatches by packet type tag
//!
//! A handler owns the inbound message and must drain its body stream
//! (typically with [`BodyStream::attach_consumer`]) before or while
//! producing the reply. The session invokes handlers one at a time, in
//! arrival order.
//!
//! [`BodyStream::attach_consumer`]: crate::BodyStream::attach_consumer
//!
//! # Example
//!
//! ```
//! use sftpwire::codec::RawPacket;
//! use sftpwire::handler::Router;
//! use sftpwire::protocol::packet_type;
//! use sftpwire::Message;
//!
//! let router: Router<RawPacket> = Router::new()
//!     .route(packet_type::INIT, |_msg: Message<RawPacket>| async move {
//!         Ok(Message::new(RawPacket::new(packet_type::VERSION, vec![0, 0, 0, 3]), 0))
//!     });
//!
//! assert!(router.has_route(packet_type::INIT));
//! ```

mod registry;

use std::future::Future;
use std::pin::Pin;

use crate::error::Result;
use crate::message::Message;
use crate::protocol::Packet;

pub use registry::Router;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result type for handler functions: the reply message.
pub type HandlerResult<P> = Result<Message<P>>;

/// Trait for message handlers.
pub trait Handler<P>: Send + Sync + 'static {
    /// Handle one inbound message and produce the reply.
    fn handle(&self, message: Message<P>) -> BoxFuture<'static, HandlerResult<P>>;
}

impl<P, F, Fut> Handler<P> for F
where
    P: Packet,
    F: Fn(Message<P>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult<P>> + Send + 'static,
{
    fn handle(&self, message: Message<P>) -> BoxFuture<'static, HandlerResult<P>> {
        Box::pin(self(message))
    }
}
