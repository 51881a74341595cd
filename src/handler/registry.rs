//! Router dispatching messages by packet type tag.
//!
//! Each type tag maps to at most one handler. Messages with no route go to
//! the fallback handler if one is set, else fail with `HandlerNotFound`.

use std::collections::HashMap;
use std::fmt;

use super::{BoxFuture, Handler, HandlerResult};
use crate::error::SftpWireError;
use crate::message::Message;
use crate::protocol::Packet;

/// Handler that dispatches on [`Message::type_tag`].
pub struct Router<P> {
    routes: HashMap<u8, Box<dyn Handler<P>>>,
    fallback: Option<Box<dyn Handler<P>>>,
}

impl<P: Packet> Router<P> {
    /// Create a new empty router.
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
            fallback: None,
        }
    }

    /// Route messages of `type_tag` to `handler`, replacing any earlier route.
    pub fn route<H>(mut self, type_tag: u8, handler: H) -> Self
    where
        H: Handler<P>,
    {
        if self.routes.insert(type_tag, Box::new(handler)).is_some() {
            tracing::warn!(type_tag, "replacing existing route");
        }
        self
    }

    /// Handle every message that has no route.
    pub fn fallback<H>(mut self, handler: H) -> Self
    where
        H: Handler<P>,
    {
        self.fallback = Some(Box::new(handler));
        self
    }

    /// Check if a type tag has its own route.
    pub fn has_route(&self, type_tag: u8) -> bool {
        self.routes.contains_key(&type_tag)
    }

    /// Get the number of routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Check if the router has no routes.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl<P: Packet> Default for Router<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Packet> Handler<P> for Router<P> {
    fn handle(&self, message: Message<P>) -> BoxFuture<'static, HandlerResult<P>> {
        let type_tag = message.type_tag();
        match self.routes.get(&type_tag).or(self.fallback.as_ref()) {
            Some(handler) => handler.handle(message),
            None => {
                tracing::debug!(type_tag, "no route for packet type");
                Box::pin(async move { Err(SftpWireError::HandlerNotFound(type_tag)) })
            }
        }
    }
}

impl<P> fmt::Debug for Router<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<_> = self.routes.keys().copied().collect();
        tags.sort_unstable();
        f.debug_struct("Router")
            .field("routes", &tags)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::RawPacket;
    use crate::protocol::packet_type;

    fn status(id: u8) -> Message<RawPacket> {
        Message::new(RawPacket::new(packet_type::STATUS, vec![0, 0, 0, id]), 0)
    }

    fn request(type_tag: u8) -> Message<RawPacket> {
        Message::new(RawPacket::new(type_tag, vec![0, 0, 0, 1]), 0)
    }

    #[tokio::test]
    async fn test_routes_by_type_tag() {
        let router = Router::new()
            .route(packet_type::OPEN, |_: Message<RawPacket>| async { Ok(status(1)) })
            .route(packet_type::CLOSE, |_: Message<RawPacket>| async { Ok(status(2)) });

        assert_eq!(router.len(), 2);
        let reply = router.handle(request(packet_type::CLOSE)).await.unwrap();
        assert_eq!(reply.packet().header(), &[0, 0, 0, 2]);
    }

    #[tokio::test]
    async fn test_missing_route() {
        let router: Router<RawPacket> = Router::new();
        assert!(router.is_empty());

        let err = router.handle(request(packet_type::STAT)).await.unwrap_err();
        assert!(matches!(err, SftpWireError::HandlerNotFound(17)));
    }

    #[tokio::test]
    async fn test_fallback() {
        let router = Router::new()
            .route(packet_type::OPEN, |_: Message<RawPacket>| async { Ok(status(1)) })
            .fallback(|msg: Message<RawPacket>| async move {
                Ok(status(msg.type_tag()))
            });

        assert!(!router.has_route(packet_type::MKDIR));
        let reply = router.handle(request(packet_type::MKDIR)).await.unwrap();
        assert_eq!(reply.packet().header(), &[0, 0, 0, packet_type::MKDIR]);
    }
}
