//! Default byte-stream protocol: length-prefixed packets behind a handshake.

use std::sync::Arc;

use async_trait::async_trait;

use crate::net::channel::ChannelContext;
use crate::net::connection::{ConnectionGuard, ConnectionTracker};
use crate::protocol::codec::{Packet, PacketCodec};
use crate::protocol::session::{Framing, HandshakeGate, PacketListener};
use crate::protocol::{ConnectionHandler, HandlerChain, ProtocolError, ProtocolStrategy};

/// Stream strategy used when the embedder supplies none.
pub struct DefaultStreamProtocol {
    tracker: ConnectionTracker,
    max_frame_length: usize,
    listener: Option<Arc<dyn PacketListener>>,
}

impl DefaultStreamProtocol {
    pub fn new(max_frame_length: usize) -> Self {
        Self {
            tracker: ConnectionTracker::new(),
            max_frame_length,
            listener: None,
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn PacketListener>) -> Self {
        self.listener = Some(listener);
        self
    }
}

impl ProtocolStrategy for DefaultStreamProtocol {
    fn handler_chain(&self, _ctx: &ChannelContext) -> HandlerChain {
        HandlerChain::new(
            PacketCodec::new(self.max_frame_length),
            StreamSessionHandler {
                gate: HandshakeGate::new(Framing::LengthPrefixed, self.listener.clone()),
                _guard: self.tracker.track(),
            },
        )
    }

    fn connect_size(&self) -> usize {
        self.tracker.active_count()
    }
}

struct StreamSessionHandler {
    gate: HandshakeGate,
    _guard: ConnectionGuard,
}

#[async_trait]
impl ConnectionHandler for StreamSessionHandler {
    async fn packet_received(&mut self, ctx: &ChannelContext, packet: Packet) -> Result<(), ProtocolError> {
        self.gate.on_packet(ctx, packet)
    }

    async fn channel_inactive(&mut self, _ctx: &ChannelContext) {
        self.gate.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::channel::{Channel, ChannelKind};
    use crate::protocol::HANDSHAKE_PACKET;
    use crate::session::ConnectionRegistry;
    use bytes::Bytes;

    #[tokio::test]
    async fn counts_connections_until_handler_dropped() {
        let protocol = DefaultStreamProtocol::new(1024);
        let channel = Channel::new(ChannelKind::Stream, None, None);
        let (ctx, _outbound) = ChannelContext::new(channel, Arc::new(ConnectionRegistry::new()), 4);

        let HandlerChain { mut handler, .. } = protocol.handler_chain(&ctx);
        assert_eq!(protocol.connect_size(), 1);

        handler
            .packet_received(&ctx, Packet::new(HANDSHAKE_PACKET, Bytes::new()))
            .await
            .unwrap();
        assert_eq!(ctx.registry().len(), 1);

        handler.channel_inactive(&ctx).await;
        drop(handler);
        assert_eq!(protocol.connect_size(), 0);
    }
}
