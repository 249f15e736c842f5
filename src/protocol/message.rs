//! Default message-transport protocol: one packet per reliable message.

use std::sync::Arc;
use std::time::Duration;

use crate::net::channel::ChannelContext;
use crate::net::connection::{ConnectionGuard, ConnectionTracker};
use crate::protocol::codec::Packet;
use crate::protocol::session::{Framing, HandshakeGate, PacketListener};
use crate::protocol::{MessageConnection, MessageHandler, MessageProtocol};

/// Message strategy used when the embedder supplies none.
pub struct DefaultMessageProtocol {
    tracker: ConnectionTracker,
    poll: Duration,
    listener: Option<Arc<dyn PacketListener>>,
}

impl DefaultMessageProtocol {
    /// `poll` bounds how long the handler waits on the socket before
    /// flushing queued writes and re-checking for close.
    pub fn new(poll: Duration) -> Self {
        Self {
            tracker: ConnectionTracker::new(),
            poll,
            listener: None,
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn PacketListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Virtual connections currently being handled.
    pub fn active(&self) -> usize {
        self.tracker.active_count()
    }
}

impl MessageProtocol for DefaultMessageProtocol {
    fn handler(&self, _ctx: &ChannelContext) -> Box<dyn MessageHandler> {
        Box::new(MessageSessionHandler {
            gate: HandshakeGate::new(Framing::Message, self.listener.clone()),
            poll: self.poll,
            _guard: self.tracker.track(),
        })
    }
}

struct MessageSessionHandler {
    gate: HandshakeGate,
    poll: Duration,
    _guard: ConnectionGuard,
}

impl MessageHandler for MessageSessionHandler {
    fn run(mut self: Box<Self>, conn: MessageConnection) {
        let MessageConnection {
            mut socket,
            ctx,
            mut outbound,
        } = conn;

        'conn: while !ctx.is_closed() {
            while let Ok(bytes) = outbound.try_recv() {
                if let Err(e) = socket.send(&bytes) {
                    tracing::debug!(connection = %ctx.identity(), error = %e, "Virtual connection send failed");
                    break 'conn;
                }
            }

            match socket.recv_timeout(self.poll) {
                Ok(Some(message)) => {
                    let handled = Packet::from_datagram(&message).and_then(|packet| self.gate.on_packet(&ctx, packet));
                    if let Err(e) = handled {
                        tracing::warn!(connection = %ctx.identity(), error = %e, "Closing virtual connection after protocol error");
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(connection = %ctx.identity(), reason = %e, "Virtual connection ended");
                    break;
                }
            }
        }

        while let Ok(bytes) = outbound.try_recv() {
            if socket.send(&bytes).is_err() {
                break;
            }
        }
        socket.close();
        self.gate.close();
    }
}
