//! Game sessions and the handshake gate shared by both built-in protocols.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use crate::net::channel::{ChannelContext, ChannelId};
use crate::protocol::codec::{Packet, HANDSHAKE_ACK_PACKET, HANDSHAKE_PACKET};
use crate::protocol::ProtocolError;
use crate::session::Session;

/// How a session puts packets on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// `[len][kind][payload]` on a byte stream.
    LengthPrefixed,
    /// `[kind][payload]`, one packet per message.
    Message,
}

/// Receives traffic for established sessions.
pub trait PacketListener: Send + Sync {
    fn on_session_open(&self, _session: &Arc<GameSession>) {}

    fn on_packet(&self, session: &Arc<GameSession>, packet: Packet);

    fn on_session_close(&self, _session: &Arc<GameSession>) {}
}

/// A connection that completed the handshake.
#[derive(Debug)]
pub struct GameSession {
    ctx: ChannelContext,
    framing: Framing,
    disconnected: AtomicBool,
}

impl GameSession {
    pub fn new(ctx: ChannelContext, framing: Framing) -> Self {
        Self {
            ctx,
            framing,
            disconnected: AtomicBool::new(false),
        }
    }

    pub fn identity(&self) -> &ChannelId {
        self.ctx.identity()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.ctx.channel().peer_addr()
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Queue a packet for the peer.
    pub fn send(&self, packet: Packet) -> Result<(), ProtocolError> {
        let bytes: Bytes = match self.framing {
            Framing::LengthPrefixed => packet.to_frame(),
            Framing::Message => packet.to_datagram(),
        };
        self.ctx.write(bytes)?;
        Ok(())
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

impl Session for GameSession {
    fn disconnect(&self) {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return;
        }
        self.ctx.close();
        self.ctx.registry().remove(self.ctx.identity());
        tracing::debug!(session = %self.ctx.identity(), "Session disconnected");
    }
}

/// Per-connection handshake state: the first packet must be a handshake,
/// which registers a session; later packets go to the listener.
pub(crate) struct HandshakeGate {
    framing: Framing,
    listener: Option<Arc<dyn PacketListener>>,
    session: Option<Arc<GameSession>>,
}

impl HandshakeGate {
    pub(crate) fn new(framing: Framing, listener: Option<Arc<dyn PacketListener>>) -> Self {
        Self {
            framing,
            listener,
            session: None,
        }
    }

    pub(crate) fn on_packet(&mut self, ctx: &ChannelContext, packet: Packet) -> Result<(), ProtocolError> {
        let Some(session) = &self.session else {
            if packet.kind != HANDSHAKE_PACKET {
                return Err(ProtocolError::HandshakeExpected { kind: packet.kind });
            }
            let session = Arc::new(GameSession::new(ctx.clone(), self.framing));
            ctx.registry().put(ctx.identity().clone(), session.clone());
            session.send(Packet::new(HANDSHAKE_ACK_PACKET, Bytes::new()))?;
            tracing::debug!(session = %ctx.identity(), peer = ?session.peer_addr(), "Handshake complete");
            if let Some(listener) = &self.listener {
                listener.on_session_open(&session);
            }
            self.session = Some(session);
            return Ok(());
        };

        match &self.listener {
            Some(listener) => listener.on_packet(session, packet),
            None => tracing::trace!(session = %ctx.identity(), kind = packet.kind, "Packet ignored"),
        }
        Ok(())
    }

    /// Notify the listener that the connection ended.
    pub(crate) fn close(&mut self) {
        if let (Some(session), Some(listener)) = (self.session.take(), &self.listener) {
            listener.on_session_close(&session);
        }
    }
}
