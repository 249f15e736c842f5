//! Protocol strategies: what runs on each accepted connection.
//!
//! # Data Flow
//! ```text
//! stream transport:
//!     accept → ProtocolStrategy::handler_chain(ctx)
//!         decoder  (worker group)   bytes → Packet
//!         handler  (task pool)      Packet → session logic
//!
//! message transport:
//!     accept → MessageProtocol::handler(ctx)
//!         handler.run(conn)         dedicated thread per virtual connection
//! ```
//!
//! # Design Decisions
//! - The coordinator takes strategies as trait objects at construction
//! - Strategies own session registration: they `put` at handshake and
//!   remove on disconnect; the coordinator only guarantees final removal

pub mod codec;
pub mod message;
pub mod session;
pub mod stream;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::codec::Decoder;

use crate::net::channel::{ChannelContext, ChannelError};
use crate::net::rudp::ReliableSocket;

pub use codec::{Packet, PacketCodec, HANDSHAKE_ACK_PACKET, HANDSHAKE_PACKET};
pub use message::DefaultMessageProtocol;
pub use session::{GameSession, PacketListener};
pub use stream::DefaultStreamProtocol;

/// Failures inside a connection's protocol handling. They close the
/// connection they occur on and nothing else.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },

    #[error("frame of {len} bytes is shorter than its header")]
    FrameTooShort { len: usize },

    #[error("expected handshake packet, got kind {kind}")]
    HandshakeExpected { kind: u32 },

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Decoder type attached to every stream connection.
pub type BoxedDecoder = Box<dyn Decoder<Item = Packet, Error = ProtocolError> + Send>;

/// Per-connection handler chain produced by a `ProtocolStrategy`.
pub struct HandlerChain {
    pub decoder: BoxedDecoder,
    pub handler: Box<dyn ConnectionHandler>,
}

impl HandlerChain {
    pub fn new<D, H>(decoder: D, handler: H) -> Self
    where
        D: Decoder<Item = Packet, Error = ProtocolError> + Send + 'static,
        H: ConnectionHandler + 'static,
    {
        Self {
            decoder: Box::new(decoder),
            handler: Box::new(handler),
        }
    }
}

/// Handler logic for one stream connection. Runs on the task pool; calls
/// for one connection never overlap.
#[async_trait]
pub trait ConnectionHandler: Send {
    async fn channel_active(&mut self, _ctx: &ChannelContext) -> Result<(), ProtocolError> {
        Ok(())
    }

    async fn packet_received(&mut self, ctx: &ChannelContext, packet: Packet) -> Result<(), ProtocolError>;

    /// Called once after input ends, before the coordinator's teardown.
    async fn channel_inactive(&mut self, _ctx: &ChannelContext) {}
}

/// Stream transport strategy.
pub trait ProtocolStrategy: Send + Sync {
    /// Build the handler chain for a newly accepted connection.
    fn handler_chain(&self, ctx: &ChannelContext) -> HandlerChain;

    /// Connections this strategy currently holds, handshake complete or not.
    fn connect_size(&self) -> usize;
}

/// Everything a message-transport handler needs for one virtual connection.
pub struct MessageConnection {
    pub socket: ReliableSocket,
    pub ctx: ChannelContext,
    pub outbound: mpsc::Receiver<Bytes>,
}

/// Handler for one virtual connection; owns its dedicated thread.
pub trait MessageHandler: Send {
    fn run(self: Box<Self>, conn: MessageConnection);
}

/// Message transport strategy.
pub trait MessageProtocol: Send + Sync {
    /// Create the handler for a newly accepted virtual connection.
    fn handler(&self, ctx: &ChannelContext) -> Box<dyn MessageHandler>;
}
