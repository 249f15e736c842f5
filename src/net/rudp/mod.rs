//! Reliable message transport over UDP.
//!
//! Each peer address gets a virtual connection with acknowledged, ordered
//! delivery of whole messages. The API is blocking: one driver thread per
//! endpoint handles receive, acknowledgement and retransmission, and callers
//! block on `accept`/`recv` with a timeout.
//!
//! # Wire Format
//! ```text
//! [kind: u8][seq: u32 BE][payload]
//!   SYN / SYN_ACK  open a virtual connection
//!   DATA           one message, seq counts from 0 per direction
//!   ACK            acknowledges DATA with the same seq
//!   FIN            closes the virtual connection
//! ```

mod connection;
mod endpoint;
pub mod packet;
mod socket;

use std::time::Duration;

use thiserror::Error;

use crate::config::schema::MessageConfig;

pub use packet::{Segment, SegmentKind};
pub use socket::{ReliableServerSocket, ReliableSocket};

/// Largest UDP payload carried in one datagram.
pub const MAX_DATAGRAM: usize = 65_507;

/// Largest message accepted by `ReliableSocket::send`.
pub const MAX_MESSAGE: usize = MAX_DATAGRAM - packet::HEADER_LEN;

#[derive(Debug, Error)]
pub enum RudpError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed segment ({len} bytes)")]
    Malformed { len: usize },

    #[error("unknown segment kind {0}")]
    UnknownKind(u8),

    #[error("message of {len} bytes exceeds limit of {max}")]
    MessageTooLarge { len: usize, max: usize },

    #[error("connection closed")]
    Closed,

    #[error("peer stopped acknowledging after {retries} retransmissions")]
    ConnectionLost { retries: u32 },

    #[error("no answer from {0} while connecting")]
    ConnectTimeout(std::net::SocketAddr),
}

/// Tuning for one endpoint.
#[derive(Debug, Clone)]
pub struct RudpOptions {
    /// Driver poll interval; also bounds how long blocking calls take to
    /// notice a close.
    pub tick: Duration,
    /// Initial retransmission timeout, doubled on every retry.
    pub retransmit: Duration,
    /// Upper bound for the retransmission timeout.
    pub max_retransmit: Duration,
    pub max_retries: u32,
    /// Unacknowledged messages in flight before `send` blocks.
    pub window: usize,
    /// Out-of-order messages held for reordering.
    pub reorder_buffer: usize,
    /// Virtual connections waiting for `accept`.
    pub backlog: usize,
}

impl Default for RudpOptions {
    fn default() -> Self {
        Self::from(&MessageConfig::default())
    }
}

impl From<&MessageConfig> for RudpOptions {
    fn from(config: &MessageConfig) -> Self {
        let retransmit = Duration::from_millis(config.retransmit_ms.max(1));
        Self {
            tick: Duration::from_millis(config.tick_ms.max(1)),
            retransmit,
            max_retransmit: (retransmit * 16).max(Duration::from_secs(2)),
            max_retries: config.max_retries,
            window: config.window.max(1),
            reorder_buffer: config.reorder_buffer,
            backlog: config.backlog.max(1),
        }
    }
}
