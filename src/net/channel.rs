//! Channels, channel identity and per-connection context.
//!
//! A `Channel` is the raw transport object the coordinator opens: a listening
//! socket or an accepted/virtual connection. Closing a channel is a flag flip
//! observed by whichever loop owns the underlying socket.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::session::registry::ConnectionRegistry;

static CHANNEL_SEQ: AtomicU64 = AtomicU64::new(1);

/// Opaque, process-unique connection identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(String);

impl ChannelId {
    /// Generate a fresh identity for a channel of `kind`.
    pub fn generate(kind: ChannelKind) -> Self {
        let seq = CHANNEL_SEQ.fetch_add(1, Ordering::Relaxed);
        Self(format!("{}-{:08x}-{}", kind.prefix(), seq, Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ChannelId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a channel represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Listening byte-stream socket (primary or auxiliary port).
    StreamListener,
    /// Accepted byte-stream connection.
    Stream,
    /// Listening reliable-message socket.
    MessageListener,
    /// Virtual connection on the reliable-message transport.
    Message,
}

impl ChannelKind {
    fn prefix(&self) -> &'static str {
        match self {
            ChannelKind::StreamListener => "tcp-listen",
            ChannelKind::Stream => "tcp",
            ChannelKind::MessageListener => "rudp-listen",
            ChannelKind::Message => "rudp",
        }
    }

    pub fn is_listener(&self) -> bool {
        matches!(self, ChannelKind::StreamListener | ChannelKind::MessageListener)
    }
}

/// A raw transport channel.
#[derive(Debug)]
pub struct Channel {
    id: ChannelId,
    kind: ChannelKind,
    local_addr: Option<SocketAddr>,
    peer_addr: Option<SocketAddr>,
    closed: watch::Sender<bool>,
}

impl Channel {
    pub fn new(
        kind: ChannelKind,
        local_addr: Option<SocketAddr>,
        peer_addr: Option<SocketAddr>,
    ) -> Arc<Self> {
        let (closed, _) = watch::channel(false);
        Arc::new(Self {
            id: ChannelId::generate(kind),
            kind,
            local_addr,
            peer_addr,
            closed,
        })
    }

    pub fn id(&self) -> &ChannelId {
        &self.id
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Close the channel. Returns `true` if this call performed the close.
    pub fn close(&self) -> bool {
        let closed_now = self.closed.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        });
        if closed_now {
            tracing::trace!(channel = %self.id, kind = ?self.kind, "Channel closed");
        }
        closed_now
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolve once the channel is closed.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        // The sender lives in `self`, so this only ends once the flag is set.
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

/// Concurrent set of channels, keyed by identity.
#[derive(Debug, Default, Clone)]
pub struct ChannelSet {
    inner: Arc<DashMap<ChannelId, Arc<Channel>>>,
}

impl ChannelSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, channel: Arc<Channel>) {
        self.inner.insert(channel.id().clone(), channel);
    }

    pub fn remove(&self, id: &ChannelId) -> Option<Arc<Channel>> {
        self.inner.remove(id).map(|(_, channel)| channel)
    }

    pub fn contains(&self, id: &ChannelId) -> bool {
        self.inner.contains_key(id)
    }

    /// Close every channel in the set. Returns how many were still open.
    pub fn close_all(&self) -> usize {
        self.snapshot().iter().filter(|channel| channel.close()).count()
    }

    /// Copy of the current members.
    pub fn snapshot(&self) -> Vec<Arc<Channel>> {
        self.inner.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Errors writing through a `ChannelContext`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("channel {0} is closed")]
    Closed(ChannelId),
    #[error("outbound queue of channel {0} is full")]
    Full(ChannelId),
}

/// Per-connection context handed to handlers and to `clear`.
#[derive(Debug, Clone)]
pub struct ChannelContext {
    channel: Arc<Channel>,
    registry: Arc<ConnectionRegistry>,
    outbound: mpsc::Sender<Bytes>,
}

impl ChannelContext {
    /// Build a context and the receiving half of its outbound queue.
    pub fn new(
        channel: Arc<Channel>,
        registry: Arc<ConnectionRegistry>,
        outbound_capacity: usize,
    ) -> (Self, mpsc::Receiver<Bytes>) {
        let (outbound, rx) = mpsc::channel(outbound_capacity.max(1));
        (
            Self {
                channel,
                registry,
                outbound,
            },
            rx,
        )
    }

    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    /// Identity of the underlying channel, used as the registry key.
    pub fn identity(&self) -> &ChannelId {
        self.channel.id()
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn is_closed(&self) -> bool {
        self.channel.is_closed()
    }

    pub fn close(&self) -> bool {
        self.channel.close()
    }

    /// Queue bytes for the peer without waiting.
    pub fn write(&self, bytes: Bytes) -> Result<(), ChannelError> {
        if self.channel.is_closed() {
            return Err(ChannelError::Closed(self.identity().clone()));
        }
        self.outbound.try_send(bytes).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ChannelError::Full(self.identity().clone()),
            mpsc::error::TrySendError::Closed(_) => ChannelError::Closed(self.identity().clone()),
        })
    }

    /// Queue bytes for the peer, waiting for queue space.
    pub async fn write_async(&self, bytes: Bytes) -> Result<(), ChannelError> {
        if self.channel.is_closed() {
            return Err(ChannelError::Closed(self.identity().clone()));
        }
        self.outbound
            .send(bytes)
            .await
            .map_err(|_| ChannelError::Closed(self.identity().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn channel_ids_are_unique() {
        let a = ChannelId::generate(ChannelKind::Stream);
        let b = ChannelId::generate(ChannelKind::Stream);
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("tcp-"));
    }

    #[test]
    fn close_is_idempotent() {
        let channel = Channel::new(ChannelKind::Stream, None, None);
        assert!(!channel.is_closed());
        assert!(channel.close());
        assert!(!channel.close());
        assert!(channel.is_closed());
    }

    #[tokio::test]
    async fn closed_resolves_after_close() {
        let channel = Channel::new(ChannelKind::StreamListener, None, None);
        let waiter = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.closed().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        channel.close();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("closed() should resolve")
            .unwrap();

        // Already closed: resolves immediately.
        channel.closed().await;
    }

    #[test]
    fn channel_set_close_all() {
        let set = ChannelSet::new();
        let a = Channel::new(ChannelKind::StreamListener, None, None);
        let b = Channel::new(ChannelKind::StreamListener, None, None);
        set.insert(Arc::clone(&a));
        set.insert(Arc::clone(&b));
        b.close();

        assert_eq!(set.close_all(), 1);
        assert!(set.snapshot().iter().all(|c| c.is_closed()));
        assert_eq!(set.len(), 2);

        set.remove(a.id());
        assert!(!set.contains(a.id()));
    }

    #[tokio::test]
    async fn context_write_respects_capacity_and_close() {
        let channel = Channel::new(ChannelKind::Stream, None, None);
        let registry = Arc::new(ConnectionRegistry::new());
        let (ctx, mut rx) = ChannelContext::new(channel, registry, 1);

        ctx.write(Bytes::from_static(b"a")).unwrap();
        assert_eq!(
            ctx.write(Bytes::from_static(b"b")),
            Err(ChannelError::Full(ctx.identity().clone()))
        );
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"a"));

        ctx.close();
        assert_eq!(
            ctx.write(Bytes::from_static(b"c")),
            Err(ChannelError::Closed(ctx.identity().clone()))
        );
    }
}
