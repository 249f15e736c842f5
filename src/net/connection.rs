//! Connection counting and the per-connection stream driver.
//!
//! # Responsibilities
//! - Count live connections/tasks with drop guards
//! - Drive one accepted stream: socket reads and writes on the worker group,
//!   handler logic on the task offload pool, teardown through `clear`
//!
//! # Design Decisions
//! - The worker side only decodes frames and moves bytes; everything a
//!   handler does runs on the offload pool
//! - The bounded inbound queue is the backpressure boundary between the two

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Decoder;

use crate::lifecycle::coordinator::CoordinatorShared;
use crate::net::channel::{Channel, ChannelContext, ChannelKind};
use crate::observability::metrics;
use crate::pool::event_loop::GroupHandle;
use crate::protocol::{ConnectionHandler, HandlerChain, Packet, ProtocolError};

/// Counts live connections (or tasks). Clones share the count.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    active_count: Arc<AtomicUsize>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new live connection. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
        }
    }

    pub fn active_count(&self) -> usize {
        self.active_count.load(Ordering::SeqCst)
    }
}

/// Decrements its tracker when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicUsize>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active_count.fetch_sub(1, Ordering::SeqCst);
    }
}

enum Inbound {
    Packet(Packet),
    Error(ProtocolError),
}

/// Serve one accepted stream on the worker group.
///
/// `stream` was accepted on an acceptor thread and detached from its reactor;
/// it is re-registered here, on a worker thread.
pub(crate) async fn serve_stream(
    stream: std::net::TcpStream,
    peer: SocketAddr,
    shared: Arc<CoordinatorShared>,
    workers: GroupHandle,
) {
    let stream = match TcpStream::from_std(stream) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(peer = %peer, error = %e, "Failed to register accepted stream");
            return;
        }
    };
    let local = stream.local_addr().ok();
    let stream_config = &shared.config.stream;

    let channel = Channel::new(ChannelKind::Stream, local, Some(peer));
    shared.channels.insert(Arc::clone(&channel));
    workers.register(Arc::clone(&channel));

    let (ctx, mut outbound) =
        ChannelContext::new(Arc::clone(&channel), Arc::clone(&shared.registry), stream_config.outbound_queue);
    let HandlerChain { mut decoder, handler } = shared.strategy.handler_chain(&ctx);
    let (inbound_tx, inbound_rx) = mpsc::channel(stream_config.inbound_queue.max(1));

    tracing::debug!(connection = %ctx.identity(), peer = %peer, "Stream connection active");

    let driver = {
        let ctx = ctx.clone();
        let shared = Arc::clone(&shared);
        drive_handler(handler, ctx, inbound_rx, shared)
    };
    if let Err(e) = shared.task_pool.try_spawn(driver) {
        tracing::warn!(connection = %ctx.identity(), error = %e, "Task pool refused connection handler");
        ctx.close();
        shared.clear(&ctx);
        release(&shared, &workers, &channel);
        return;
    }

    let (mut reader, mut writer) = stream.into_split();
    let mut buf = BytesMut::with_capacity(8 * 1024);

    'io: loop {
        tokio::select! {
            _ = channel.closed() => break 'io,

            read = reader.read_buf(&mut buf) => {
                match read {
                    Ok(0) => {
                        tracing::debug!(connection = %ctx.identity(), "Peer closed stream");
                        break 'io;
                    }
                    Ok(_) => loop {
                        match decoder.decode(&mut buf) {
                            Ok(Some(packet)) => {
                                if !forward(&channel, &inbound_tx, Inbound::Packet(packet)).await {
                                    break 'io;
                                }
                            }
                            Ok(None) => break,
                            Err(e) => {
                                forward(&channel, &inbound_tx, Inbound::Error(e)).await;
                                break 'io;
                            }
                        }
                    },
                    Err(e) => {
                        forward(&channel, &inbound_tx, Inbound::Error(ProtocolError::Io(e))).await;
                        break 'io;
                    }
                }
            }

            Some(bytes) = outbound.recv() => {
                if let Err(e) = writer.write_all(&bytes).await {
                    tracing::debug!(connection = %ctx.identity(), error = %e, "Stream write failed");
                    break 'io;
                }
            }
        }
    }

    // Flush what the handler queued before the close, best effort.
    while let Ok(bytes) = outbound.try_recv() {
        if writer.write_all(&bytes).await.is_err() {
            break;
        }
    }
    let _ = writer.shutdown().await;

    channel.close();
    drop(inbound_tx);
    release(&shared, &workers, &channel);
}

fn release(shared: &CoordinatorShared, workers: &GroupHandle, channel: &Channel) {
    workers.deregister(channel.id());
    shared.channels.remove(channel.id());
}

/// Queue one item for the handler. Gives up when the channel closes while
/// the queue is full. Returns false if the item was not queued.
async fn forward(channel: &Channel, inbound: &mpsc::Sender<Inbound>, item: Inbound) -> bool {
    tokio::select! {
        _ = channel.closed() => false,
        sent = inbound.send(item) => sent.is_ok(),
    }
}

/// Run a connection's handler on the offload pool until its input ends,
/// then tear the connection down.
///
/// The handler runs as its own task so a panic in it still reaches `clear`.
async fn drive_handler(
    handler: Box<dyn ConnectionHandler>,
    ctx: ChannelContext,
    inbound: mpsc::Receiver<Inbound>,
    shared: Arc<CoordinatorShared>,
) {
    let run = tokio::spawn(run_handler(handler, ctx.clone(), inbound));
    if let Err(e) = run.await {
        if e.is_panic() {
            metrics::record_handler_panic("stream");
            tracing::error!(connection = %ctx.identity(), "Connection handler panicked");
        }
        ctx.close();
    }
    shared.clear(&ctx);
}

async fn run_handler(mut handler: Box<dyn ConnectionHandler>, ctx: ChannelContext, mut inbound: mpsc::Receiver<Inbound>) {
    let mut failure = handler.channel_active(&ctx).await.err();

    while failure.is_none() {
        match inbound.recv().await {
            Some(Inbound::Packet(packet)) => {
                failure = handler.packet_received(&ctx, packet).await.err();
            }
            Some(Inbound::Error(e)) => failure = Some(e),
            None => break,
        }
    }

    if let Some(e) = failure {
        tracing::warn!(connection = %ctx.identity(), error = %e, "Closing connection after protocol error");
        ctx.close();
    }
    handler.channel_inactive(&ctx).await;
}
