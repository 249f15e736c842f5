//! Listener for the reliable message transport.
//!
//! `run` owns its calling thread: it loops on `accept` until the listener
//! channel is closed or the socket fails, and starts one dedicated thread per
//! virtual connection.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::error::NetError;
use crate::lifecycle::coordinator::CoordinatorShared;
use crate::net::channel::{Channel, ChannelContext, ChannelKind};
use crate::net::rudp::{ReliableServerSocket, ReliableSocket, RudpError, RudpOptions};
use crate::observability::metrics;
use crate::protocol::MessageConnection;

pub struct ReliableMessageListener {
    shared: Arc<CoordinatorShared>,
}

/// Closes the listening socket and its channel on every exit path.
struct ListenerGuard<'a> {
    server: &'a ReliableServerSocket,
    channel: &'a Arc<Channel>,
    shared: &'a CoordinatorShared,
}

impl Drop for ListenerGuard<'_> {
    fn drop(&mut self) {
        self.channel.close();
        self.server.close();
        self.shared.channels.remove(self.channel.id());
    }
}

/// Drops a virtual connection's channel from the tracked set on every exit
/// path of its thread.
struct Untrack {
    shared: Arc<CoordinatorShared>,
    ctx: ChannelContext,
}

impl Drop for Untrack {
    fn drop(&mut self) {
        self.shared.channels.remove(self.ctx.identity());
    }
}

impl ReliableMessageListener {
    pub(crate) fn new(shared: Arc<CoordinatorShared>) -> Self {
        Self { shared }
    }

    /// Serve `port` until the listener is closed. Failures are logged and
    /// end the loop; there is no restart.
    pub fn run(&self, port: u16) {
        tracing::info!(port, "Opening message listener");
        match self.serve(port) {
            Ok(()) => tracing::info!(port, "Message listener closed"),
            Err(e) => {
                metrics::record_bind_failure(port, e.kind());
                tracing::error!(port, error = %e, "[UDP Start Error] message-transport start error");
            }
        }
    }

    fn serve(&self, port: u16) -> Result<(), NetError> {
        let config = &self.shared.config;
        let ip: IpAddr = config
            .server
            .bind_host
            .parse()
            .map_err(|e| RudpError::Io(io::Error::new(io::ErrorKind::InvalidInput, e)))?;
        let options = RudpOptions::from(&config.message);
        let tick = options.tick;

        let server = ReliableServerSocket::bind(SocketAddr::new(ip, port), options)?;
        let channel = Channel::new(ChannelKind::MessageListener, Some(server.local_addr()), None);
        self.shared.channels.insert(Arc::clone(&channel));
        let _guard = ListenerGuard {
            server: &server,
            channel: &channel,
            shared: &self.shared,
        };
        tracing::info!(port, addr = %server.local_addr(), "Bind complete");

        loop {
            if channel.is_closed() {
                return Ok(());
            }
            match server.accept_timeout(tick) {
                Ok(Some(socket)) => self.dispatch(socket, server.local_addr()),
                Ok(None) => {}
                Err(RudpError::Closed) if channel.is_closed() => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Start the dedicated handler thread for one virtual connection.
    fn dispatch(&self, socket: ReliableSocket, local: SocketAddr) {
        let peer = socket.peer_addr();
        let channel = Channel::new(ChannelKind::Message, Some(local), Some(peer));
        self.shared.channels.insert(Arc::clone(&channel));

        let (ctx, outbound) = ChannelContext::new(
            channel,
            Arc::clone(&self.shared.registry),
            self.shared.config.message.outbound_queue,
        );
        let handler = self.shared.message_protocol.handler(&ctx);
        metrics::record_accepted("message");
        tracing::debug!(connection = %ctx.identity(), peer = %peer, "Virtual connection accepted");

        let shared = Arc::clone(&self.shared);
        let conn_ctx = ctx.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("rudp-conn-{}", peer.port()))
            .spawn(move || {
                let untrack = Untrack {
                    shared,
                    ctx: conn_ctx.clone(),
                };
                let conn = MessageConnection {
                    socket,
                    ctx: conn_ctx,
                    outbound,
                };
                if panic::catch_unwind(AssertUnwindSafe(move || handler.run(conn))).is_err() {
                    metrics::record_handler_panic("message");
                    tracing::error!(connection = %untrack.ctx.identity(), "Message handler panicked");
                }
                untrack.ctx.close();
                untrack.shared.clear(&untrack.ctx);
            });

        if let Err(e) = spawned {
            tracing::warn!(connection = %ctx.identity(), error = %e, "Failed to start virtual connection thread");
            ctx.close();
            self.shared.clear(&ctx);
            self.shared.channels.remove(ctx.identity());
        }
    }
}
