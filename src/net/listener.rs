//! Byte-stream listener with backpressure.
//!
//! # Responsibilities
//! - Build the acceptor and worker groups for one bind call
//! - Bind the primary port and the optional auxiliary range
//! - Accept connections, enforcing `max_connections` via semaphore
//! - Hand every accepted connection to the worker group
//! - Shut both groups down on every exit path
//!
//! # Design Decisions
//! - `bind` blocks until the primary listening channel closes
//! - Auxiliary binds are best effort: each failure is logged and counted,
//!   never fatal to the primary listener

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::error::NetError;
use crate::lifecycle::coordinator::CoordinatorShared;
use crate::net::backend::select_backend;
use crate::net::channel::{Channel, ChannelKind};
use crate::net::connection::serve_stream;
use crate::observability::metrics;
use crate::pool::event_loop::{EventLoopGroup, GroupHandle};

/// Listener for the byte-stream transport.
pub struct StreamListener {
    shared: Arc<CoordinatorShared>,
}

/// Shuts both groups down when dropped, acceptors first.
struct GroupRelease {
    acceptors: Option<EventLoopGroup>,
    workers: Option<EventLoopGroup>,
    grace: Duration,
}

impl Drop for GroupRelease {
    fn drop(&mut self) {
        if let Some(acceptors) = self.acceptors.take() {
            acceptors.shutdown_gracefully(self.grace);
        }
        if let Some(workers) = self.workers.take() {
            workers.shutdown_gracefully(self.grace);
        }
    }
}

impl StreamListener {
    pub(crate) fn new(shared: Arc<CoordinatorShared>) -> Self {
        Self { shared }
    }

    /// Bind `primary` plus every port in `[start, end]` and serve until the
    /// primary channel closes. Failures are logged, not returned.
    ///
    /// Blocks the calling thread; must not be called from async context.
    pub fn bind(&self, primary: u16, start: u16, end: u16) {
        let config = &self.shared.config;
        let backend = select_backend(config.transport.force_portable);

        let acceptors = match EventLoopGroup::new("acceptor", config.stream.acceptor_threads, backend) {
            Ok(group) => group,
            Err(e) => {
                tracing::error!(port = primary, error = %e, "Failed to build acceptor group");
                return;
            }
        };
        let workers = match EventLoopGroup::new("worker", config.stream.resolved_worker_threads(), backend) {
            Ok(group) => group,
            Err(e) => {
                tracing::error!(port = primary, error = %e, "Failed to build worker group");
                acceptors.shutdown_gracefully(Duration::ZERO);
                return;
            }
        };
        let acceptor_handle = acceptors.handle();
        let worker_handle = workers.handle();
        let _release = GroupRelease {
            acceptors: Some(acceptors),
            workers: Some(workers),
            grace: Duration::from_secs(config.stream.shutdown_grace_secs),
        };

        tracing::info!(
            port = primary,
            aux_start = start,
            aux_end = end,
            backend = %backend,
            "Opening stream listener"
        );

        match self.serve(&acceptor_handle, &worker_handle, primary, start, end) {
            Ok(()) => tracing::info!(port = primary, "Stream listener closed"),
            Err(e) => {
                metrics::record_bind_failure(primary, e.kind());
                match &e {
                    NetError::InterruptedWait { .. } => {
                        tracing::error!(port = primary, error = %e, "[TCP Start Error] wait on primary channel interrupted")
                    }
                    NetError::AddressInUse { .. } => {
                        tracing::error!(port = primary, error = %e, "[Port Bind Error] address already in use")
                    }
                    _ => tracing::error!(port = primary, error = %e, kind = e.kind(), "Stream listener failed"),
                }
            }
        }
    }

    fn serve(
        &self,
        acceptors: &GroupHandle,
        workers: &GroupHandle,
        primary: u16,
        start: u16,
        end: u16,
    ) -> Result<(), NetError> {
        let limit = Arc::new(Semaphore::new(self.shared.config.stream.max_connections.max(1)));

        let primary_loop = self.open(acceptors, workers, primary, &limit)?;
        tracing::info!(port = primary, "Bind complete");

        if start <= end {
            for port in start..=end {
                if port == primary {
                    continue;
                }
                match self.open(acceptors, workers, port, &limit) {
                    Ok(_) => tracing::info!(port, "Auxiliary port bound"),
                    Err(e) => {
                        metrics::record_bind_failure(port, e.kind());
                        tracing::warn!(port, error = %e, kind = e.kind(), "Auxiliary port bind failed");
                    }
                }
            }
        }

        acceptors
            .block_on(primary_loop)
            .map_err(|e| NetError::InterruptedWait {
                port: primary,
                reason: e.to_string(),
            })
    }

    /// Bind one port and start its accept loop on the acceptor group.
    fn open(
        &self,
        acceptors: &GroupHandle,
        workers: &GroupHandle,
        port: u16,
        limit: &Arc<Semaphore>,
    ) -> Result<JoinHandle<()>, NetError> {
        let config = &self.shared.config;
        let ip: IpAddr = config
            .server
            .bind_host
            .parse()
            .map_err(|e| NetError::Bind {
                port,
                source: io::Error::new(io::ErrorKind::InvalidInput, e),
            })?;
        let addr = SocketAddr::new(ip, port);

        let std_listener = bind_socket(addr, config.stream.backlog).map_err(|e| NetError::bind(port, e))?;
        let listener = {
            let _runtime = acceptors.enter();
            TcpListener::from_std(std_listener).map_err(|e| NetError::bind(port, e))?
        };

        let channel = Channel::new(ChannelKind::StreamListener, listener.local_addr().ok(), None);
        self.shared.channels.insert(Arc::clone(&channel));
        acceptors.register(Arc::clone(&channel));

        let accept_loop = accept_loop(
            listener,
            Arc::clone(&channel),
            Arc::clone(&self.shared),
            workers.clone(),
            Arc::clone(limit),
        );
        acceptors.spawn(accept_loop).ok_or_else(|| {
            channel.close();
            self.shared.channels.remove(channel.id());
            NetError::Runtime {
                group: "acceptor",
                source: io::Error::other("acceptor group is shutting down"),
            }
        })
    }
}

fn bind_socket(addr: SocketAddr, backlog: i32) -> io::Result<std::net::TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;
    Ok(socket.into())
}

async fn accept_loop(
    listener: TcpListener,
    channel: Arc<Channel>,
    shared: Arc<CoordinatorShared>,
    workers: GroupHandle,
    limit: Arc<Semaphore>,
) {
    loop {
        let permit = tokio::select! {
            _ = channel.closed() => break,
            permit = Arc::clone(&limit).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let accepted = tokio::select! {
            _ = channel.closed() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
                }
                let stream = match stream.into_std() {
                    Ok(stream) => stream,
                    Err(e) => {
                        tracing::warn!(peer = %peer, error = %e, "Failed to detach accepted stream");
                        continue;
                    }
                };
                metrics::record_accepted("stream");
                tracing::debug!(
                    peer = %peer,
                    available_permits = limit.available_permits(),
                    "Connection accepted"
                );

                let shared = Arc::clone(&shared);
                let handle = workers.clone();
                let spawned = workers.spawn(async move {
                    let _permit = permit;
                    serve_stream(stream, peer, shared, handle).await;
                });
                if spawned.is_none() {
                    tracing::debug!(peer = %peer, "Worker group shutting down, dropping connection");
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(listener = %channel.id(), error = %e, "Accept failed");
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }

    channel.close();
    shared.channels.remove(channel.id());
    tracing::debug!(listener = %channel.id(), addr = ?channel.local_addr(), "Accept loop stopped");
}
