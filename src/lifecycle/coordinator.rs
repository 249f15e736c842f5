//! The lifecycle coordinator: bind, stop, per-connection teardown.
//!
//! # Teardown contract
//! `clear` is the only teardown entry point. It disconnects the registered
//! session, or force-closes the raw channel when no session exists yet, and
//! always removes the registry entry last, even if `disconnect` panics. A
//! second `clear` for the same connection finds nothing and is a no-op
//! close.

use std::sync::Arc;
use std::time::Duration;

use crate::config::schema::NetConfig;
use crate::config::RunPidStore;
use crate::error::NetError;
use crate::net::channel::{ChannelContext, ChannelId, ChannelSet};
use crate::net::listener::StreamListener;
use crate::net::message_listener::ReliableMessageListener;
use crate::observability::metrics;
use crate::pool::TaskPool;
use crate::protocol::{DefaultMessageProtocol, DefaultStreamProtocol, MessageProtocol, ProtocolStrategy};
use crate::session::ConnectionRegistry;

/// State shared by the coordinator, its listeners and every connection.
pub(crate) struct CoordinatorShared {
    pub(crate) config: NetConfig,
    pub(crate) registry: Arc<ConnectionRegistry>,
    pub(crate) channels: ChannelSet,
    pub(crate) strategy: Arc<dyn ProtocolStrategy>,
    pub(crate) message_protocol: Arc<dyn MessageProtocol>,
    pub(crate) task_pool: TaskPool,
}

/// Removes one identity from the registry when dropped.
struct Deregister<'a> {
    registry: &'a ConnectionRegistry,
    identity: &'a ChannelId,
}

impl Drop for Deregister<'_> {
    fn drop(&mut self) {
        self.registry.remove(self.identity);
    }
}

impl CoordinatorShared {
    pub(crate) fn clear(&self, ctx: &ChannelContext) {
        let identity = ctx.identity();
        let _deregister = Deregister {
            registry: &self.registry,
            identity,
        };

        match self.registry.get(identity) {
            Some(session) => {
                metrics::record_teardown("session");
                tracing::debug!(connection = %identity, "Disconnecting session");
                session.disconnect();
            }
            None => {
                metrics::record_teardown("raw");
                tracing::debug!(connection = %identity, "No session registered, closing channel");
                ctx.close();
            }
        }
    }
}

/// Owns the listeners, executor groups, tracked channels and the registry
/// for one server instance. Clones share state.
#[derive(Clone)]
pub struct LifecycleCoordinator {
    shared: Arc<CoordinatorShared>,
    pid_store: Option<Arc<dyn RunPidStore>>,
}

impl LifecycleCoordinator {
    /// Coordinator with the built-in stream and message protocols.
    pub fn new(config: NetConfig) -> Result<Self, NetError> {
        let stream = Arc::new(DefaultStreamProtocol::new(config.stream.max_frame_length));
        let message = Arc::new(DefaultMessageProtocol::new(Duration::from_millis(
            config.message.tick_ms.max(1),
        )));
        Self::with_protocols(config, stream, message)
    }

    /// Coordinator with caller-supplied protocol strategies.
    pub fn with_protocols(
        config: NetConfig,
        strategy: Arc<dyn ProtocolStrategy>,
        message_protocol: Arc<dyn MessageProtocol>,
    ) -> Result<Self, NetError> {
        let task_pool = TaskPool::new(&config.task_pool)?;
        Ok(Self {
            shared: Arc::new(CoordinatorShared {
                config,
                registry: Arc::new(ConnectionRegistry::new()),
                channels: ChannelSet::new(),
                strategy,
                message_protocol,
                task_pool,
            }),
            pid_store: None,
        })
    }

    /// Where `open_port` records the process id before binding.
    pub fn with_run_pid_store(mut self, store: Arc<dyn RunPidStore>) -> Self {
        self.pid_store = Some(store);
        self
    }

    /// Record the process id, then serve `port` with no auxiliary range.
    /// Blocks until the primary listener closes.
    pub fn open_port(&self, port: u16) {
        let pid = std::process::id();
        match &self.pid_store {
            Some(store) => {
                if let Err(e) = store.persist_run_pid(pid) {
                    tracing::warn!(pid, error = %e, "Failed to persist run pid");
                }
            }
            None => tracing::debug!(pid, "No run pid store configured"),
        }
        self.open_port_range(port, 1, 0);
    }

    /// Serve `port` plus every port in `[start, end]`. Blocks until the
    /// primary listener closes; must not be called from async context.
    pub fn open_port_range(&self, port: u16, start: u16, end: u16) {
        StreamListener::new(Arc::clone(&self.shared)).bind(port, start, end);
    }

    /// Serve the message transport on `port`. Blocks until `stop` or failure.
    pub fn start_udp(&self, port: u16) {
        ReliableMessageListener::new(Arc::clone(&self.shared)).run(port);
    }

    /// Connections held by the stream protocol strategy.
    pub fn connect_size(&self) -> usize {
        self.shared.strategy.connect_size()
    }

    /// Close every tracked channel. Sessions are cleared by each
    /// connection's own teardown as its channel closes.
    pub fn stop(&self) {
        let closed = self.shared.channels.close_all();
        tracing::info!(closed, "Stop requested, tracked channels closed");
    }

    /// Tear one connection down.
    pub fn clear(&self, ctx: &ChannelContext) {
        self.shared.clear(ctx);
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.shared.registry
    }

    pub fn tracked_channels(&self) -> &ChannelSet {
        &self.shared.channels
    }

    pub fn task_pool(&self) -> &TaskPool {
        &self.shared.task_pool
    }

    pub fn config(&self) -> &NetConfig {
        &self.shared.config
    }
}
