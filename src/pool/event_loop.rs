//! Acceptor and worker thread groups.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;

use crate::error::NetError;
use crate::net::backend::Backend;
use crate::net::channel::{Channel, ChannelId, ChannelSet};
use crate::net::connection::ConnectionTracker;

/// A named multi-threaded event loop group.
pub struct EventLoopGroup {
    handle: GroupHandle,
    runtime: Option<Runtime>,
}

/// Cloneable view of a group used to spawn onto it and register channels.
#[derive(Clone)]
pub struct GroupHandle {
    name: &'static str,
    handle: Handle,
    in_flight: ConnectionTracker,
    channels: ChannelSet,
    accepting: Arc<AtomicBool>,
}

impl EventLoopGroup {
    /// Build a group of `threads` threads (at least one).
    pub fn new(name: &'static str, threads: usize, backend: Backend) -> Result<Self, NetError> {
        let threads = threads.max(1);
        let thread_seq = Arc::new(AtomicUsize::new(0));
        let runtime = Builder::new_multi_thread()
            .worker_threads(threads)
            .thread_name_fn(move || {
                let n = thread_seq.fetch_add(1, Ordering::Relaxed);
                format!("{}-{}-{}", name, backend, n)
            })
            .enable_all()
            .build()
            .map_err(|source| NetError::Runtime { group: name, source })?;

        tracing::debug!(group = name, threads, backend = %backend, "Event loop group started");

        Ok(Self {
            handle: GroupHandle {
                name,
                handle: runtime.handle().clone(),
                in_flight: ConnectionTracker::new(),
                channels: ChannelSet::new(),
                accepting: Arc::new(AtomicBool::new(true)),
            },
            runtime: Some(runtime),
        })
    }

    pub fn handle(&self) -> GroupHandle {
        self.handle.clone()
    }

    pub fn name(&self) -> &'static str {
        self.handle.name
    }

    /// Stop accepting work, close registered channels, let in-flight tasks
    /// finish within `grace`, then terminate the threads.
    ///
    /// Blocks the calling thread; must not be called from async context.
    pub fn shutdown_gracefully(mut self, grace: Duration) {
        let group = &self.handle;
        group.accepting.store(false, Ordering::SeqCst);
        let closed = group.channels.close_all();

        let deadline = Instant::now() + grace;
        let in_flight = group.in_flight.clone();
        group.handle.block_on(async move {
            while in_flight.active_count() > 0 && Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        let abandoned = group.in_flight.active_count();
        if abandoned > 0 {
            tracing::warn!(group = group.name, abandoned, "Grace period elapsed with tasks still running");
        }
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(Duration::from_millis(100));
        }
        tracing::info!(group = self.handle.name, closed_channels = closed, "Event loop group shut down");
    }
}

impl Drop for EventLoopGroup {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            self.handle.accepting.store(false, Ordering::SeqCst);
            self.handle.channels.close_all();
            runtime.shutdown_background();
        }
    }
}

impl GroupHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Spawn a tracked task. Returns `None` once the group is shutting down.
    pub fn spawn<F>(&self, future: F) -> Option<JoinHandle<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        if !self.is_accepting() {
            return None;
        }
        let guard = self.in_flight.track();
        Some(self.handle.spawn(async move {
            let _guard = guard;
            future.await
        }))
    }

    /// Run `future` to completion on this group from a non-async thread.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.handle.block_on(future)
    }

    /// Enter the group's runtime context (needed to register sockets).
    pub fn enter(&self) -> tokio::runtime::EnterGuard<'_> {
        self.handle.enter()
    }

    /// Register a channel to be closed when the group shuts down.
    pub fn register(&self, channel: Arc<Channel>) {
        self.channels.insert(channel);
    }

    pub fn deregister(&self, id: &ChannelId) {
        self.channels.remove(id);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.active_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::channel::ChannelKind;

    #[test]
    fn graceful_shutdown_waits_for_in_flight() {
        let group = EventLoopGroup::new("test", 2, Backend::Portable).unwrap();
        let handle = group.handle();
        let finished = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&finished);
        handle
            .spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                flag.store(true, Ordering::SeqCst);
            })
            .unwrap();

        group.shutdown_gracefully(Duration::from_secs(2));
        assert!(finished.load(Ordering::SeqCst));
        assert!(!handle.is_accepting());
        assert!(handle.spawn(async {}).is_none());
    }

    #[test]
    fn shutdown_closes_registered_channels() {
        let group = EventLoopGroup::new("test", 1, Backend::Portable).unwrap();
        let handle = group.handle();
        let channel = Channel::new(ChannelKind::Stream, None, None);
        handle.register(Arc::clone(&channel));

        // A task that only ends once its channel closes.
        let watched = Arc::clone(&channel);
        handle.spawn(async move { watched.closed().await }).unwrap();

        group.shutdown_gracefully(Duration::from_secs(2));
        assert!(channel.is_closed());
        assert_eq!(handle.in_flight(), 0);
    }

    #[test]
    fn threads_are_named_after_group_and_backend() {
        let group = EventLoopGroup::new("worker", 1, Backend::Epoll).unwrap();
        let name = group
            .handle()
            .block_on(async {
                tokio::spawn(async { std::thread::current().name().map(str::to_string) })
                    .await
                    .unwrap()
            })
            .unwrap();
        assert!(name.starts_with("worker-epoll-"), "unexpected thread name {name}");
        group.shutdown_gracefully(Duration::from_millis(100));
    }
}
