//! Task offload pool.
//!
//! A fixed-size executor for handler and business logic, decoupled from the
//! I/O groups. Submission is bounded: each task holds a permit until it
//! finishes, so at most `queue_capacity` tasks are queued or running.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::{Semaphore, TryAcquireError};

use crate::config::schema::TaskPoolConfig;
use crate::error::NetError;

/// Why a task was refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskPoolError {
    #[error("task pool saturated ({capacity} tasks queued or running)")]
    Saturated { capacity: usize },
    #[error("task pool is shut down")]
    Closed,
}

/// Bounded executor for offloaded work.
pub struct TaskPool {
    handle: Handle,
    runtime: Option<Runtime>,
    permits: Arc<Semaphore>,
    capacity: usize,
    threads: usize,
}

impl TaskPool {
    pub fn new(config: &TaskPoolConfig) -> Result<Self, NetError> {
        let threads = config.threads.max(1);
        let capacity = config.queue_capacity.max(1);
        let thread_seq = Arc::new(AtomicUsize::new(0));
        let runtime = Builder::new_multi_thread()
            .worker_threads(threads)
            .thread_name_fn(move || format!("task-pool-{}", thread_seq.fetch_add(1, Ordering::Relaxed)))
            .enable_all()
            .build()
            .map_err(|source| NetError::Runtime { group: "task-pool", source })?;

        tracing::debug!(threads, capacity, "Task pool started");

        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            threads,
        })
    }

    /// Submit without waiting. Fails when saturated or shut down.
    pub fn try_spawn<F>(&self, task: F) -> Result<(), TaskPoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .try_acquire_owned()
            .map_err(|e| match e {
                TryAcquireError::NoPermits => TaskPoolError::Saturated { capacity: self.capacity },
                TryAcquireError::Closed => TaskPoolError::Closed,
            })?;
        self.handle.spawn(async move {
            let _permit = permit;
            task.await;
        });
        Ok(())
    }

    /// Submit, waiting for a free slot.
    pub async fn spawn<F>(&self, task: F) -> Result<(), TaskPoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| TaskPoolError::Closed)?;
        self.handle.spawn(async move {
            let _permit = permit;
            task.await;
        });
        Ok(())
    }

    /// Tasks currently queued or running.
    pub fn pending(&self) -> usize {
        self.capacity - self.permits.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Refuse new tasks. Running tasks keep going until the pool is dropped.
    pub fn shutdown(&self) {
        self.permits.close();
    }

    pub fn is_shutdown(&self) -> bool {
        self.permits.is_closed()
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        self.permits.close();
        if let Some(runtime) = self.runtime.take() {
            // May run on one of the pool's own threads; never block here.
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn pool(threads: usize, queue_capacity: usize) -> TaskPool {
        TaskPool::new(&TaskPoolConfig { threads, queue_capacity }).unwrap()
    }

    #[test]
    fn runs_tasks_off_the_caller_thread() {
        let pool = pool(2, 8);
        let (tx, rx) = std::sync::mpsc::channel();
        pool.try_spawn(async move {
            let _ = tx.send(std::thread::current().name().map(str::to_string));
        })
        .unwrap();

        let name = rx.recv_timeout(Duration::from_secs(2)).unwrap().unwrap();
        assert!(name.starts_with("task-pool-"));
    }

    #[test]
    fn refuses_when_saturated_and_recovers() {
        let pool = pool(1, 1);
        let (release_tx, release_rx) = oneshot::channel::<()>();
        pool.try_spawn(async move {
            let _ = release_rx.await;
        })
        .unwrap();

        assert_eq!(pool.pending(), 1);
        assert_eq!(pool.try_spawn(async {}), Err(TaskPoolError::Saturated { capacity: 1 }));

        release_tx.send(()).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while pool.pending() > 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(pool.try_spawn(async {}).is_ok());
    }

    #[test]
    fn shutdown_refuses_new_tasks() {
        let pool = pool(1, 4);
        pool.shutdown();
        assert!(pool.is_shutdown());
        assert_eq!(pool.try_spawn(async {}), Err(TaskPoolError::Closed));
    }
}
