//! Thread groups and the task offload pool.
//!
//! # Data Flow
//! ```text
//! acceptor group (4 threads)   → accept, set TCP_NODELAY, detach stream
//! worker group (core count)    → socket reads/writes, frame decoding
//!        │ bounded per-connection queue
//!        ▼
//! task pool (32 threads)       → handler / business logic
//! ```
//!
//! # Design Decisions
//! - Three independent tokio runtimes; slow handlers cannot stall accept or I/O
//! - Acceptor and worker groups live for one bind call; the task pool lives
//!   as long as its coordinator
//! - Group shutdown is graceful: close registered channels, refuse new
//!   tasks, wait for in-flight ones up to a grace period, then terminate

pub mod event_loop;
pub mod task_pool;

pub use event_loop::{EventLoopGroup, GroupHandle};
pub use task_pool::{TaskPool, TaskPoolError};
