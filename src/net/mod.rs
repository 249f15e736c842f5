//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Stream transport:
//!     backend.rs (pick the I/O backend label)
//!     → listener.rs (acceptor group: bind, accept, connection limit)
//!     → connection.rs (worker group: decode/write; task pool: handler)
//!     → LifecycleCoordinator::clear on teardown
//!
//! Message transport:
//!     rudp/ (reliable virtual connections over UDP)
//!     → message_listener.rs (blocking accept loop, one thread per connection)
//!     → LifecycleCoordinator::clear on teardown
//! ```
//!
//! # Design Decisions
//! - Every listening and accepted channel is tracked for bulk `stop`
//! - Per-connection queues are bounded on both directions

pub mod backend;
pub mod channel;
pub mod connection;
pub mod listener;
pub mod message_listener;
pub mod rudp;
