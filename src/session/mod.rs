//! Session handles and the connection registry.
//!
//! # Data Flow
//! ```text
//! protocol strategy completes handshake
//!     → registry.put(identity, session)
//!     → broadcast / admin code iterates registry in insertion order
//!
//! teardown (peer close, protocol error, stop)
//!     → LifecycleCoordinator::clear(ctx)
//!     → session.disconnect() or raw channel close
//!     → registry.remove(identity)   (always)
//! ```

pub mod registry;

pub use registry::ConnectionRegistry;

/// A higher-level session bound to one connection.
///
/// `disconnect` must be idempotent: teardown can be requested concurrently by
/// the peer, a protocol error and an administrative stop.
pub trait Session: Send + Sync {
    fn disconnect(&self);
}
