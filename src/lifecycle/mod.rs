//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     open_port(port) → persist run pid → open_port_range(port, 1, 0)
//!     start_udp(port) on a caller-supplied thread
//!
//! Teardown (coordinator.rs):
//!     connection ends → clear(ctx) → disconnect or force-close → deregister
//!
//! Shutdown (signals.rs):
//!     SIGTERM/SIGINT → stop() → every tracked channel closes
//!         → accept loops end → groups shut down gracefully
//! ```

pub mod coordinator;
pub mod signals;

pub use coordinator::LifecycleCoordinator;
