//! Dual-transport connection lifecycle core for a game server.
//!
//! One `LifecycleCoordinator` owns a byte-stream listener (primary port plus
//! optional auxiliary range), a reliable message listener over UDP, the
//! executor groups behind them and the connection registry every other
//! subsystem uses to find sessions.

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod pool;
pub mod protocol;
pub mod session;

pub use config::schema::NetConfig;
pub use error::NetError;
pub use lifecycle::LifecycleCoordinator;
pub use session::{ConnectionRegistry, Session};
