//! Error types for the listener boundary.
//!
//! None of these escape `LifecycleCoordinator::open_port*` or `start_udp`;
//! they are built at the point of failure, logged with context, and dropped.

use thiserror::Error;

use crate::net::rudp::RudpError;

/// Failures raised while opening or running a listener.
#[derive(Debug, Error)]
pub enum NetError {
    /// The wait on the primary listening channel was interrupted.
    #[error("wait on primary channel (port {port}) interrupted: {reason}")]
    InterruptedWait { port: u16, reason: String },

    /// The port is already occupied.
    #[error("port {port} already in use: {source}")]
    AddressInUse {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// Any other bind failure (permission, bad address, ...).
    #[error("failed to bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// The message-oriented listener failed to open or its accept loop failed.
    #[error("message transport start error: {0}")]
    MessageTransportStart(#[from] RudpError),

    /// A thread group or executor could not be built.
    #[error("failed to build {group} runtime: {source}")]
    Runtime {
        group: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl NetError {
    /// Classify a bind failure for `port`.
    pub fn bind(port: u16, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::AddrInUse {
            NetError::AddressInUse { port, source }
        } else {
            NetError::Bind { port, source }
        }
    }

    /// Short label used in logs and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            NetError::InterruptedWait { .. } => "interrupted",
            NetError::AddressInUse { .. } => "address_in_use",
            NetError::Bind { .. } => "bind",
            NetError::MessageTransportStart(_) => "message_transport",
            NetError::Runtime { .. } => "runtime",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error, ErrorKind};

    #[test]
    fn bind_classifies_addr_in_use() {
        let err = NetError::bind(5123, Error::from(ErrorKind::AddrInUse));
        assert!(matches!(err, NetError::AddressInUse { port: 5123, .. }));
        assert_eq!(err.kind(), "address_in_use");

        let err = NetError::bind(80, Error::from(ErrorKind::PermissionDenied));
        assert!(matches!(err, NetError::Bind { port: 80, .. }));
    }
}
