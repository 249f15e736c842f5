//! Transport backend selection.
//!
//! # Responsibilities
//! - Report which OS readiness backend the host offers
//! - Pick the most efficient one, falling back to the portable poller
//!
//! # Design Decisions
//! - Selection is a pure function of `HostCapabilities` so it can be tested
//!   without touching sockets
//! - Only `select_backend` (the probing wrapper) logs

use std::fmt;

/// I/O multiplexing backend used to label and size the event loop groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    Epoll,
    Kqueue,
    Iocp,
    /// Portable readiness polling, available everywhere.
    Portable,
}

impl Backend {
    /// Pick the best backend the host supports.
    pub fn for_host(caps: &HostCapabilities) -> Backend {
        if caps.epoll {
            Backend::Epoll
        } else if caps.kqueue {
            Backend::Kqueue
        } else if caps.iocp {
            Backend::Iocp
        } else {
            Backend::Portable
        }
    }

    /// Whether this backend is the portable fallback.
    pub fn is_fallback(&self) -> bool {
        matches!(self, Backend::Portable)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Epoll => "epoll",
            Backend::Kqueue => "kqueue",
            Backend::Iocp => "iocp",
            Backend::Portable => "poll",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Native backends available on the current host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostCapabilities {
    pub epoll: bool,
    pub kqueue: bool,
    pub iocp: bool,
}

impl HostCapabilities {
    /// Probe the compile target for native backends.
    pub fn probe() -> Self {
        Self {
            epoll: cfg!(any(target_os = "linux", target_os = "android")),
            kqueue: cfg!(any(
                target_os = "macos",
                target_os = "ios",
                target_os = "freebsd",
                target_os = "openbsd",
                target_os = "netbsd",
                target_os = "dragonfly"
            )),
            iocp: cfg!(windows),
        }
    }

    /// A host with no native backend.
    pub fn portable_only() -> Self {
        Self::default()
    }
}

/// Probe the host and select a backend, logging when falling back.
///
/// `force_portable` pins the portable backend regardless of the host.
pub fn select_backend(force_portable: bool) -> Backend {
    let caps = if force_portable {
        HostCapabilities::portable_only()
    } else {
        HostCapabilities::probe()
    };
    let backend = Backend::for_host(&caps);
    if backend.is_fallback() {
        tracing::warn!(backend = %backend, "Native I/O backend unavailable, falling back; efficiency may be reduced");
    } else {
        tracing::debug!(backend = %backend, "Native I/O backend selected");
    }
    backend
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_native_backend() {
        let caps = HostCapabilities { epoll: true, kqueue: false, iocp: false };
        assert_eq!(Backend::for_host(&caps), Backend::Epoll);

        let caps = HostCapabilities { epoll: false, kqueue: true, iocp: false };
        assert_eq!(Backend::for_host(&caps), Backend::Kqueue);

        let caps = HostCapabilities { epoll: false, kqueue: false, iocp: true };
        assert_eq!(Backend::for_host(&caps), Backend::Iocp);
    }

    #[test]
    fn falls_back_to_portable() {
        let backend = Backend::for_host(&HostCapabilities::portable_only());
        assert_eq!(backend, Backend::Portable);
        assert!(backend.is_fallback());
    }

    #[test]
    fn selection_is_deterministic() {
        assert_eq!(select_backend(false), select_backend(false));
        assert_eq!(select_backend(true), Backend::Portable);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn linux_probes_epoll() {
        assert_eq!(select_backend(false), Backend::Epoll);
    }
}
