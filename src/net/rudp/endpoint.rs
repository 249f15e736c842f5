//! Endpoint: one UDP socket, its virtual connections and the driver thread.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam::channel::{Sender, TrySendError};
use dashmap::DashMap;

use super::connection::Connection;
use super::packet::{Segment, SegmentKind};
use super::{RudpOptions, MAX_DATAGRAM};

pub(crate) enum Role {
    /// Creates connections on SYN and hands them to `accept`.
    Server { accepted: Sender<Arc<Connection>> },
    /// Talks to exactly one peer.
    Client,
}

pub(crate) struct Endpoint {
    pub(crate) socket: Arc<UdpSocket>,
    pub(crate) options: RudpOptions,
    pub(crate) connections: DashMap<SocketAddr, Arc<Connection>>,
    role: Role,
    closed: AtomicBool,
}

impl Endpoint {
    pub(crate) fn new(socket: UdpSocket, options: RudpOptions, role: Role) -> io::Result<Arc<Self>> {
        socket.set_read_timeout(Some(options.tick))?;
        Ok(Arc::new(Self {
            socket: Arc::new(socket),
            options,
            connections: DashMap::new(),
            role,
            closed: AtomicBool::new(false),
        }))
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close every connection and stop the driver. Returns true on the first call.
    pub(crate) fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let connections: Vec<_> = self.connections.iter().map(|entry| Arc::clone(entry.value())).collect();
        for connection in connections {
            connection.close();
        }
        self.connections.clear();
        true
    }

    pub(crate) fn forget(&self, peer: &SocketAddr) {
        self.connections.remove(peer);
    }

    /// Driver loop; returns once the endpoint is closed.
    pub(crate) fn drive(self: Arc<Self>) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let mut last_tick = Instant::now();

        while !self.is_closed() {
            match self.socket.recv_from(&mut buf) {
                Ok((len, from)) => self.dispatch(&buf[..len], from),
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
                // ICMP port-unreachable surfaces here on some platforms.
                Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {}
                Err(e) => {
                    tracing::debug!(error = %e, "Message endpoint receive failed");
                }
            }

            if last_tick.elapsed() >= self.options.tick {
                let now = Instant::now();
                self.connections.retain(|_, connection| connection.tick(now));
                last_tick = now;
            }
        }
        tracing::trace!("Message endpoint driver stopped");
    }

    fn dispatch(&self, datagram: &[u8], from: SocketAddr) {
        let segment = match Segment::decode(datagram) {
            Ok(segment) => segment,
            Err(e) => {
                tracing::trace!(peer = %from, error = %e, "Dropping malformed datagram");
                return;
            }
        };

        let existing = self.connections.get(&from).map(|entry| Arc::clone(entry.value()));
        match (existing, segment.kind) {
            (Some(connection), SegmentKind::Syn) => connection.send_control(SegmentKind::SynAck, 0),
            (Some(connection), _) => connection.on_segment(segment),
            (None, SegmentKind::Syn) => self.open_inbound(from),
            (None, SegmentKind::Data) => {
                let _ = self.socket.send_to(&Segment::control(SegmentKind::Fin, 0).encode(), from);
            }
            (None, _) => {}
        }
    }

    fn open_inbound(&self, from: SocketAddr) {
        let Role::Server { accepted } = &self.role else {
            return;
        };
        let connection = Connection::new(from, Arc::clone(&self.socket), self.options.clone());
        match accepted.try_send(Arc::clone(&connection)) {
            Ok(()) => {
                self.connections.insert(from, Arc::clone(&connection));
                connection.send_control(SegmentKind::SynAck, 0);
                tracing::trace!(peer = %from, "Virtual connection opened");
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!(peer = %from, "Message accept backlog full, refusing connection");
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}
