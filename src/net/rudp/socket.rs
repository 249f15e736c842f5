//! Blocking server and connection sockets.

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use parking_lot::Mutex;

use super::connection::{Connection, Status};
use super::endpoint::{Endpoint, Role};
use super::packet::{Segment, SegmentKind};
use super::{RudpError, RudpOptions};

fn spawn_driver(endpoint: &Arc<Endpoint>, name: String) -> Result<JoinHandle<()>, RudpError> {
    let endpoint = Arc::clone(endpoint);
    Ok(std::thread::Builder::new().name(name).spawn(move || endpoint.drive())?)
}

/// Listening socket of the message transport.
pub struct ReliableServerSocket {
    endpoint: Arc<Endpoint>,
    accepted: Receiver<Arc<Connection>>,
    local_addr: SocketAddr,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl ReliableServerSocket {
    pub fn bind<A: ToSocketAddrs>(addr: A, options: RudpOptions) -> Result<Self, RudpError> {
        let socket = UdpSocket::bind(addr)?;
        let local_addr = socket.local_addr()?;
        let (accepted_tx, accepted) = channel::bounded(options.backlog);
        let endpoint = Endpoint::new(socket, options, Role::Server { accepted: accepted_tx })?;
        let driver = spawn_driver(&endpoint, format!("rudp-server-{}", local_addr.port()))?;

        tracing::debug!(addr = %local_addr, "Message endpoint bound");

        Ok(Self {
            endpoint,
            accepted,
            local_addr,
            driver: Mutex::new(Some(driver)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Block until a peer connects or the socket is closed.
    pub fn accept(&self) -> Result<ReliableSocket, RudpError> {
        loop {
            if let Some(socket) = self.accept_timeout(self.endpoint.options.tick)? {
                return Ok(socket);
            }
        }
    }

    /// Wait up to `timeout` for a peer. `Ok(None)` on timeout.
    pub fn accept_timeout(&self, timeout: Duration) -> Result<Option<ReliableSocket>, RudpError> {
        if self.endpoint.is_closed() {
            return Err(RudpError::Closed);
        }
        match self.accepted.recv_timeout(timeout) {
            Ok(connection) => Ok(Some(ReliableSocket {
                connection,
                endpoint: Arc::clone(&self.endpoint),
                driver: None,
            })),
            Err(RecvTimeoutError::Timeout) if self.endpoint.is_closed() => Err(RudpError::Closed),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(RudpError::Closed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.endpoint.is_closed()
    }

    /// Stop accepting and close every virtual connection. Idempotent.
    pub fn close(&self) {
        if self.endpoint.close() {
            tracing::debug!(addr = %self.local_addr, "Message endpoint closed");
        }
        if let Some(driver) = self.driver.lock().take() {
            let _ = driver.join();
        }
    }
}

impl Drop for ReliableServerSocket {
    fn drop(&mut self) {
        self.close();
    }
}

/// One virtual connection, either accepted by a server socket or dialed
/// with `connect`.
pub struct ReliableSocket {
    connection: Arc<Connection>,
    endpoint: Arc<Endpoint>,
    /// Set for dialed sockets, which own their endpoint.
    driver: Option<JoinHandle<()>>,
}

impl ReliableSocket {
    /// Dial a server socket and complete the SYN exchange.
    pub fn connect(addr: SocketAddr, options: RudpOptions) -> Result<Self, RudpError> {
        let bind: SocketAddr = if addr.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(bind)?;
        socket.set_read_timeout(Some(options.retransmit))?;

        let syn = Segment::control(SegmentKind::Syn, 0).encode();
        let mut buf = [0u8; 64];
        let mut established = false;
        'attempts: for _ in 0..=options.max_retries {
            socket.send_to(&syn, addr)?;
            let deadline = Instant::now() + options.retransmit;
            while Instant::now() < deadline {
                match socket.recv_from(&mut buf) {
                    Ok((len, from)) if from == addr => {
                        if matches!(Segment::decode(&buf[..len]), Ok(s) if s.kind == SegmentKind::SynAck) {
                            established = true;
                            break 'attempts;
                        }
                    }
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        }
        if !established {
            return Err(RudpError::ConnectTimeout(addr));
        }

        let local = socket.local_addr()?;
        let endpoint = Endpoint::new(socket, options.clone(), Role::Client)?;
        let connection = Connection::new(addr, Arc::clone(&endpoint.socket), options);
        endpoint.connections.insert(addr, Arc::clone(&connection));
        let driver = spawn_driver(&endpoint, format!("rudp-client-{}", local.port()))?;

        Ok(Self {
            connection,
            endpoint,
            driver: Some(driver),
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.connection.peer()
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RudpError> {
        Ok(self.endpoint.socket.local_addr()?)
    }

    /// Send one message. Blocks while the send window is full.
    pub fn send(&self, message: &[u8]) -> Result<(), RudpError> {
        self.connection.send(Bytes::copy_from_slice(message))
    }

    /// Block until a message arrives or the connection ends.
    pub fn recv(&self) -> Result<Bytes, RudpError> {
        loop {
            if let Some(message) = self.recv_timeout(self.endpoint.options.tick)? {
                return Ok(message);
            }
        }
    }

    /// Wait up to `timeout` for a message. Messages delivered before the
    /// connection ended are still returned.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Bytes>, RudpError> {
        self.connection.recv_timeout(timeout)
    }

    pub fn is_closed(&self) -> bool {
        self.connection.status() != Status::Open || self.endpoint.is_closed()
    }

    /// Close the connection and notify the peer. Idempotent.
    pub fn close(&mut self) {
        self.connection.close();
        self.endpoint.forget(&self.connection.peer());
        if let Some(driver) = self.driver.take() {
            self.endpoint.close();
            let _ = driver.join();
        }
    }
}

impl Drop for ReliableSocket {
    fn drop(&mut self) {
        self.close();
    }
}
