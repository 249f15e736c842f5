//! Shared utilities for integration tests.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::Bytes;
use game_netcore::config::schema::{MessageConfig, StreamConfig, TaskPoolConfig};
use game_netcore::net::channel::ChannelKind;
use game_netcore::protocol::{Packet, HANDSHAKE_ACK_PACKET, HANDSHAKE_PACKET};
use game_netcore::{LifecycleCoordinator, NetConfig};

/// Loopback config with small groups and a short grace period.
#[allow(dead_code)]
pub fn test_config() -> NetConfig {
    let mut config = NetConfig::default();
    config.server.bind_host = "127.0.0.1".to_string();
    config.stream = StreamConfig {
        acceptor_threads: 1,
        worker_threads: 2,
        shutdown_grace_secs: 1,
        ..StreamConfig::default()
    };
    config.message = MessageConfig {
        tick_ms: 5,
        retransmit_ms: 50,
        ..MessageConfig::default()
    };
    config.task_pool = TaskPoolConfig {
        threads: 2,
        queue_capacity: 64,
    };
    config
}

/// Poll `condition` until it holds or `timeout` elapses.
#[allow(dead_code)]
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

/// Run `open_port_range` on its own thread, as a server would.
#[allow(dead_code)]
pub fn spawn_stream(coordinator: &LifecycleCoordinator, port: u16, start: u16, end: u16) -> JoinHandle<()> {
    let coordinator = coordinator.clone();
    std::thread::spawn(move || coordinator.open_port_range(port, start, end))
}

/// Whether a stream listener on `port` is in the tracked set.
#[allow(dead_code)]
pub fn listening_on(coordinator: &LifecycleCoordinator, port: u16) -> bool {
    coordinator.tracked_channels().snapshot().iter().any(|channel| {
        channel.kind() == ChannelKind::StreamListener
            && channel.local_addr().map(|addr| addr.port()) == Some(port)
            && !channel.is_closed()
    })
}

/// Connect to a loopback port once its listener is up.
#[allow(dead_code)]
pub fn connect(port: u16) -> TcpStream {
    let addr: SocketAddr = ([127, 0, 0, 1], port).into();
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match TcpStream::connect_timeout(&addr, Duration::from_millis(200)) {
            Ok(stream) => {
                stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
                return stream;
            }
            Err(_) if Instant::now() < deadline => std::thread::sleep(Duration::from_millis(20)),
            Err(e) => panic!("could not connect to port {}: {}", port, e),
        }
    }
}

/// Send the handshake and wait for its acknowledgement.
#[allow(dead_code)]
pub fn handshake(stream: &mut TcpStream) {
    stream
        .write_all(&Packet::new(HANDSHAKE_PACKET, Bytes::new()).to_frame())
        .unwrap();
    let mut ack = [0u8; 8];
    stream.read_exact(&mut ack).unwrap();
    assert_eq!(u32::from_be_bytes([ack[0], ack[1], ack[2], ack[3]]), 4);
    assert_eq!(u32::from_be_bytes([ack[4], ack[5], ack[6], ack[7]]), HANDSHAKE_ACK_PACKET);
}
