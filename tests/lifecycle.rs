//! Stream listener and coordinator lifecycle tests.
//!
//! Every test uses its own fixed loopback ports.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use game_netcore::config::{ConfigError, RunPidStore};
use game_netcore::net::channel::ChannelContext;
use game_netcore::protocol::{
    ConnectionHandler, DefaultMessageProtocol, DefaultStreamProtocol, GameSession, HandlerChain, Packet, PacketCodec,
    PacketListener, ProtocolError, ProtocolStrategy,
};
use game_netcore::LifecycleCoordinator;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

mod common;

const WAIT: Duration = Duration::from_secs(5);

#[test]
fn handshake_on_primary_port_counts_one_connection() {
    let coordinator = LifecycleCoordinator::new(common::test_config()).unwrap();
    let server = common::spawn_stream(&coordinator, 5123, 5124, 5124);
    assert!(common::wait_until(WAIT, || common::listening_on(&coordinator, 5123)));

    let mut client = common::connect(5123);
    common::handshake(&mut client);

    assert_eq!(coordinator.connect_size(), 1);
    assert_eq!(coordinator.registry().len(), 1);

    coordinator.stop();
    server.join().unwrap();

    assert!(common::wait_until(WAIT, || coordinator.registry().is_empty()));
    assert!(common::wait_until(WAIT, || coordinator.connect_size() == 0));
}

#[test]
fn occupied_auxiliary_port_does_not_block_primary() {
    let _occupied = TcpListener::bind("127.0.0.1:5131").unwrap();

    let coordinator = LifecycleCoordinator::new(common::test_config()).unwrap();
    let server = common::spawn_stream(&coordinator, 5130, 5131, 5132);

    assert!(common::wait_until(WAIT, || common::listening_on(&coordinator, 5130)));
    assert!(common::wait_until(WAIT, || common::listening_on(&coordinator, 5132)));
    assert!(!common::listening_on(&coordinator, 5131));

    let mut client = common::connect(5130);
    common::handshake(&mut client);

    coordinator.stop();
    server.join().unwrap();
}

#[test]
fn occupied_primary_port_returns_without_panicking() {
    let _occupied = TcpListener::bind("127.0.0.1:5140").unwrap();

    let coordinator = LifecycleCoordinator::new(common::test_config()).unwrap();
    common::spawn_stream(&coordinator, 5140, 1, 0).join().unwrap();

    assert!(coordinator.tracked_channels().is_empty());
}

#[test]
fn stop_closes_every_tracked_channel() {
    let coordinator = LifecycleCoordinator::new(common::test_config()).unwrap();
    let server = common::spawn_stream(&coordinator, 5150, 5151, 5151);
    assert!(common::wait_until(WAIT, || common::listening_on(&coordinator, 5151)));

    let mut client = common::connect(5150);
    common::handshake(&mut client);
    // Two listeners plus the accepted connection.
    assert!(common::wait_until(WAIT, || coordinator.tracked_channels().len() == 3));

    let tracked = coordinator.tracked_channels().snapshot();
    coordinator.stop();
    assert!(tracked.iter().all(|channel| channel.is_closed()));

    server.join().unwrap();
    let mut rest = Vec::new();
    assert_eq!(client.read_to_end(&mut rest).unwrap(), 0);
}

#[test]
fn non_handshake_first_packet_closes_without_registering() {
    let coordinator = LifecycleCoordinator::new(common::test_config()).unwrap();
    let server = common::spawn_stream(&coordinator, 5160, 1, 0);
    assert!(common::wait_until(WAIT, || common::listening_on(&coordinator, 5160)));

    let mut client = common::connect(5160);
    client.write_all(&Packet::new(7, Bytes::from_static(b"hi")).to_frame()).unwrap();

    let mut rest = Vec::new();
    let _ = client.read_to_end(&mut rest);
    assert!(rest.is_empty());
    assert!(coordinator.registry().is_empty());
    assert!(common::wait_until(WAIT, || coordinator.connect_size() == 0));

    coordinator.stop();
    server.join().unwrap();
}

#[test]
fn peer_disconnect_clears_session() {
    let coordinator = LifecycleCoordinator::new(common::test_config()).unwrap();
    let server = common::spawn_stream(&coordinator, 5165, 1, 0);
    assert!(common::wait_until(WAIT, || common::listening_on(&coordinator, 5165)));

    let mut client = common::connect(5165);
    common::handshake(&mut client);
    assert_eq!(coordinator.registry().len(), 1);

    drop(client);
    assert!(common::wait_until(WAIT, || coordinator.registry().is_empty()));
    // Only the listener is left.
    assert!(common::wait_until(WAIT, || coordinator.tracked_channels().len() == 1));

    coordinator.stop();
    server.join().unwrap();
}

#[derive(Default)]
struct RecordingStore {
    pids: Mutex<Vec<u32>>,
}

impl RunPidStore for RecordingStore {
    fn persist_run_pid(&self, pid: u32) -> Result<(), ConfigError> {
        self.pids.lock().push(pid);
        Ok(())
    }
}

#[test]
fn open_port_persists_pid_before_binding() {
    let store = Arc::new(RecordingStore::default());
    let mut config = common::test_config();
    config.stream.port = 5170;
    let coordinator = LifecycleCoordinator::new(config)
        .unwrap()
        .with_run_pid_store(store.clone());

    let server = {
        let coordinator = coordinator.clone();
        std::thread::spawn(move || coordinator.open_port(5170))
    };
    assert!(common::wait_until(WAIT, || common::listening_on(&coordinator, 5170)));
    assert_eq!(*store.pids.lock(), vec![std::process::id()]);

    coordinator.stop();
    server.join().unwrap();
}

struct PanicOnPacket;

impl PacketListener for PanicOnPacket {
    fn on_packet(&self, _session: &Arc<GameSession>, packet: Packet) {
        panic!("listener failed on packet {}", packet.kind);
    }
}

#[test]
fn handler_panic_still_clears_session() {
    let config = common::test_config();
    let strategy = DefaultStreamProtocol::new(config.stream.max_frame_length).with_listener(Arc::new(PanicOnPacket));
    let coordinator = LifecycleCoordinator::with_protocols(
        config,
        Arc::new(strategy),
        Arc::new(DefaultMessageProtocol::new(Duration::from_millis(5))),
    )
    .unwrap();
    let server = common::spawn_stream(&coordinator, 5185, 1, 0);
    assert!(common::wait_until(WAIT, || common::listening_on(&coordinator, 5185)));

    let mut client = common::connect(5185);
    common::handshake(&mut client);
    assert_eq!(coordinator.registry().len(), 1);

    client.write_all(&Packet::new(42, Bytes::new()).to_frame()).unwrap();
    let mut rest = Vec::new();
    assert_eq!(client.read_to_end(&mut rest).unwrap(), 0);

    assert!(common::wait_until(WAIT, || coordinator.registry().is_empty()));
    assert!(common::wait_until(WAIT, || coordinator.tracked_channels().len() == 1));

    coordinator.stop();
    server.join().unwrap();
}

#[test]
fn zero_inbound_queue_still_serves_connections() {
    let mut config = common::test_config();
    config.stream.inbound_queue = 0;
    let coordinator = LifecycleCoordinator::new(config).unwrap();
    let server = common::spawn_stream(&coordinator, 5180, 1, 0);
    assert!(common::wait_until(WAIT, || common::listening_on(&coordinator, 5180)));

    let mut client = common::connect(5180);
    common::handshake(&mut client);
    assert_eq!(coordinator.registry().len(), 1);

    coordinator.stop();
    server.join().unwrap();
    assert!(common::wait_until(WAIT, || coordinator.registry().is_empty()));
}

/// Strategy whose handler parks on every packet until the gate closes.
struct GatedStrategy {
    gate: Arc<Semaphore>,
}

struct GatedHandler {
    gate: Arc<Semaphore>,
}

impl ProtocolStrategy for GatedStrategy {
    fn handler_chain(&self, _ctx: &ChannelContext) -> HandlerChain {
        HandlerChain::new(
            PacketCodec::new(1024),
            GatedHandler {
                gate: Arc::clone(&self.gate),
            },
        )
    }

    fn connect_size(&self) -> usize {
        0
    }
}

#[async_trait]
impl ConnectionHandler for GatedHandler {
    async fn packet_received(&mut self, _ctx: &ChannelContext, _packet: Packet) -> Result<(), ProtocolError> {
        let _ = self.gate.acquire().await;
        Ok(())
    }
}

#[test]
fn stop_closes_connection_while_handler_queue_is_full() {
    let gate = Arc::new(Semaphore::new(0));
    let mut config = common::test_config();
    config.stream.inbound_queue = 1;
    let coordinator = LifecycleCoordinator::with_protocols(
        config,
        Arc::new(GatedStrategy { gate: Arc::clone(&gate) }),
        Arc::new(DefaultMessageProtocol::new(Duration::from_millis(5))),
    )
    .unwrap();
    let server = common::spawn_stream(&coordinator, 5175, 1, 0);
    assert!(common::wait_until(WAIT, || common::listening_on(&coordinator, 5175)));

    let mut client = common::connect(5175);
    let mut frames = Vec::new();
    for kind in 0..16 {
        frames.extend_from_slice(&Packet::new(kind, Bytes::from_static(b"x")).to_frame());
    }
    client.write_all(&frames).unwrap();
    std::thread::sleep(Duration::from_millis(200));

    coordinator.stop();
    let mut rest = Vec::new();
    assert_eq!(client.read_to_end(&mut rest).unwrap(), 0);

    server.join().unwrap();
    gate.close();
    assert!(common::wait_until(WAIT, || coordinator.tracked_channels().is_empty()));
}
