//! End-to-end scenarios through the public `Network` API, with loopback
//! listeners standing in for remote peers.

mod common;

use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use btcnet_messages::codec::ipv4;
use btcnet_messages::{level, AddressItem, Payload, Ping, Pong, VersionAcknowledge};
use btcnet_network::{Error, Network};

use common::{
    endpoint_of, frame_of, peer_version_with_nonce, raw_frame, read_frame, test_settings,
    write_frame, MockPeer,
};

fn temp_dir(tag: &str) -> PathBuf {
    let directory = std::env::temp_dir().join(format!(
        "btcnet-{}-{}-{}",
        tag,
        std::process::id(),
        rand::random::<u32>()
    ));
    std::fs::create_dir_all(&directory).expect("create temp dir");
    directory
}

fn write_hosts_cache(directory: &std::path::Path, items: &[AddressItem]) {
    let serialized = serde_json::to_string(items).expect("serialize hosts");
    std::fs::write(directory.join("hosts.cache"), serialized).expect("write hosts");
}

fn start_and_run(network: &Network) {
    let (tx, rx) = mpsc::channel();
    network.start(move |result| tx.send(result).unwrap());
    assert_eq!(rx.recv_timeout(Duration::from_secs(10)).unwrap(), Ok(()));

    let (tx, rx) = mpsc::channel();
    network.run(move |result| tx.send(result).unwrap());
    assert_eq!(rx.recv_timeout(Duration::from_secs(10)).unwrap(), Ok(()));
}

fn wait_until(what: &str, timeout: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return;
        }
        std::thread::sleep(Duration::from_millis(25));
    }
    panic!("timed out waiting for {what}");
}

/// An address that was bound a moment ago and is now free.
fn dead_authority() -> btcnet_network::Authority {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    btcnet_network::Authority::from(listener.local_addr().unwrap())
}

// Manual connect to an unreachable host: the completer sees the first
// failure, and a delayed second attempt follows on the retry timer.

#[test]
fn test_manual_connect_reports_failure_then_retries() {
    let mut settings = test_settings();
    settings.host_pool_capacity = 0;
    settings.retry_timeout_seconds = 1;
    let mut network = Network::new(settings);
    start_and_run(&network);

    let target = dead_authority();
    let (tx, rx) = mpsc::channel();
    network.connect_with(endpoint_of(target), move |result| {
        tx.send(result.map(|_| ())).unwrap();
    });

    // First attempt outcome reaches the completer.
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(5)).unwrap(),
        Err(Error::ConnectFailed)
    );
    let reported = Instant::now();

    // Rebind the port; the retry (at 50-100% of retry_timeout) lands here.
    let listener = TcpListener::bind(std::net::SocketAddr::from(target)).unwrap();
    listener
        .set_nonblocking(true)
        .expect("nonblocking listener");

    let mut accepted_at = None;
    wait_until("retry connection", Duration::from_secs(5), || {
        match listener.accept() {
            Ok(_) => {
                accepted_at = Some(Instant::now());
                true
            }
            Err(_) => false,
        }
    });

    let elapsed = accepted_at.unwrap() - reported;
    assert!(
        elapsed >= Duration::from_millis(300),
        "retry arrived too early: {elapsed:?}"
    );

    network.close();
}

// Stopping the service cancels the manual retry cycle.

#[test]
fn test_close_terminates_pending_retry() {
    let mut settings = test_settings();
    settings.host_pool_capacity = 0;
    settings.retry_timeout_seconds = 30;
    let mut network = Network::new(settings);
    start_and_run(&network);

    let (tx, rx) = mpsc::channel();
    network.connect_with(endpoint_of(dead_authority()), move |result| {
        tx.send(result.map(|_| ())).unwrap();
    });
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(5)).unwrap(),
        Err(Error::ConnectFailed)
    );

    // With a 30s retry pending, close must still return promptly.
    let closing = Instant::now();
    network.close();
    assert!(closing.elapsed() < Duration::from_secs(15));
}

// Inbound with no inbound_connections: run succeeds and nothing listens.

#[test]
fn test_inbound_disabled_binds_nothing() {
    let bind = dead_authority();

    let mut settings = test_settings();
    settings.host_pool_capacity = 0;
    settings.inbound_connections = 0;
    settings.binds = vec![bind];
    let mut network = Network::new(settings);
    start_and_run(&network);

    // The configured bind was never opened.
    assert!(std::net::TcpStream::connect_timeout(
        &std::net::SocketAddr::from(bind),
        Duration::from_millis(500)
    )
    .is_err());

    network.close();
}

// Outbound session: pool address, handshake against a live peer, channel
// counted and announced exactly once.

#[test]
fn test_outbound_channel_started_and_announced() {
    let peer = MockPeer::start();
    let directory = temp_dir("outbound");
    write_hosts_cache(&directory, &[peer.address_item()]);

    let mut settings = test_settings();
    settings.path = directory.clone();
    settings.outbound_connections = 1;
    settings.connect_batch_size = 1;
    let mut network = Network::new(settings);

    let (announce_tx, announce_rx) = mpsc::channel();
    let (key_tx, key_rx) = mpsc::channel();
    network.subscribe_connect(
        move |event| {
            if let Ok(channel) = event {
                announce_tx.send(channel.authority()).unwrap();
            }
            true
        },
        move |result| key_tx.send(result).unwrap(),
    );

    start_and_run(&network);
    assert!(key_rx.recv_timeout(Duration::from_secs(5)).unwrap().is_ok());

    wait_until("outbound channel", Duration::from_secs(10), || {
        network.channel_count() == 1
    });

    let announced = announce_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(announced, peer.authority);
    assert_eq!(peer.connection_count(), 1);
    assert_eq!(network.reserved_count(), 1);

    // Exactly one announcement for the single slot.
    assert!(announce_rx.recv_timeout(Duration::from_millis(300)).is_err());

    network.close();
    std::fs::remove_dir_all(directory).ok();
}

// Seed session: an empty pool fills from a seed peer's getaddr reply.

#[test]
fn test_seeding_fills_host_pool() {
    let batch: Vec<AddressItem> = (0..50)
        .map(|index| AddressItem {
            timestamp: 1_700_000_000,
            services: 0,
            ip: ipv4(203, 0, 113, index as u8),
            port: 8333,
        })
        .collect();
    let seed = MockPeer::with_addresses(batch);

    let directory = temp_dir("seeding");
    let mut settings = test_settings();
    settings.path = directory.clone();
    settings.host_pool_capacity = 64;
    settings.outbound_connections = 4;
    settings.connect_batch_size = 2;
    settings.seeds = vec![endpoint_of(seed.authority)];

    let network = Network::new(settings);
    let (tx, rx) = mpsc::channel();
    network.start(move |result| tx.send(result).unwrap());

    assert_eq!(rx.recv_timeout(Duration::from_secs(10)).unwrap(), Ok(()));
    assert!(network.address_count() >= 8);
    // Seed channels are quiet: never counted.
    assert_eq!(network.channel_count(), 0);

    drop(network);
    std::fs::remove_dir_all(directory).ok();
}

// Seeding with no seeds configured fails; an already-sufficient pool is
// reported as success.

#[test]
fn test_seeding_without_seeds_fails() {
    let directory = temp_dir("no-seeds");
    let mut settings = test_settings();
    settings.path = directory.clone();
    settings.outbound_connections = 2;
    settings.host_pool_capacity = 16;
    settings.seeds = Vec::new();

    let network = Network::new(settings);
    let (tx, rx) = mpsc::channel();
    network.start(move |result| tx.send(result).unwrap());

    assert_eq!(
        rx.recv_timeout(Duration::from_secs(10)).unwrap(),
        Err(Error::SeedingUnsuccessful)
    );

    drop(network);
    std::fs::remove_dir_all(directory).ok();
}

#[test]
fn test_sufficient_pool_bypasses_seeding() {
    let directory = temp_dir("bypass");
    let items: Vec<AddressItem> = (0..4)
        .map(|index| AddressItem {
            timestamp: 1_700_000_000,
            services: 0,
            ip: ipv4(198, 51, 100, index as u8),
            port: 8333,
        })
        .collect();
    write_hosts_cache(&directory, &items);

    let mut settings = test_settings();
    settings.path = directory.clone();
    settings.host_pool_capacity = 16;
    settings.outbound_connections = 2;
    settings.connect_batch_size = 1;
    // Seeds configured but unnecessary; no peer is listening on them, so
    // success proves the bypass.
    settings.seeds = vec![endpoint_of(dead_authority())];

    let network = Network::new(settings);
    let (tx, rx) = mpsc::channel();
    network.start(move |result| tx.send(result).unwrap());

    assert_eq!(rx.recv_timeout(Duration::from_secs(10)).unwrap(), Ok(()));

    drop(network);
    std::fs::remove_dir_all(directory).ok();
}

// Loopback rejection: an accepted connection presenting one of our own
// outstanding outbound nonces is refused before registration, while an
// unrelated nonce is admitted.

#[test]
fn test_loopback_nonce_rejected_on_accept() {
    let peer = MockPeer::start();
    let bind = dead_authority();

    let mut settings = test_settings();
    settings.host_pool_capacity = 0;
    settings.inbound_connections = 2;
    settings.binds = vec![bind];
    let mut network = Network::new(settings);
    start_and_run(&network);

    // An outbound channel whose version nonce is in flight.
    let (tx, rx) = mpsc::channel();
    network.connect_with(endpoint_of(peer.authority), move |result| {
        tx.send(result).unwrap();
    });
    let outbound = rx.recv_timeout(Duration::from_secs(10)).unwrap().unwrap();
    assert_eq!(network.channel_count(), 1);

    // Our own connection coming back: the accepted side completes the
    // handshake, counting detects the nonce, and the channel is stopped
    // without registration; the socket observes the close.
    let mut echo = TcpStream::connect(std::net::SocketAddr::from(bind)).unwrap();
    echo.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    write_frame(&mut echo, &peer_version_with_nonce(outbound.nonce())).unwrap();
    write_frame(&mut echo, &VersionAcknowledge).unwrap();
    while read_frame(&mut echo).is_ok() {}

    assert_eq!(network.inbound_channel_count(), 0);
    assert_eq!(network.channel_count(), 1);

    // An unrelated nonce passes the same admission path.
    let mut legit = TcpStream::connect(std::net::SocketAddr::from(bind)).unwrap();
    write_frame(
        &mut legit,
        &peer_version_with_nonce(outbound.nonce().wrapping_add(1)),
    )
    .unwrap();
    write_frame(&mut legit, &VersionAcknowledge).unwrap();

    wait_until("inbound admission", Duration::from_secs(10), || {
        network.inbound_channel_count() == 1
    });
    assert_eq!(network.channel_count(), 2);

    network.close();
}

// Unknown command on a live channel is dropped, not fatal: the read loop
// continues and the ping that follows is dispatched and answered.

#[test]
fn test_unknown_command_skipped_on_live_channel() {
    let peer = MockPeer::with_injected_frames(vec![
        raw_frame("wtfmessage", &[1, 2, 3]),
        frame_of(&Ping { nonce: 7 }),
    ]);

    let mut settings = test_settings();
    settings.host_pool_capacity = 0;
    let mut network = Network::new(settings);
    start_and_run(&network);

    let (tx, rx) = mpsc::channel();
    network.connect_with(endpoint_of(peer.authority), move |result| {
        tx.send(result).unwrap();
    });
    let channel = rx.recv_timeout(Duration::from_secs(10)).unwrap().unwrap();

    // The pong reply proves the loop survived the unknown frame and
    // dispatched the message behind it.
    wait_until("pong reply", Duration::from_secs(10), || {
        peer.received().iter().any(|(command, payload)| {
            command == "pong"
                && Pong::deserialize(level::MAXIMUM, payload)
                    .is_ok_and(|pong| pong.nonce == 7)
        })
    });

    assert!(!channel.stopped());
    assert_eq!(network.channel_count(), 1);

    network.close();
}

// A pong matching no outstanding ping is a protocol violation: the channel
// stops with the code, delivered to its stop subscription exactly once.

#[test]
fn test_mismatched_pong_stops_channel() {
    let peer = MockPeer::with_injected_frames(vec![frame_of(&Pong { nonce: 5 })]);

    let mut settings = test_settings();
    settings.host_pool_capacity = 0;
    let mut network = Network::new(settings);
    start_and_run(&network);

    let (tx, rx) = mpsc::channel();
    network.connect_with(endpoint_of(peer.authority), move |result| {
        tx.send(result).unwrap();
    });
    let channel = rx.recv_timeout(Duration::from_secs(10)).unwrap().unwrap();

    // A subscription that races the stop still observes the stored code.
    let (stop_tx, stop_rx) = mpsc::channel();
    let _ = channel.subscribe_stop(move |code| stop_tx.send(code).unwrap());

    assert_eq!(
        stop_rx.recv_timeout(Duration::from_secs(10)).unwrap(),
        Error::ProtocolViolation
    );
    assert!(stop_rx.recv_timeout(Duration::from_millis(300)).is_err());
    assert!(channel.stopped());

    network.close();
}

// Close notifies close subscribers with the terminal service code before
// returning.

#[test]
fn test_close_notifies_subscribers() {
    let mut settings = test_settings();
    settings.host_pool_capacity = 0;
    let mut network = Network::new(settings);
    start_and_run(&network);

    let (tx, rx) = mpsc::channel();
    let (key_tx, key_rx) = mpsc::channel();
    network.subscribe_close(
        move |event| {
            tx.send(event.err()).unwrap();
            true
        },
        move |result| key_tx.send(result).unwrap(),
    );
    assert!(key_rx.recv_timeout(Duration::from_secs(5)).unwrap().is_ok());

    network.close();
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(5)).unwrap(),
        Some(Error::ServiceStopped)
    );

    // Idempotent.
    network.close();
}

// Subscriptions after close observe the stopped service immediately.

#[test]
fn test_subscribe_after_close_refused() {
    let mut settings = test_settings();
    settings.host_pool_capacity = 0;
    let mut network = Network::new(settings);
    start_and_run(&network);
    network.close();

    let (tx, rx) = mpsc::channel();
    network.subscribe_connect(|_| true, move |result| tx.send(result).unwrap());
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(5)).unwrap(),
        Err(Error::ServiceStopped)
    );

    let (tx, rx) = mpsc::channel();
    network.connect_with(endpoint_of(dead_authority()), move |result| {
        tx.send(result.map(|_| ())).unwrap();
    });
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(5)).unwrap(),
        Err(Error::ServiceStopped)
    );
}
