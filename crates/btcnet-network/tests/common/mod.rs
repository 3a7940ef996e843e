//! Test harness: a blocking loopback peer speaking just enough of the wire
//! protocol to complete handshakes, answer pings and getaddr, and inject
//! scripted frames after the handshake.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use btcnet_messages::{
    level, serialize_message, Address, AddressItem, Heading, Identifier, NetworkAddress, Payload,
    Ping, Pong, Version, VersionAcknowledge, HEADING_SIZE,
};
use btcnet_network::{Authority, Endpoint, Settings};

/// Network magic shared by the harness and test settings.
pub const MAGIC: u32 = 0xbeef_cafe;

/// Opt-in log output for debugging runs (`RUST_LOG=debug`).
#[allow(dead_code)]
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

/// Settings wired for loopback tests.
pub fn test_settings() -> Settings {
    let mut settings = Settings::for_testing();
    settings.identifier = MAGIC;
    settings
}

pub fn endpoint_of(authority: Authority) -> Endpoint {
    Endpoint::new(authority.ip.to_string(), authority.port)
}

/// A scripted remote peer. Accepts any number of connections, completes
/// the version handshake on each, then serves pings and getaddr; every
/// received frame is recorded. Frames given to `with_injected_frames` are
/// written raw once per connection after the handshake settles.
pub struct MockPeer {
    pub authority: Authority,
    pub connections: Arc<AtomicUsize>,
    addresses: Arc<Vec<AddressItem>>,
    injected: Arc<Vec<Vec<u8>>>,
    received: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
}

impl MockPeer {
    pub fn start() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    /// A peer that answers `getaddr` with the given batch (a seed).
    pub fn with_addresses(addresses: Vec<AddressItem>) -> Self {
        Self::new(addresses, Vec::new())
    }

    /// A peer that writes the given raw frames after each handshake.
    pub fn with_injected_frames(frames: Vec<Vec<u8>>) -> Self {
        Self::new(Vec::new(), frames)
    }

    fn new(addresses: Vec<AddressItem>, injected: Vec<Vec<u8>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock peer");
        let authority = Authority::from(listener.local_addr().expect("local addr"));
        let connections = Arc::new(AtomicUsize::new(0));
        let addresses = Arc::new(addresses);
        let injected = Arc::new(injected);
        let received = Arc::new(Mutex::new(Vec::new()));

        let accepted = Arc::clone(&connections);
        let served = Arc::clone(&addresses);
        let script = Arc::clone(&injected);
        let log = Arc::clone(&received);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                accepted.fetch_add(1, Ordering::SeqCst);
                let batch = Arc::clone(&served);
                let frames = Arc::clone(&script);
                let sink = Arc::clone(&log);
                thread::spawn(move || {
                    let _ = serve(stream, &batch, &frames, &sink);
                });
            }
        });

        Self {
            authority,
            connections,
            addresses,
            injected,
            received,
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn address_item(&self) -> AddressItem {
        self.authority.to_address_item(now_timestamp() as u32, 0)
    }

    /// Every frame received so far, as (command, payload) pairs.
    pub fn received(&self) -> Vec<(String, Vec<u8>)> {
        self.received.lock().clone()
    }

    #[allow(dead_code)]
    pub fn served_addresses(&self) -> &[AddressItem] {
        &self.addresses
    }

    #[allow(dead_code)]
    pub fn injected_frames(&self) -> &[Vec<u8>] {
        &self.injected
    }
}

fn now_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or_default()
}

/// A conforming peer version carrying a specific nonce.
pub fn peer_version_with_nonce(nonce: u64) -> Version {
    let unspecified = NetworkAddress {
        services: 0,
        ip: std::net::Ipv6Addr::UNSPECIFIED.into(),
        port: 0,
    };
    Version {
        value: level::MAXIMUM,
        services: 0,
        timestamp: now_timestamp(),
        address_receiver: unspecified.clone(),
        address_sender: unspecified,
        nonce,
        user_agent: "/mockpeer/".into(),
        start_height: 0,
        relay: true,
    }
}

fn peer_version() -> Version {
    peer_version_with_nonce(rand::random())
}

/// A serialized frame for a typed message, ready for injection.
pub fn frame_of<T: Payload>(message: &T) -> Vec<u8> {
    serialize_message(message, MAGIC, level::MAXIMUM)
}

/// A raw frame for an arbitrary (possibly unknown) command.
pub fn raw_frame(command: &str, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADING_SIZE + payload.len());
    Heading::for_payload(MAGIC, command, payload).serialize(&mut frame);
    frame.extend_from_slice(payload);
    frame
}

pub fn write_frame<T: Payload>(stream: &mut TcpStream, message: &T) -> std::io::Result<()> {
    stream.write_all(&serialize_message(message, MAGIC, level::MAXIMUM))
}

pub fn read_frame(stream: &mut TcpStream) -> std::io::Result<(Heading, Vec<u8>)> {
    let mut heading_buffer = [0u8; HEADING_SIZE];
    stream.read_exact(&mut heading_buffer)?;
    let heading = Heading::deserialize(&heading_buffer)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "bad heading"))?;

    let mut payload = vec![0u8; heading.payload_size as usize];
    stream.read_exact(&mut payload)?;
    Ok((heading, payload))
}

fn serve(
    mut stream: TcpStream,
    addresses: &[AddressItem],
    injected: &[Vec<u8>],
    received: &Mutex<Vec<(String, Vec<u8>)>>,
) -> std::io::Result<()> {
    loop {
        let (heading, payload) = read_frame(&mut stream)?;
        received.lock().push((heading.command.clone(), payload.clone()));
        match heading.identifier() {
            Identifier::Version => {
                write_frame(&mut stream, &peer_version())?;
                write_frame(&mut stream, &VersionAcknowledge)?;
            }
            Identifier::VersionAcknowledge => {
                if !injected.is_empty() {
                    // The node attaches its steady-state protocols just
                    // after the handshake; give those subscriptions a
                    // moment to land before injecting.
                    thread::sleep(Duration::from_millis(500));
                    for frame in injected {
                        stream.write_all(frame)?;
                    }
                }
            }
            Identifier::Ping => {
                if let Ok(ping) = Ping::deserialize(level::MAXIMUM, &payload) {
                    write_frame(&mut stream, &Pong { nonce: ping.nonce })?;
                }
            }
            Identifier::GetAddress => {
                write_frame(
                    &mut stream,
                    &Address {
                        addresses: addresses.to_vec(),
                    },
                )?;
            }
            _ => {}
        }
    }
}
