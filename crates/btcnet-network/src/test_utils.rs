//! Shared fixtures for unit tests: loopback channel pairs and version
//! message builders.

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};

use btcnet_messages::{level, NetworkAddress, Version};

use crate::channel::Channel;
use crate::config::Authority;
use crate::memory::BufferPool;
use crate::settings::Settings;
use crate::socket::Socket;
use crate::strand::Strand;
use crate::threadpool::Threadpool;

pub(crate) struct ChannelFixture {
    pub pool: Threadpool,
    pub channel: Arc<Channel>,
    pub remote: TcpStream,
}

/// A channel over a real loopback pair, not yet resumed.
pub(crate) fn make_channel(
    configure: impl FnOnce(&mut Settings),
    inbound: bool,
) -> ChannelFixture {
    let pool = Threadpool::new(2);
    let handle = pool.handle();

    let mut settings = Settings::for_testing();
    configure(&mut settings);
    let settings = Arc::new(settings);

    let (channel, remote) = handle.clone().block_on(async {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let client = TcpStream::connect(address).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();

        let strand = Strand::new(&handle);
        let socket = Arc::new(Socket::new(client, Authority::from(address), strand));
        let channel = Channel::new(
            socket,
            Arc::clone(&settings),
            BufferPool::new(),
            handle.clone(),
            inbound,
        );
        (channel, server)
    });

    ChannelFixture {
        pool,
        channel,
        remote,
    }
}

/// A conforming peer version message carrying the given nonce.
pub(crate) fn make_peer_version(nonce: u64) -> Version {
    let unspecified = NetworkAddress {
        services: 0,
        ip: std::net::Ipv6Addr::UNSPECIFIED.into(),
        port: 0,
    };
    Version {
        value: level::MAXIMUM,
        services: 0,
        timestamp: std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() as i64)
            .unwrap_or_default(),
        address_receiver: unspecified.clone(),
        address_sender: unspecified,
        nonce,
        user_agent: "/peer/".into(),
        start_height: 0,
        relay: true,
    }
}

/// Run a job on the given strand and wait for it.
pub(crate) fn run_on<R: Send + 'static>(
    strand: &Strand,
    job: impl FnOnce() -> R + Send + 'static,
) -> R {
    let (tx, rx) = std::sync::mpsc::channel();
    strand.post(move || tx.send(job()).unwrap());
    rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap()
}
