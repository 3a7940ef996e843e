//! # btcnet-network
//!
//! Concurrent session/channel/protocol engine for the Bitcoin peer-to-peer
//! network: establishes, maintains, and tears down TCP connections to
//! peers, multiplexes typed message streams over each connection, and
//! orchestrates discovery and outbound dialing with backpressure, retries,
//! and deterministic shutdown.
//!
//! ## Architecture
//!
//! - **Strands** serialize all mutation of shared state over one worker
//!   pool; every stateful container is pinned to exactly one strand.
//! - **Channels** own a connection's framing loop, timers, and typed
//!   message fan-out (the distributor).
//! - **Sessions** (manual, seed, inbound, outbound) produce channels and
//!   attach per-channel protocols after the version handshake.
//! - The **network** supervisor owns the pool, the host address pool,
//!   connection counting, and loopback nonce detection.
//!
//! ## Example
//!
//! ```rust,no_run
//! use btcnet_network::{Network, Settings};
//!
//! let mut settings = Settings::default();
//! settings.threads = 4;
//! settings.identifier = 0xd9b4bef9;
//!
//! let mut network = Network::new(settings);
//! network.start(|result| assert!(result.is_ok()));
//! network.run(|result| assert!(result.is_ok()));
//! // ... eventually:
//! network.close();
//! ```

pub mod accept;
pub mod channel;
pub mod config;
pub mod connect;
pub mod distributor;
pub mod error;
pub mod hosts;
pub mod http_channel;
pub mod memory;
pub mod net;
pub mod protocols;
pub mod sessions;
pub mod settings;
pub mod socket;
pub mod strand;
pub mod subscribe;
pub mod synchronizer;
pub mod threadpool;
pub mod timer;

#[cfg(test)]
pub(crate) mod test_utils;

pub use accept::Acceptor;
pub use channel::Channel;
pub use config::{Authority, Endpoint};
pub use connect::Connector;
pub use distributor::{Dispatch, Distributor};
pub use error::{Completion, Error};
pub use hosts::Hosts;
pub use http_channel::HttpChannel;
pub use memory::{BufferPool, PooledBuffer};
pub use net::Network;
pub use settings::Settings;
pub use socket::Socket;
pub use strand::Strand;
pub use subscribe::{Subscriber, Unsubscriber};
pub use synchronizer::Synchronizer;
pub use threadpool::Threadpool;
pub use timer::Deadline;
