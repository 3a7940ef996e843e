//! # Network Settings
//!
//! All knobs the engine recognizes, already parsed. The filter helpers at
//! the bottom decide which gossiped addresses are admissible; `excluded` is
//! the conjunction every pool take must satisfy.

use std::path::PathBuf;
use std::time::Duration;

use btcnet_messages::{level, service, AddressItem, Heading};

use crate::config::{Authority, Endpoint};

/// Common network configuration, properties not thread safe after start.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Worker pool size.
    pub threads: u32,

    /// Protocol negotiation bounds.
    pub protocol_maximum: u32,
    pub protocol_minimum: u32,

    /// Service bits advertised by this node.
    pub services_maximum: u64,
    /// Service bits a peer must advertise.
    pub services_minimum: u64,
    /// Service bits that disqualify a peer outright.
    pub invalid_services: u64,

    /// Feature toggles.
    pub enable_address: bool,
    pub enable_alert: bool,
    pub enable_reject: bool,
    pub enable_relay: bool,
    pub enable_ipv6: bool,
    pub enable_loopback: bool,
    pub validate_checksum: bool,

    /// Network magic.
    pub identifier: u32,

    /// Connection shape.
    pub inbound_connections: u16,
    pub outbound_connections: u16,
    pub connect_batch_size: u16,

    /// Timeouts (seconds).
    pub retry_timeout_seconds: u32,
    pub connect_timeout_seconds: u32,
    pub handshake_timeout_seconds: u32,
    pub seeding_timeout_seconds: u32,

    /// Durations (minutes).
    pub channel_heartbeat_minutes: u32,
    pub channel_inactivity_minutes: u32,
    pub channel_expiration_minutes: u32,
    pub maximum_skew_minutes: u32,

    /// Host pool.
    pub host_pool_capacity: u32,

    /// Identification.
    pub user_agent: String,

    /// Host cache directory.
    pub path: PathBuf,

    /// Configured endpoints and filters.
    pub peers: Vec<Endpoint>,
    pub seeds: Vec<Endpoint>,
    pub selfs: Vec<Authority>,
    pub binds: Vec<Authority>,
    pub blacklists: Vec<Authority>,
    pub whitelists: Vec<Authority>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            threads: 1,
            protocol_maximum: level::MAXIMUM,
            protocol_minimum: level::MINIMUM,
            services_maximum: service::NODE_NETWORK | service::NODE_WITNESS,
            services_minimum: service::NODE_NETWORK,
            invalid_services: 176,
            enable_address: false,
            enable_alert: false,
            enable_reject: false,
            enable_relay: false,
            enable_ipv6: false,
            enable_loopback: false,
            validate_checksum: false,
            identifier: 0,
            inbound_connections: 0,
            outbound_connections: 8,
            connect_batch_size: 5,
            retry_timeout_seconds: 1,
            connect_timeout_seconds: 5,
            handshake_timeout_seconds: 30,
            seeding_timeout_seconds: 30,
            channel_heartbeat_minutes: 5,
            channel_inactivity_minutes: 10,
            channel_expiration_minutes: 1440,
            maximum_skew_minutes: 120,
            host_pool_capacity: 0,
            user_agent: concat!("/btcnet:", env!("CARGO_PKG_VERSION"), "/").into(),
            path: PathBuf::new(),
            peers: Vec::new(),
            seeds: Vec::new(),
            selfs: Vec::new(),
            binds: Vec::new(),
            blacklists: Vec::new(),
            whitelists: Vec::new(),
        }
    }
}

impl Settings {
    /// Small, fast values for tests.
    pub fn for_testing() -> Self {
        Self {
            threads: 2,
            identifier: 0xbeef_cafe,
            outbound_connections: 0,
            connect_batch_size: 1,
            host_pool_capacity: 16,
            retry_timeout_seconds: 1,
            connect_timeout_seconds: 1,
            handshake_timeout_seconds: 2,
            seeding_timeout_seconds: 2,
            services_minimum: service::NONE,
            invalid_services: 0,
            ..Self::default()
        }
    }

    // Helpers.

    pub fn witness_node(&self) -> bool {
        self.services_maximum & service::NODE_WITNESS != 0
    }

    pub fn inbound_enabled(&self) -> bool {
        self.inbound_connections > 0 && !self.binds.is_empty()
    }

    pub fn outbound_enabled(&self) -> bool {
        self.outbound_connections > 0 && self.connect_batch_size > 0
    }

    pub fn advertise_enabled(&self) -> bool {
        self.enable_address && self.first_self().is_some()
    }

    pub fn maximum_payload(&self) -> usize {
        Heading::maximum_payload(self.witness_node())
    }

    pub fn first_self(&self) -> Option<Authority> {
        self.selfs.iter().find(|other| other.port != 0).copied()
    }

    pub fn retry_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.retry_timeout_seconds))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.connect_timeout_seconds))
    }

    pub fn channel_handshake(&self) -> Duration {
        Duration::from_secs(u64::from(self.handshake_timeout_seconds))
    }

    pub fn channel_germination(&self) -> Duration {
        Duration::from_secs(u64::from(self.seeding_timeout_seconds))
    }

    pub fn channel_heartbeat(&self) -> Duration {
        Duration::from_secs(u64::from(self.channel_heartbeat_minutes) * 60)
    }

    pub fn channel_inactivity(&self) -> Duration {
        Duration::from_secs(u64::from(self.channel_inactivity_minutes) * 60)
    }

    pub fn channel_expiration(&self) -> Duration {
        Duration::from_secs(u64::from(self.channel_expiration_minutes) * 60)
    }

    pub fn maximum_skew(&self) -> Duration {
        Duration::from_secs(u64::from(self.maximum_skew_minutes) * 60)
    }

    /// Pool size below which seeding runs.
    pub fn minimum_address_count(&self) -> usize {
        // One candidate per connector in the full outbound fan-out.
        usize::from(self.connect_batch_size) * usize::from(self.outbound_connections)
    }

    /// Path of the persisted host pool.
    pub fn hosts_file(&self) -> PathBuf {
        self.path.join("hosts.cache")
    }

    // Address filters.

    /// IPv6 address while IPv6 is disabled.
    pub fn disabled(&self, item: &AddressItem) -> bool {
        !self.enable_ipv6 && item.ip.is_ipv6()
    }

    /// Missing required service bits.
    pub fn insufficient(&self, item: &AddressItem) -> bool {
        item.services & self.services_minimum != self.services_minimum
    }

    /// Advertises a service bit configured as invalid.
    pub fn unsupported(&self, item: &AddressItem) -> bool {
        item.services & self.invalid_services != 0
    }

    pub fn blacklisted(&self, authority: &Authority) -> bool {
        self.blacklists.iter().any(|listed| listed.matches(authority))
    }

    /// With a non-empty whitelist, only listed authorities pass.
    pub fn whitelisted(&self, authority: &Authority) -> bool {
        self.whitelists.is_empty()
            || self.whitelists.iter().any(|listed| listed.matches(authority))
    }

    /// The address is one of our own.
    pub fn peered(&self, item: &AddressItem) -> bool {
        let authority = Authority::from(item);
        self.selfs.iter().any(|own| own.matches(&authority))
    }

    /// The conjunction the pool applies before storing or returning an item.
    pub fn excluded(&self, item: &AddressItem) -> bool {
        let authority = Authority::from(item);
        item.is_unspecified()
            || self.disabled(item)
            || self.insufficient(item)
            || self.unsupported(item)
            || self.peered(item)
            || self.blacklisted(&authority)
            || !self.whitelisted(&authority)
    }
}
