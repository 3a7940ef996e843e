//! # Endpoint Configuration Types
//!
//! An [`Authority`] is a resolved ip:port pair, the identity of a peer
//! connection. An [`Endpoint`] is a host:port pair that may still need DNS
//! resolution (configured peers and seeds).

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

use btcnet_messages::AddressItem;

/// A resolved network authority (ip and port).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Authority {
    pub ip: IpAddr,
    pub port: u16,
}

impl Authority {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    /// A port of zero matches any port on the same host, used by blacklist
    /// and whitelist entries that name a whole host.
    pub fn matches(&self, other: &Authority) -> bool {
        self.ip == other.ip && (self.port == 0 || other.port == 0 || self.port == other.port)
    }

    pub fn to_address_item(&self, timestamp: u32, services: u64) -> AddressItem {
        AddressItem {
            timestamp,
            services,
            ip: self.ip,
            port: self.port,
        }
    }
}

impl From<SocketAddr> for Authority {
    fn from(address: SocketAddr) -> Self {
        Self {
            ip: address.ip(),
            port: address.port(),
        }
    }
}

impl From<&AddressItem> for Authority {
    fn from(item: &AddressItem) -> Self {
        Self {
            ip: item.ip,
            port: item.port,
        }
    }
}

impl From<Authority> for SocketAddr {
    fn from(authority: Authority) -> Self {
        SocketAddr::new(authority.ip, authority.port)
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip {
            IpAddr::V4(ip) => write!(f, "{}:{}", ip, self.port),
            IpAddr::V6(ip) => write!(f, "[{}]:{}", ip, self.port),
        }
    }
}

/// A peer endpoint that may be a DNS name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// The target string handed to the resolver; IPv6 literals are
    /// bracketed.
    pub fn to_target(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl From<Authority> for Endpoint {
    fn from(authority: Authority) -> Self {
        Self {
            host: authority.ip.to_string(),
            port: authority.port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_target())
    }
}
