//! # Address Exchange Messages
//!
//! `addr`/`getaddr` and the address entry types shared with the host pool.
//! An address item's identity is its `(ip, port)` pair; services and
//! timestamp are mutable gossip.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::codec::{MessageError, Reader, WriteExt};
use crate::identifier::Identifier;
use crate::payload::Payload;

/// Address without a timestamp, as embedded in the `version` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAddress {
    pub services: u64,
    pub ip: IpAddr,
    pub port: u16,
}

impl NetworkAddress {
    pub fn serialize(&self, out: &mut Vec<u8>) {
        out.put_u64_le(self.services);
        out.put_ip(&self.ip);
        out.put_u16_be(self.port);
    }

    pub fn deserialize(reader: &mut Reader<'_>) -> Result<Self, MessageError> {
        Ok(Self {
            services: reader.read_u64_le()?,
            ip: reader.read_ip()?,
            port: reader.read_u16_be()?,
        })
    }
}

/// Timestamped address, the unit of the `addr` message and the host pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressItem {
    pub timestamp: u32,
    pub services: u64,
    pub ip: IpAddr,
    pub port: u16,
}

impl AddressItem {
    /// Identity comparison: two items describe the same peer endpoint.
    pub fn same_endpoint(&self, other: &AddressItem) -> bool {
        self.ip == other.ip && self.port == other.port
    }

    /// The address has no routable host part.
    pub fn is_unspecified(&self) -> bool {
        self.ip.is_unspecified() || self.port == 0
    }

    pub fn serialize(&self, out: &mut Vec<u8>) {
        out.put_u32_le(self.timestamp);
        out.put_u64_le(self.services);
        out.put_ip(&self.ip);
        out.put_u16_be(self.port);
    }

    pub fn deserialize(reader: &mut Reader<'_>) -> Result<Self, MessageError> {
        Ok(Self {
            timestamp: reader.read_u32_le()?,
            services: reader.read_u64_le()?,
            ip: reader.read_ip()?,
            port: reader.read_u16_be()?,
        })
    }
}

impl std::fmt::Display for AddressItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.ip {
            IpAddr::V4(ip) => write!(f, "{}:{}", ip, self.port),
            IpAddr::V6(ip) => write!(f, "[{}]:{}", ip, self.port),
        }
    }
}

/// The `addr` message: a batch of gossiped addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Address {
    pub addresses: Vec<AddressItem>,
}

impl Payload for Address {
    const IDENTIFIER: Identifier = Identifier::Address;

    fn serialize(&self, _version: u32, out: &mut Vec<u8>) {
        out.put_var_int(self.addresses.len() as u64);
        for item in &self.addresses {
            item.serialize(out);
        }
    }

    fn deserialize(_version: u32, payload: &[u8]) -> Result<Self, MessageError> {
        let mut reader = Reader::new(payload);
        let count = reader.read_count()?;
        let mut addresses = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            addresses.push(AddressItem::deserialize(&mut reader)?);
        }
        reader.finish()?;
        Ok(Self { addresses })
    }
}

/// The `getaddr` message (empty payload).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetAddress;

impl Payload for GetAddress {
    const IDENTIFIER: Identifier = Identifier::GetAddress;

    fn serialize(&self, _version: u32, _out: &mut Vec<u8>) {}

    fn deserialize(_version: u32, payload: &[u8]) -> Result<Self, MessageError> {
        Reader::new(payload).finish()?;
        Ok(Self)
    }
}
