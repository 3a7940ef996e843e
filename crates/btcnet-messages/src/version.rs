//! # Version Handshake Messages
//!
//! The `version`/`verack` exchange that opens every channel, plus the
//! protocol level and service flag constants negotiated through it.

use serde::{Deserialize, Serialize};

use crate::address::NetworkAddress;
use crate::codec::{MessageError, Reader, WriteExt};
use crate::identifier::Identifier;
use crate::payload::Payload;

/// Protocol level constants (the version numbers at which behavior changed).
pub mod level {
    /// Baseline protocol.
    pub const MINIMUM: u32 = 31402;
    /// Ping nonce and pong reply (BIP 31).
    pub const BIP31: u32 = 60001;
    /// Reject message (BIP 61).
    pub const BIP61: u32 = 70002;
    /// Relay flag in version (BIP 37).
    pub const BIP37: u32 = 70001;
    /// Highest level this library speaks.
    pub const MAXIMUM: u32 = 70013;
}

/// Service bitfield flags advertised in version and address messages.
pub mod service {
    /// No services.
    pub const NONE: u64 = 0;
    /// Full chain service.
    pub const NODE_NETWORK: u64 = 1;
    /// Segregated witness service.
    pub const NODE_WITNESS: u64 = 1 << 3;
}

/// The `version` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub value: u32,
    pub services: u64,
    pub timestamp: i64,
    pub address_receiver: NetworkAddress,
    pub address_sender: NetworkAddress,
    pub nonce: u64,
    pub user_agent: String,
    pub start_height: u32,
    /// Only on the wire at or above `level::BIP37`.
    pub relay: bool,
}

impl Payload for Version {
    const IDENTIFIER: Identifier = Identifier::Version;

    fn serialize(&self, _version: u32, out: &mut Vec<u8>) {
        // The peer's level is unknown until this message is parsed, so the
        // sender's own value gates the relay field.
        out.put_u32_le(self.value);
        out.put_u64_le(self.services);
        out.put_i64_le(self.timestamp);
        self.address_receiver.serialize(out);
        self.address_sender.serialize(out);
        out.put_u64_le(self.nonce);
        out.put_var_string(&self.user_agent);
        out.put_u32_le(self.start_height);
        if self.value >= level::BIP37 {
            out.put_u8(u8::from(self.relay));
        }
    }

    fn deserialize(_version: u32, payload: &[u8]) -> Result<Self, MessageError> {
        let mut reader = Reader::new(payload);
        let value = reader.read_u32_le()?;
        let services = reader.read_u64_le()?;
        let timestamp = reader.read_i64_le()?;
        let address_receiver = NetworkAddress::deserialize(&mut reader)?;
        let address_sender = NetworkAddress::deserialize(&mut reader)?;
        let nonce = reader.read_u64_le()?;
        let user_agent = reader.read_var_string()?;
        let start_height = reader.read_u32_le()?;

        // Pre-BIP37 peers omit the relay byte; absent means relay.
        let relay = if value >= level::BIP37 && !reader.is_exhausted() {
            reader.read_u8()? != 0
        } else {
            true
        };

        Ok(Self {
            value,
            services,
            timestamp,
            address_receiver,
            address_sender,
            nonce,
            user_agent,
            start_height,
            relay,
        })
    }
}

/// The `verack` message (empty payload).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VersionAcknowledge;

impl Payload for VersionAcknowledge {
    const IDENTIFIER: Identifier = Identifier::VersionAcknowledge;

    fn serialize(&self, _version: u32, _out: &mut Vec<u8>) {}

    fn deserialize(_version: u32, payload: &[u8]) -> Result<Self, MessageError> {
        Reader::new(payload).finish()?;
        Ok(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ipv4;

    fn make_version(value: u32) -> Version {
        Version {
            value,
            services: service::NODE_NETWORK,
            timestamp: 1_700_000_000,
            address_receiver: NetworkAddress {
                services: service::NODE_NETWORK,
                ip: ipv4(203, 0, 113, 7),
                port: 8333,
            },
            address_sender: NetworkAddress {
                services: service::NONE,
                ip: ipv4(0, 0, 0, 0),
                port: 0,
            },
            nonce: 0xdead_beef_cafe_f00d,
            user_agent: "/btcnet:0.4.0/".into(),
            start_height: 820_000,
            relay: false,
        }
    }

    #[test]
    fn test_version_round_trip() {
        let version = make_version(level::MAXIMUM);
        let mut buf = Vec::new();
        Payload::serialize(&version, level::MAXIMUM, &mut buf);
        let decoded = <Version as Payload>::deserialize(level::MAXIMUM, &buf).unwrap();
        assert_eq!(decoded, version);
    }

    #[test]
    fn test_version_pre_bip37_omits_relay() {
        let version = make_version(level::BIP31);
        let mut buf = Vec::new();
        Payload::serialize(&version, level::BIP31, &mut buf);

        let decoded = <Version as Payload>::deserialize(level::BIP31, &buf).unwrap();
        // Absent relay byte decodes as relay = true.
        assert!(decoded.relay);
        assert_eq!(decoded.nonce, version.nonce);
    }

    #[test]
    fn test_verack_empty() {
        let mut buf = Vec::new();
        VersionAcknowledge.serialize(level::MAXIMUM, &mut buf);
        assert!(buf.is_empty());
        assert!(VersionAcknowledge::deserialize(level::MAXIMUM, &[]).is_ok());
        assert!(VersionAcknowledge::deserialize(level::MAXIMUM, &[0]).is_err());
    }

    #[test]
    fn test_version_truncated_rejected() {
        let version = make_version(level::MAXIMUM);
        let mut buf = Vec::new();
        Payload::serialize(&version, level::MAXIMUM, &mut buf);
        buf.truncate(20);
        assert!(<Version as Payload>::deserialize(level::MAXIMUM, &buf).is_err());
    }
}
