//! # Ping and Pong
//!
//! Keep-alive probes. Below BIP 31 (60001) a ping carries no payload and is
//! never answered; from BIP 31 on, ping carries a nonce echoed by pong.

use crate::codec::{MessageError, Reader, WriteExt};
use crate::identifier::Identifier;
use crate::payload::Payload;
use crate::version::level;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ping {
    pub nonce: u64,
}

impl Payload for Ping {
    const IDENTIFIER: Identifier = Identifier::Ping;

    fn serialize(&self, version: u32, out: &mut Vec<u8>) {
        if version >= level::BIP31 {
            out.put_u64_le(self.nonce);
        }
    }

    fn deserialize(version: u32, payload: &[u8]) -> Result<Self, MessageError> {
        let mut reader = Reader::new(payload);
        let nonce = if version >= level::BIP31 {
            reader.read_u64_le()?
        } else {
            0
        };
        reader.finish()?;
        Ok(Self { nonce })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pong {
    pub nonce: u64,
}

impl Payload for Pong {
    const IDENTIFIER: Identifier = Identifier::Pong;

    fn serialize(&self, _version: u32, out: &mut Vec<u8>) {
        out.put_u64_le(self.nonce);
    }

    fn deserialize(_version: u32, payload: &[u8]) -> Result<Self, MessageError> {
        let mut reader = Reader::new(payload);
        let nonce = reader.read_u64_le()?;
        reader.finish()?;
        Ok(Self { nonce })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_nonce_gated_by_level() {
        let ping = Ping { nonce: 42 };

        let mut old = Vec::new();
        ping.serialize(level::MINIMUM, &mut old);
        assert!(old.is_empty());

        let mut new = Vec::new();
        ping.serialize(level::BIP31, &mut new);
        assert_eq!(new.len(), 8);
    }

    #[test]
    fn test_ping_round_trip() {
        let ping = Ping { nonce: 42 };
        let mut buf = Vec::new();
        ping.serialize(level::BIP31, &mut buf);
        assert_eq!(Ping::deserialize(level::BIP31, &buf).unwrap(), ping);
    }

    #[test]
    fn test_pong_round_trip() {
        let pong = Pong { nonce: u64::MAX };
        let mut buf = Vec::new();
        pong.serialize(level::BIP31, &mut buf);
        assert_eq!(Pong::deserialize(level::BIP31, &buf).unwrap(), pong);
    }

    #[test]
    fn test_pong_requires_nonce() {
        assert!(Pong::deserialize(level::BIP31, &[]).is_err());
    }
}
