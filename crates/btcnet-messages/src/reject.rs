//! # Reject (BIP 61)
//!
//! Peer-reported failure notices. Deprecated upstream but still emitted by
//! older peers; the reject protocol logs them.

use crate::codec::{MessageError, Reader, WriteExt};
use crate::identifier::Identifier;
use crate::payload::Payload;

/// Reject reason codes defined by BIP 61.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectCode {
    Malformed,
    Invalid,
    Obsolete,
    Duplicate,
    NonStandard,
    Dust,
    InsufficientFee,
    Checkpoint,
    Undefined(u8),
}

impl RejectCode {
    pub fn to_byte(self) -> u8 {
        match self {
            RejectCode::Malformed => 0x01,
            RejectCode::Invalid => 0x10,
            RejectCode::Obsolete => 0x11,
            RejectCode::Duplicate => 0x12,
            RejectCode::NonStandard => 0x40,
            RejectCode::Dust => 0x41,
            RejectCode::InsufficientFee => 0x42,
            RejectCode::Checkpoint => 0x43,
            RejectCode::Undefined(byte) => byte,
        }
    }

    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x01 => RejectCode::Malformed,
            0x10 => RejectCode::Invalid,
            0x11 => RejectCode::Obsolete,
            0x12 => RejectCode::Duplicate,
            0x40 => RejectCode::NonStandard,
            0x41 => RejectCode::Dust,
            0x42 => RejectCode::InsufficientFee,
            0x43 => RejectCode::Checkpoint,
            other => RejectCode::Undefined(other),
        }
    }
}

/// The `reject` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reject {
    /// Command string of the rejected message.
    pub message: String,
    pub code: RejectCode,
    pub reason: String,
    /// Object hash for block/tx rejections, empty otherwise.
    pub data: Vec<u8>,
}

impl Payload for Reject {
    const IDENTIFIER: Identifier = Identifier::Reject;

    fn serialize(&self, _version: u32, out: &mut Vec<u8>) {
        out.put_var_string(&self.message);
        out.put_u8(self.code.to_byte());
        out.put_var_string(&self.reason);
        out.put_bytes(&self.data);
    }

    fn deserialize(_version: u32, payload: &[u8]) -> Result<Self, MessageError> {
        let mut reader = Reader::new(payload);
        let message = reader.read_var_string()?;
        let code = RejectCode::from_byte(reader.read_u8()?);
        let reason = reader.read_var_string()?;
        let data = reader.read_bytes(reader.remaining())?.to_vec();
        Ok(Self {
            message,
            code,
            reason,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::level;

    #[test]
    fn test_reject_round_trip_with_hash() {
        let reject = Reject {
            message: "tx".into(),
            code: RejectCode::InsufficientFee,
            reason: "insufficient fee".into(),
            data: vec![0xaa; 32],
        };
        let mut buf = Vec::new();
        reject.serialize(level::BIP61, &mut buf);
        assert_eq!(Reject::deserialize(level::BIP61, &buf).unwrap(), reject);
    }

    #[test]
    fn test_reject_round_trip_without_data() {
        let reject = Reject {
            message: "version".into(),
            code: RejectCode::Obsolete,
            reason: "obsolete version".into(),
            data: Vec::new(),
        };
        let mut buf = Vec::new();
        reject.serialize(level::BIP61, &mut buf);
        assert_eq!(Reject::deserialize(level::BIP61, &buf).unwrap(), reject);
    }

    #[test]
    fn test_undefined_code_preserved() {
        assert_eq!(RejectCode::from_byte(0x77).to_byte(), 0x77);
    }
}
