//! # Message Heading
//!
//! The fixed 24-byte frame prefix carried by every peer message:
//!
//! ```text
//! offset  size  field
//! 0       4     magic (network identifier)
//! 4       12    command string, null-padded ASCII
//! 16      4     payload_length (unsigned little-endian)
//! 20      4     payload_checksum (first 4 bytes of double-sha256 of payload)
//! ```

use sha2::{Digest, Sha256};

use crate::codec::{MessageError, Reader, WriteExt};
use crate::identifier::Identifier;

/// Serialized heading size in bytes.
pub const HEADING_SIZE: usize = 24;

/// Command field width within the heading.
pub const COMMAND_SIZE: usize = 12;

/// Maximum payload for witness-level protocol.
pub const MAX_PAYLOAD_WITNESS: usize = 4_000_000;

/// Maximum payload below witness level.
pub const MAX_PAYLOAD_LEGACY: usize = 1_800_003;

/// First four bytes of the double-sha256 digest of the payload.
pub fn checksum(payload: &[u8]) -> [u8; 4] {
    let digest = Sha256::digest(Sha256::digest(payload));
    [digest[0], digest[1], digest[2], digest[3]]
}

/// Decoded message heading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heading {
    pub magic: u32,
    pub command: String,
    pub payload_size: u32,
    pub checksum: [u8; 4],
}

impl Heading {
    /// Build the heading for a serialized payload.
    pub fn for_payload(magic: u32, command: &str, payload: &[u8]) -> Self {
        Self {
            magic,
            command: command.to_owned(),
            payload_size: payload.len() as u32,
            checksum: checksum(payload),
        }
    }

    /// The identifier named by the command field.
    pub fn identifier(&self) -> Identifier {
        Identifier::from_command(&self.command)
    }

    /// Maximum allowed payload for the given protocol context.
    pub fn maximum_payload(witness: bool) -> usize {
        if witness {
            MAX_PAYLOAD_WITNESS
        } else {
            MAX_PAYLOAD_LEGACY
        }
    }

    pub fn serialize(&self, out: &mut Vec<u8>) {
        out.put_u32_le(self.magic);
        let mut command = [0u8; COMMAND_SIZE];
        let bytes = self.command.as_bytes();
        command[..bytes.len().min(COMMAND_SIZE)]
            .copy_from_slice(&bytes[..bytes.len().min(COMMAND_SIZE)]);
        out.put_bytes(&command);
        out.put_u32_le(self.payload_size);
        out.put_bytes(&self.checksum);
    }

    pub fn deserialize(buf: &[u8]) -> Result<Self, MessageError> {
        let mut reader = Reader::new(buf);
        let magic = reader.read_u32_le()?;
        let command_bytes = reader.read_bytes(COMMAND_SIZE)?;
        let end = command_bytes
            .iter()
            .position(|&byte| byte == 0)
            .unwrap_or(COMMAND_SIZE);
        let command = std::str::from_utf8(&command_bytes[..end])
            .map_err(|_| MessageError::BadString)?
            .to_owned();
        let payload_size = reader.read_u32_le()?;
        let checksum: [u8; 4] = reader.read_bytes(4)?.try_into().expect("fixed slice");
        reader.finish()?;

        Ok(Self {
            magic,
            command,
            payload_size,
            checksum,
        })
    }

    /// Verify the checksum field against a received payload.
    pub fn verify_checksum(&self, payload: &[u8]) -> bool {
        checksum(payload) == self.checksum
    }
}
