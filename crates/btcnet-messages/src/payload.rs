//! # Payload Trait and Framing
//!
//! Every dispatchable message implements [`Payload`]; [`serialize_message`]
//! wraps a payload in its heading for transmission.

use crate::codec::MessageError;
use crate::heading::Heading;
use crate::identifier::Identifier;

/// A typed wire message payload.
///
/// Codecs receive the negotiated protocol version because several fields are
/// level-gated (the ping nonce, the version relay flag).
pub trait Payload: Sized + Send + Sync + 'static {
    const IDENTIFIER: Identifier;

    fn serialize(&self, version: u32, out: &mut Vec<u8>);

    fn deserialize(version: u32, payload: &[u8]) -> Result<Self, MessageError>;

    fn command() -> &'static str {
        Self::IDENTIFIER.command()
    }
}

/// Serialize a message with its heading: magic | command | length | checksum
/// | payload.
pub fn serialize_message<T: Payload>(message: &T, magic: u32, version: u32) -> Vec<u8> {
    let mut payload = Vec::new();
    message.serialize(version, &mut payload);

    let heading = Heading::for_payload(magic, T::command(), &payload);
    let mut out = Vec::with_capacity(crate::heading::HEADING_SIZE + payload.len());
    heading.serialize(&mut out);
    out.extend_from_slice(&payload);
    out
}
