//! # Alert (deprecated)
//!
//! Signed network alerts, retired by the reference client in 2016. The
//! payload and signature are carried opaquely; verification is out of scope.

use crate::codec::{MessageError, Reader, WriteExt};
use crate::identifier::Identifier;
use crate::payload::Payload;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Alert {
    pub payload: Vec<u8>,
    pub signature: Vec<u8>,
}

impl Payload for Alert {
    const IDENTIFIER: Identifier = Identifier::Alert;

    fn serialize(&self, _version: u32, out: &mut Vec<u8>) {
        out.put_var_int(self.payload.len() as u64);
        out.put_bytes(&self.payload);
        out.put_var_int(self.signature.len() as u64);
        out.put_bytes(&self.signature);
    }

    fn deserialize(_version: u32, payload: &[u8]) -> Result<Self, MessageError> {
        let mut reader = Reader::new(payload);
        let body_length = reader.read_count()?;
        let body = reader.read_bytes(body_length)?.to_vec();
        let signature_length = reader.read_count()?;
        let signature = reader.read_bytes(signature_length)?.to_vec();
        reader.finish()?;
        Ok(Self {
            payload: body,
            signature,
        })
    }
}
