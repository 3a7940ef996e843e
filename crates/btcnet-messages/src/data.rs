//! # Data-Plane Messages
//!
//! Inventory vectors are decoded (sessions and tests inspect them); block,
//! transaction, header, and filter payloads are opaque carriers whose
//! interior structure belongs to chain-level consumers.

use crate::codec::{MessageError, Reader, WriteExt};
use crate::identifier::Identifier;
use crate::payload::Payload;

/// One entry of an `inv`/`getdata`/`notfound` vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InventoryItem {
    pub kind: u32,
    pub hash: [u8; 32],
}

impl InventoryItem {
    pub const ERROR: u32 = 0;
    pub const TRANSACTION: u32 = 1;
    pub const BLOCK: u32 = 2;

    fn serialize(&self, out: &mut Vec<u8>) {
        out.put_u32_le(self.kind);
        out.put_bytes(&self.hash);
    }

    fn deserialize(reader: &mut Reader<'_>) -> Result<Self, MessageError> {
        Ok(Self {
            kind: reader.read_u32_le()?,
            hash: reader.read_hash()?,
        })
    }
}

fn serialize_items(items: &[InventoryItem], out: &mut Vec<u8>) {
    out.put_var_int(items.len() as u64);
    for item in items {
        item.serialize(out);
    }
}

fn deserialize_items(payload: &[u8]) -> Result<Vec<InventoryItem>, MessageError> {
    let mut reader = Reader::new(payload);
    let count = reader.read_count()?;
    let mut items = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        items.push(InventoryItem::deserialize(&mut reader)?);
    }
    reader.finish()?;
    Ok(items)
}

/// The `inv` message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    pub items: Vec<InventoryItem>,
}

impl Payload for Inventory {
    const IDENTIFIER: Identifier = Identifier::Inventory;

    fn serialize(&self, _version: u32, out: &mut Vec<u8>) {
        serialize_items(&self.items, out);
    }

    fn deserialize(_version: u32, payload: &[u8]) -> Result<Self, MessageError> {
        Ok(Self {
            items: deserialize_items(payload)?,
        })
    }
}

/// The `getdata` message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetData {
    pub items: Vec<InventoryItem>,
}

impl Payload for GetData {
    const IDENTIFIER: Identifier = Identifier::GetData;

    fn serialize(&self, _version: u32, out: &mut Vec<u8>) {
        serialize_items(&self.items, out);
    }

    fn deserialize(_version: u32, payload: &[u8]) -> Result<Self, MessageError> {
        Ok(Self {
            items: deserialize_items(payload)?,
        })
    }
}

/// The `notfound` message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotFound {
    pub items: Vec<InventoryItem>,
}

impl Payload for NotFound {
    const IDENTIFIER: Identifier = Identifier::NotFound;

    fn serialize(&self, _version: u32, out: &mut Vec<u8>) {
        serialize_items(&self.items, out);
    }

    fn deserialize(_version: u32, payload: &[u8]) -> Result<Self, MessageError> {
        Ok(Self {
            items: deserialize_items(payload)?,
        })
    }
}

/// The `feefilter` message (BIP 133).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeeFilter {
    pub minimum_fee: u64,
}

impl Payload for FeeFilter {
    const IDENTIFIER: Identifier = Identifier::FeeFilter;

    fn serialize(&self, _version: u32, out: &mut Vec<u8>) {
        out.put_u64_le(self.minimum_fee);
    }

    fn deserialize(_version: u32, payload: &[u8]) -> Result<Self, MessageError> {
        let mut reader = Reader::new(payload);
        let minimum_fee = reader.read_u64_le()?;
        reader.finish()?;
        Ok(Self { minimum_fee })
    }
}

/// The `sendcmpct` message (BIP 152).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendCompact {
    pub high_bandwidth: bool,
    pub version: u64,
}

impl Payload for SendCompact {
    const IDENTIFIER: Identifier = Identifier::SendCompact;

    fn serialize(&self, _version: u32, out: &mut Vec<u8>) {
        out.put_u8(u8::from(self.high_bandwidth));
        out.put_u64_le(self.version);
    }

    fn deserialize(_version: u32, payload: &[u8]) -> Result<Self, MessageError> {
        let mut reader = Reader::new(payload);
        let high_bandwidth = reader.read_u8()? != 0;
        let version = reader.read_u64_le()?;
        reader.finish()?;
        Ok(Self {
            high_bandwidth,
            version,
        })
    }
}

/// The `sendheaders` message (BIP 130, empty payload).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendHeaders;

impl Payload for SendHeaders {
    const IDENTIFIER: Identifier = Identifier::SendHeaders;

    fn serialize(&self, _version: u32, _out: &mut Vec<u8>) {}

    fn deserialize(_version: u32, payload: &[u8]) -> Result<Self, MessageError> {
        Reader::new(payload).finish()?;
        Ok(Self)
    }
}

/// The `mempool` message (BIP 35, empty payload).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryPool;

impl Payload for MemoryPool {
    const IDENTIFIER: Identifier = Identifier::MemoryPool;

    fn serialize(&self, _version: u32, _out: &mut Vec<u8>) {}

    fn deserialize(_version: u32, payload: &[u8]) -> Result<Self, MessageError> {
        Reader::new(payload).finish()?;
        Ok(Self)
    }
}

/// The `filterclear` message (BIP 37, empty payload).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterClear;

impl Payload for FilterClear {
    const IDENTIFIER: Identifier = Identifier::FilterClear;

    fn serialize(&self, _version: u32, _out: &mut Vec<u8>) {}

    fn deserialize(_version: u32, payload: &[u8]) -> Result<Self, MessageError> {
        Reader::new(payload).finish()?;
        Ok(Self)
    }
}

/// Generates an opaque carrier: the payload bytes pass through untouched.
macro_rules! opaque_payload {
    ($(#[$doc:meta])* $name:ident, $identifier:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Default, PartialEq, Eq)]
        pub struct $name {
            pub data: Vec<u8>,
        }

        impl Payload for $name {
            const IDENTIFIER: Identifier = $identifier;

            fn serialize(&self, _version: u32, out: &mut Vec<u8>) {
                out.put_bytes(&self.data);
            }

            fn deserialize(_version: u32, payload: &[u8]) -> Result<Self, MessageError> {
                Ok(Self {
                    data: payload.to_vec(),
                })
            }
        }
    };
}

opaque_payload!(
    /// The `block` message. Deserialized through the shared buffer pool to
    /// avoid reallocating multi-megabyte payloads.
    Block,
    Identifier::Block
);
opaque_payload!(
    /// The `tx` message.
    Transaction,
    Identifier::Transaction
);
opaque_payload!(
    /// The `headers` message.
    Headers,
    Identifier::Headers
);
opaque_payload!(
    /// The `getblocks` message.
    GetBlocks,
    Identifier::GetBlocks
);
opaque_payload!(
    /// The `getheaders` message.
    GetHeaders,
    Identifier::GetHeaders
);
opaque_payload!(
    /// The `merkleblock` message (BIP 37).
    MerkleBlock,
    Identifier::MerkleBlock
);
opaque_payload!(
    /// The `cmpctblock` message (BIP 152).
    CompactBlock,
    Identifier::CompactBlock
);
opaque_payload!(
    /// The `blocktxn` message (BIP 152).
    BlockTransactions,
    Identifier::BlockTransactions
);
opaque_payload!(
    /// The `getblocktxn` message (BIP 152).
    GetBlockTransactions,
    Identifier::GetBlockTransactions
);
opaque_payload!(
    /// The `cfilter` message (BIP 157).
    CompactFilter,
    Identifier::CompactFilter
);
opaque_payload!(
    /// The `cfheaders` message (BIP 157).
    CompactFilterHeaders,
    Identifier::CompactFilterHeaders
);
opaque_payload!(
    /// The `cfcheckpt` message (BIP 157).
    CompactFilterCheckpoint,
    Identifier::CompactFilterCheckpoint
);
opaque_payload!(
    /// The `getcfilters` message (BIP 157).
    GetCompactFilters,
    Identifier::GetCompactFilters
);
opaque_payload!(
    /// The `getcfheaders` message (BIP 157).
    GetCompactFilterHeaders,
    Identifier::GetCompactFilterHeaders
);
opaque_payload!(
    /// The `getcfcheckpt` message (BIP 157).
    GetCompactFilterCheckpoint,
    Identifier::GetCompactFilterCheckpoint
);
opaque_payload!(
    /// The `filteradd` message (BIP 37).
    FilterAdd,
    Identifier::FilterAdd
);
opaque_payload!(
    /// The `filterload` message (BIP 37).
    FilterLoad,
    Identifier::FilterLoad
);
