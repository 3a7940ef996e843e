//! # Bitcoin Wire Message Catalog
//!
//! Data model for the Bitcoin peer-to-peer wire protocol: message
//! identifiers, the 24-byte heading, and payload codecs.
//!
//! ## Design
//!
//! - Protocol-plane messages (version, addr, ping, reject, ...) carry fully
//!   decoded fields.
//! - Data-plane messages (block, tx, headers, filters, ...) are opaque byte
//!   carriers; their interior structure is a consumer concern.
//! - All codecs are version-aware: fields gated by protocol level (ping
//!   nonce, version relay flag) serialize only at or above their level.
//!
//! Reference: <https://developer.bitcoin.org/reference/p2p_networking.html>

pub mod address;
pub mod alert;
pub mod codec;
pub mod data;
pub mod heading;
pub mod identifier;
pub mod payload;
pub mod ping;
pub mod reject;
pub mod version;

pub use address::{Address, AddressItem, GetAddress, NetworkAddress};
pub use alert::Alert;
pub use codec::{MessageError, Reader, WriteExt};
pub use data::{
    Block, BlockTransactions, CompactBlock, CompactFilter, CompactFilterCheckpoint,
    CompactFilterHeaders, FeeFilter, FilterAdd, FilterClear, FilterLoad, GetBlocks,
    GetBlockTransactions, GetCompactFilterCheckpoint, GetCompactFilterHeaders, GetCompactFilters,
    GetData, GetHeaders, Headers, Inventory, InventoryItem, MemoryPool, MerkleBlock, NotFound,
    SendCompact, SendHeaders, Transaction,
};
pub use heading::{checksum, Heading, HEADING_SIZE, MAX_PAYLOAD_LEGACY, MAX_PAYLOAD_WITNESS};
pub use identifier::Identifier;
pub use payload::{serialize_message, Payload};
pub use ping::{Ping, Pong};
pub use reject::{Reject, RejectCode};
pub use version::{level, service, Version, VersionAcknowledge};
