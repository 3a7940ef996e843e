//! # Message Identifiers
//!
//! One identifier per known wire command, plus `Unknown` for commands this
//! node does not recognize (which are ignored, never fatal).

/// Identifier for every message the distributor can dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Identifier {
    Address,
    Alert,
    Block,
    BlockTransactions,
    CompactBlock,
    CompactFilter,
    CompactFilterCheckpoint,
    CompactFilterHeaders,
    FeeFilter,
    FilterAdd,
    FilterClear,
    FilterLoad,
    GetAddress,
    GetBlocks,
    GetBlockTransactions,
    GetCompactFilterCheckpoint,
    GetCompactFilterHeaders,
    GetCompactFilters,
    GetData,
    GetHeaders,
    Headers,
    Inventory,
    MemoryPool,
    MerkleBlock,
    NotFound,
    Ping,
    Pong,
    Reject,
    SendCompact,
    SendHeaders,
    Transaction,
    Version,
    VersionAcknowledge,
    Unknown,
}

impl Identifier {
    /// The wire command string (null-padded to 12 bytes in the heading).
    pub fn command(&self) -> &'static str {
        match self {
            Identifier::Address => "addr",
            Identifier::Alert => "alert",
            Identifier::Block => "block",
            Identifier::BlockTransactions => "blocktxn",
            Identifier::CompactBlock => "cmpctblock",
            Identifier::CompactFilter => "cfilter",
            Identifier::CompactFilterCheckpoint => "cfcheckpt",
            Identifier::CompactFilterHeaders => "cfheaders",
            Identifier::FeeFilter => "feefilter",
            Identifier::FilterAdd => "filteradd",
            Identifier::FilterClear => "filterclear",
            Identifier::FilterLoad => "filterload",
            Identifier::GetAddress => "getaddr",
            Identifier::GetBlocks => "getblocks",
            Identifier::GetBlockTransactions => "getblocktxn",
            Identifier::GetCompactFilterCheckpoint => "getcfcheckpt",
            Identifier::GetCompactFilterHeaders => "getcfheaders",
            Identifier::GetCompactFilters => "getcfilters",
            Identifier::GetData => "getdata",
            Identifier::GetHeaders => "getheaders",
            Identifier::Headers => "headers",
            Identifier::Inventory => "inv",
            Identifier::MemoryPool => "mempool",
            Identifier::MerkleBlock => "merkleblock",
            Identifier::NotFound => "notfound",
            Identifier::Ping => "ping",
            Identifier::Pong => "pong",
            Identifier::Reject => "reject",
            Identifier::SendCompact => "sendcmpct",
            Identifier::SendHeaders => "sendheaders",
            Identifier::Transaction => "tx",
            Identifier::Version => "version",
            Identifier::VersionAcknowledge => "verack",
            Identifier::Unknown => "",
        }
    }

    /// Map a command string (already null-trimmed) to its identifier.
    pub fn from_command(command: &str) -> Identifier {
        match command {
            "addr" => Identifier::Address,
            "alert" => Identifier::Alert,
            "block" => Identifier::Block,
            "blocktxn" => Identifier::BlockTransactions,
            "cmpctblock" => Identifier::CompactBlock,
            "cfilter" => Identifier::CompactFilter,
            "cfcheckpt" => Identifier::CompactFilterCheckpoint,
            "cfheaders" => Identifier::CompactFilterHeaders,
            "feefilter" => Identifier::FeeFilter,
            "filteradd" => Identifier::FilterAdd,
            "filterclear" => Identifier::FilterClear,
            "filterload" => Identifier::FilterLoad,
            "getaddr" => Identifier::GetAddress,
            "getblocks" => Identifier::GetBlocks,
            "getblocktxn" => Identifier::GetBlockTransactions,
            "getcfcheckpt" => Identifier::GetCompactFilterCheckpoint,
            "getcfheaders" => Identifier::GetCompactFilterHeaders,
            "getcfilters" => Identifier::GetCompactFilters,
            "getdata" => Identifier::GetData,
            "getheaders" => Identifier::GetHeaders,
            "headers" => Identifier::Headers,
            "inv" => Identifier::Inventory,
            "mempool" => Identifier::MemoryPool,
            "merkleblock" => Identifier::MerkleBlock,
            "notfound" => Identifier::NotFound,
            "ping" => Identifier::Ping,
            "pong" => Identifier::Pong,
            "reject" => Identifier::Reject,
            "sendcmpct" => Identifier::SendCompact,
            "sendheaders" => Identifier::SendHeaders,
            "tx" => Identifier::Transaction,
            "version" => Identifier::Version,
            "verack" => Identifier::VersionAcknowledge,
            _ => Identifier::Unknown,
        }
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Identifier::Unknown => f.write_str("(unknown)"),
            known => f.write_str(known.command()),
        }
    }
}
