//! # Distributor
//!
//! Per-channel typed fan-out: one subscriber per wire message type, keyed by
//! identifier. A message whose type has no subscribers is never
//! deserialized. The distributor also carries the channel's buffer-pool
//! reference, used by the read loop to stage large payloads.

use std::sync::Arc;

use btcnet_messages::{
    Address, Alert, Block, BlockTransactions, CompactBlock, CompactFilter,
    CompactFilterCheckpoint, CompactFilterHeaders, FeeFilter, FilterAdd, FilterClear, FilterLoad,
    GetAddress, GetBlockTransactions, GetBlocks, GetCompactFilterCheckpoint,
    GetCompactFilterHeaders, GetCompactFilters, GetData, GetHeaders, Headers, Identifier,
    Inventory, MemoryPool, MerkleBlock, NotFound, Payload, Ping, Pong, Reject, SendCompact,
    SendHeaders, Transaction, Version, VersionAcknowledge,
};

use crate::error::Error;
use crate::memory::BufferPool;
use crate::subscribe::Subscriber;

/// Maps a message type to its subscriber slot in the distributor.
pub trait Dispatch: Payload {
    fn subscriber(distributor: &Distributor) -> &Subscriber<Arc<Self>>;
}

/// Table of typed subscribers for every dispatchable message.
pub struct Distributor {
    pool: BufferPool,
    address: Subscriber<Arc<Address>>,
    alert: Subscriber<Arc<Alert>>,
    block: Subscriber<Arc<Block>>,
    block_transactions: Subscriber<Arc<BlockTransactions>>,
    compact_block: Subscriber<Arc<CompactBlock>>,
    compact_filter: Subscriber<Arc<CompactFilter>>,
    compact_filter_checkpoint: Subscriber<Arc<CompactFilterCheckpoint>>,
    compact_filter_headers: Subscriber<Arc<CompactFilterHeaders>>,
    fee_filter: Subscriber<Arc<FeeFilter>>,
    filter_add: Subscriber<Arc<FilterAdd>>,
    filter_clear: Subscriber<Arc<FilterClear>>,
    filter_load: Subscriber<Arc<FilterLoad>>,
    get_address: Subscriber<Arc<GetAddress>>,
    get_blocks: Subscriber<Arc<GetBlocks>>,
    get_block_transactions: Subscriber<Arc<GetBlockTransactions>>,
    get_compact_filter_checkpoint: Subscriber<Arc<GetCompactFilterCheckpoint>>,
    get_compact_filter_headers: Subscriber<Arc<GetCompactFilterHeaders>>,
    get_compact_filters: Subscriber<Arc<GetCompactFilters>>,
    get_data: Subscriber<Arc<GetData>>,
    get_headers: Subscriber<Arc<GetHeaders>>,
    headers: Subscriber<Arc<Headers>>,
    inventory: Subscriber<Arc<Inventory>>,
    memory_pool: Subscriber<Arc<MemoryPool>>,
    merkle_block: Subscriber<Arc<MerkleBlock>>,
    not_found: Subscriber<Arc<NotFound>>,
    ping: Subscriber<Arc<Ping>>,
    pong: Subscriber<Arc<Pong>>,
    reject: Subscriber<Arc<Reject>>,
    send_compact: Subscriber<Arc<SendCompact>>,
    send_headers: Subscriber<Arc<SendHeaders>>,
    transaction: Subscriber<Arc<Transaction>>,
    version: Subscriber<Arc<Version>>,
    version_acknowledge: Subscriber<Arc<VersionAcknowledge>>,
}

impl Distributor {
    pub fn new(pool: BufferPool) -> Self {
        Self {
            pool,
            address: Subscriber::new(),
            alert: Subscriber::new(),
            block: Subscriber::new(),
            block_transactions: Subscriber::new(),
            compact_block: Subscriber::new(),
            compact_filter: Subscriber::new(),
            compact_filter_checkpoint: Subscriber::new(),
            compact_filter_headers: Subscriber::new(),
            fee_filter: Subscriber::new(),
            filter_add: Subscriber::new(),
            filter_clear: Subscriber::new(),
            filter_load: Subscriber::new(),
            get_address: Subscriber::new(),
            get_blocks: Subscriber::new(),
            get_block_transactions: Subscriber::new(),
            get_compact_filter_checkpoint: Subscriber::new(),
            get_compact_filter_headers: Subscriber::new(),
            get_compact_filters: Subscriber::new(),
            get_data: Subscriber::new(),
            get_headers: Subscriber::new(),
            headers: Subscriber::new(),
            inventory: Subscriber::new(),
            memory_pool: Subscriber::new(),
            merkle_block: Subscriber::new(),
            not_found: Subscriber::new(),
            ping: Subscriber::new(),
            pong: Subscriber::new(),
            reject: Subscriber::new(),
            send_compact: Subscriber::new(),
            send_headers: Subscriber::new(),
            transaction: Subscriber::new(),
            version: Subscriber::new(),
            version_acknowledge: Subscriber::new(),
        }
    }

    /// The shared payload buffer pool.
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Subscribe a handler to one message type.
    pub fn subscribe<T: Dispatch>(
        &self,
        handler: impl FnMut(Result<&Arc<T>, Error>) -> bool + Send + 'static,
    ) -> Result<(), Error> {
        T::subscriber(self).subscribe(handler)
    }

    /// Deserialize and dispatch a payload to the subscribers of its type.
    ///
    /// Returns `UnknownMessage` for unrecognized identifiers,
    /// `InvalidMessage` when a subscribed type fails to parse, and success
    /// (without parsing) when nobody subscribes to the type.
    pub fn notify(&self, id: Identifier, version: u32, payload: &[u8]) -> Result<(), Error> {
        match id {
            Identifier::Address => dispatch(&self.address, version, payload),
            Identifier::Alert => dispatch(&self.alert, version, payload),
            Identifier::Block => dispatch(&self.block, version, payload),
            Identifier::BlockTransactions => {
                dispatch(&self.block_transactions, version, payload)
            }
            Identifier::CompactBlock => dispatch(&self.compact_block, version, payload),
            Identifier::CompactFilter => dispatch(&self.compact_filter, version, payload),
            Identifier::CompactFilterCheckpoint => {
                dispatch(&self.compact_filter_checkpoint, version, payload)
            }
            Identifier::CompactFilterHeaders => {
                dispatch(&self.compact_filter_headers, version, payload)
            }
            Identifier::FeeFilter => dispatch(&self.fee_filter, version, payload),
            Identifier::FilterAdd => dispatch(&self.filter_add, version, payload),
            Identifier::FilterClear => dispatch(&self.filter_clear, version, payload),
            Identifier::FilterLoad => dispatch(&self.filter_load, version, payload),
            Identifier::GetAddress => dispatch(&self.get_address, version, payload),
            Identifier::GetBlocks => dispatch(&self.get_blocks, version, payload),
            Identifier::GetBlockTransactions => {
                dispatch(&self.get_block_transactions, version, payload)
            }
            Identifier::GetCompactFilterCheckpoint => {
                dispatch(&self.get_compact_filter_checkpoint, version, payload)
            }
            Identifier::GetCompactFilterHeaders => {
                dispatch(&self.get_compact_filter_headers, version, payload)
            }
            Identifier::GetCompactFilters => {
                dispatch(&self.get_compact_filters, version, payload)
            }
            Identifier::GetData => dispatch(&self.get_data, version, payload),
            Identifier::GetHeaders => dispatch(&self.get_headers, version, payload),
            Identifier::Headers => dispatch(&self.headers, version, payload),
            Identifier::Inventory => dispatch(&self.inventory, version, payload),
            Identifier::MemoryPool => dispatch(&self.memory_pool, version, payload),
            Identifier::MerkleBlock => dispatch(&self.merkle_block, version, payload),
            Identifier::NotFound => dispatch(&self.not_found, version, payload),
            Identifier::Ping => dispatch(&self.ping, version, payload),
            Identifier::Pong => dispatch(&self.pong, version, payload),
            Identifier::Reject => dispatch(&self.reject, version, payload),
            Identifier::SendCompact => dispatch(&self.send_compact, version, payload),
            Identifier::SendHeaders => dispatch(&self.send_headers, version, payload),
            Identifier::Transaction => dispatch(&self.transaction, version, payload),
            Identifier::Version => dispatch(&self.version, version, payload),
            Identifier::VersionAcknowledge => {
                dispatch(&self.version_acknowledge, version, payload)
            }
            Identifier::Unknown => Err(Error::UnknownMessage),
        }
    }

    /// Propagate a terminal code to every typed subscriber.
    pub fn stop(&self, code: Error) {
        self.address.stop(code);
        self.alert.stop(code);
        self.block.stop(code);
        self.block_transactions.stop(code);
        self.compact_block.stop(code);
        self.compact_filter.stop(code);
        self.compact_filter_checkpoint.stop(code);
        self.compact_filter_headers.stop(code);
        self.fee_filter.stop(code);
        self.filter_add.stop(code);
        self.filter_clear.stop(code);
        self.filter_load.stop(code);
        self.get_address.stop(code);
        self.get_blocks.stop(code);
        self.get_block_transactions.stop(code);
        self.get_compact_filter_checkpoint.stop(code);
        self.get_compact_filter_headers.stop(code);
        self.get_compact_filters.stop(code);
        self.get_data.stop(code);
        self.get_headers.stop(code);
        self.headers.stop(code);
        self.inventory.stop(code);
        self.memory_pool.stop(code);
        self.merkle_block.stop(code);
        self.not_found.stop(code);
        self.ping.stop(code);
        self.pong.stop(code);
        self.reject.stop(code);
        self.send_compact.stop(code);
        self.send_headers.stop(code);
        self.transaction.stop(code);
        self.version.stop(code);
        self.version_acknowledge.stop(code);
    }
}

fn dispatch<T: Payload>(
    subscriber: &Subscriber<Arc<T>>,
    version: u32,
    payload: &[u8],
) -> Result<(), Error> {
    if subscriber.is_empty() {
        return Ok(());
    }

    match T::deserialize(version, payload) {
        Ok(message) => {
            subscriber.notify(Ok(&Arc::new(message)));
            Ok(())
        }
        Err(_) => Err(Error::InvalidMessage),
    }
}

impl Dispatch for Address {
    fn subscriber(distributor: &Distributor) -> &Subscriber<Arc<Self>> {
        &distributor.address
    }
}

impl Dispatch for Alert {
    fn subscriber(distributor: &Distributor) -> &Subscriber<Arc<Self>> {
        &distributor.alert
    }
}

impl Dispatch for Block {
    fn subscriber(distributor: &Distributor) -> &Subscriber<Arc<Self>> {
        &distributor.block
    }
}

impl Dispatch for BlockTransactions {
    fn subscriber(distributor: &Distributor) -> &Subscriber<Arc<Self>> {
        &distributor.block_transactions
    }
}

impl Dispatch for CompactBlock {
    fn subscriber(distributor: &Distributor) -> &Subscriber<Arc<Self>> {
        &distributor.compact_block
    }
}

impl Dispatch for CompactFilter {
    fn subscriber(distributor: &Distributor) -> &Subscriber<Arc<Self>> {
        &distributor.compact_filter
    }
}

impl Dispatch for CompactFilterCheckpoint {
    fn subscriber(distributor: &Distributor) -> &Subscriber<Arc<Self>> {
        &distributor.compact_filter_checkpoint
    }
}

impl Dispatch for CompactFilterHeaders {
    fn subscriber(distributor: &Distributor) -> &Subscriber<Arc<Self>> {
        &distributor.compact_filter_headers
    }
}

impl Dispatch for FeeFilter {
    fn subscriber(distributor: &Distributor) -> &Subscriber<Arc<Self>> {
        &distributor.fee_filter
    }
}

impl Dispatch for FilterAdd {
    fn subscriber(distributor: &Distributor) -> &Subscriber<Arc<Self>> {
        &distributor.filter_add
    }
}

impl Dispatch for FilterClear {
    fn subscriber(distributor: &Distributor) -> &Subscriber<Arc<Self>> {
        &distributor.filter_clear
    }
}

impl Dispatch for FilterLoad {
    fn subscriber(distributor: &Distributor) -> &Subscriber<Arc<Self>> {
        &distributor.filter_load
    }
}

impl Dispatch for GetAddress {
    fn subscriber(distributor: &Distributor) -> &Subscriber<Arc<Self>> {
        &distributor.get_address
    }
}

impl Dispatch for GetBlocks {
    fn subscriber(distributor: &Distributor) -> &Subscriber<Arc<Self>> {
        &distributor.get_blocks
    }
}

impl Dispatch for GetBlockTransactions {
    fn subscriber(distributor: &Distributor) -> &Subscriber<Arc<Self>> {
        &distributor.get_block_transactions
    }
}

impl Dispatch for GetCompactFilterCheckpoint {
    fn subscriber(distributor: &Distributor) -> &Subscriber<Arc<Self>> {
        &distributor.get_compact_filter_checkpoint
    }
}

impl Dispatch for GetCompactFilterHeaders {
    fn subscriber(distributor: &Distributor) -> &Subscriber<Arc<Self>> {
        &distributor.get_compact_filter_headers
    }
}

impl Dispatch for GetCompactFilters {
    fn subscriber(distributor: &Distributor) -> &Subscriber<Arc<Self>> {
        &distributor.get_compact_filters
    }
}

impl Dispatch for GetData {
    fn subscriber(distributor: &Distributor) -> &Subscriber<Arc<Self>> {
        &distributor.get_data
    }
}

impl Dispatch for GetHeaders {
    fn subscriber(distributor: &Distributor) -> &Subscriber<Arc<Self>> {
        &distributor.get_headers
    }
}

impl Dispatch for Headers {
    fn subscriber(distributor: &Distributor) -> &Subscriber<Arc<Self>> {
        &distributor.headers
    }
}

impl Dispatch for Inventory {
    fn subscriber(distributor: &Distributor) -> &Subscriber<Arc<Self>> {
        &distributor.inventory
    }
}

impl Dispatch for MemoryPool {
    fn subscriber(distributor: &Distributor) -> &Subscriber<Arc<Self>> {
        &distributor.memory_pool
    }
}

impl Dispatch for MerkleBlock {
    fn subscriber(distributor: &Distributor) -> &Subscriber<Arc<Self>> {
        &distributor.merkle_block
    }
}

impl Dispatch for NotFound {
    fn subscriber(distributor: &Distributor) -> &Subscriber<Arc<Self>> {
        &distributor.not_found
    }
}

impl Dispatch for Ping {
    fn subscriber(distributor: &Distributor) -> &Subscriber<Arc<Self>> {
        &distributor.ping
    }
}

impl Dispatch for Pong {
    fn subscriber(distributor: &Distributor) -> &Subscriber<Arc<Self>> {
        &distributor.pong
    }
}

impl Dispatch for Reject {
    fn subscriber(distributor: &Distributor) -> &Subscriber<Arc<Self>> {
        &distributor.reject
    }
}

impl Dispatch for SendCompact {
    fn subscriber(distributor: &Distributor) -> &Subscriber<Arc<Self>> {
        &distributor.send_compact
    }
}

impl Dispatch for SendHeaders {
    fn subscriber(distributor: &Distributor) -> &Subscriber<Arc<Self>> {
        &distributor.send_headers
    }
}

impl Dispatch for Transaction {
    fn subscriber(distributor: &Distributor) -> &Subscriber<Arc<Self>> {
        &distributor.transaction
    }
}

impl Dispatch for Version {
    fn subscriber(distributor: &Distributor) -> &Subscriber<Arc<Self>> {
        &distributor.version
    }
}

impl Dispatch for VersionAcknowledge {
    fn subscriber(distributor: &Distributor) -> &Subscriber<Arc<Self>> {
        &distributor.version_acknowledge
    }
}
