//! Storage collaborator interfaces.
//!
//! The header chain and the wallet's transaction store are owned by other
//! parts of the client. The sync engine talks to them only through these
//! traits, and never while holding its own state lock.

pub mod memory;

use async_trait::async_trait;
use dashcore::network::message_blockdata::Inventory;
use dashcore::network::message_bloom::FilterLoad;
use dashcore::{BlockHash, Header as BlockHeader, Transaction, Txid};

use crate::error::StorageResult;
use crate::types::{ChainState, CommitOutcome, ReorgDescriptor, TxRecord};

pub use memory::{MemoryHeaderStore, MemoryTxStore};

/// Header chain store.
#[async_trait]
pub trait HeaderStore: Send + Sync {
    /// Height of the current best chain tip.
    async fn height(&self) -> StorageResult<u32>;

    /// Locator hashes describing the best chain, tip first.
    async fn block_locator_hashes(&self) -> StorageResult<Vec<BlockHash>>;

    /// Submit a header received from the network.
    async fn commit_header(&self, header: BlockHeader) -> StorageResult<CommitOutcome>;

    /// Persist the engine's download state.
    async fn set_chain_state(&self, state: ChainState) -> StorageResult<()>;

    /// Download state persisted by the last `set_chain_state`.
    async fn chain_state(&self) -> StorageResult<ChainState>;

    /// Persist the fork point of a reorganization. With `best` set the fork
    /// point becomes the best tip so the next block request resumes from it.
    async fn persist_reorg_marker(
        &self,
        descriptor: &ReorgDescriptor,
        best: bool,
    ) -> StorageResult<()>;
}

/// Wallet transaction store.
#[async_trait]
pub trait TxStore: Send + Sync {
    /// Ingest a transaction seen at `height` (0 while unconfirmed). Returns how
    /// many watched outputs or outpoints it touched.
    async fn ingest(&self, tx: &Transaction, height: u32) -> StorageResult<u32>;

    /// All stored transactions, oldest first.
    async fn all_transactions(&self, include_dead: bool) -> StorageResult<Vec<TxRecord>>;

    /// Give up on an unconfirmed transaction.
    async fn mark_dead(&self, txid: &Txid) -> StorageResult<()>;

    /// Unconfirm every transaction recorded at `from_height` or above.
    async fn process_reorg(&self, from_height: u32) -> StorageResult<()>;

    /// Look up a stored transaction.
    async fn lookup(&self, txid: &Txid) -> StorageResult<Option<(Transaction, TxRecord)>>;

    /// Build a bloom filter covering everything the wallet is interested in.
    async fn build_filter(&self) -> StorageResult<FilterLoad>;

    /// Inventory announcing every pending (unconfirmed, not dead) transaction.
    async fn pending_inventory(&self) -> StorageResult<Vec<Inventory>>;
}
