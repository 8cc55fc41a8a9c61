//! In-memory header and transaction stores.
//!
//! These keep everything in process memory and are meant for tests and for
//! embedders that persist state elsewhere.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashcore::bloom::BloomFilter;
use dashcore::network::message_blockdata::Inventory;
use dashcore::network::message_bloom::{BloomFlags, FilterLoad};
use dashcore::{BlockHash, Header as BlockHeader, OutPoint, ScriptBuf, Transaction, Txid};
use dashcore_hashes::Hash;
use tokio::sync::RwLock;

use super::{HeaderStore, TxStore};
use crate::error::{StorageError, StorageResult};
use crate::types::{ChainState, CommitOutcome, ReorgDescriptor, TxRecord};

/// Locator entries taken one block apart before the step starts doubling.
const LOCATOR_DENSE_ENTRIES: usize = 10;

/// Upper bound on the number of locator hashes.
const MAX_LOCATOR_HASHES: usize = 101;

#[derive(Debug, Clone)]
struct StoredHeader {
    header: BlockHeader,
    height: u32,
}

#[derive(Debug)]
struct HeaderChain {
    headers: HashMap<BlockHash, StoredHeader>,
    /// Best chain, indexed by height.
    best_chain: Vec<BlockHash>,
    chain_state: ChainState,
    last_reorg: Option<ReorgDescriptor>,
}

impl HeaderChain {
    fn tip_height(&self) -> u32 {
        self.best_chain.len().saturating_sub(1) as u32
    }

    fn tip_hash(&self) -> BlockHash {
        self.best_chain.last().copied().unwrap_or_else(BlockHash::all_zeros)
    }

    fn is_on_best_chain(&self, hash: &BlockHash) -> bool {
        self.headers
            .get(hash)
            .is_some_and(|stored| self.best_chain.get(stored.height as usize) == Some(hash))
    }

    /// Walk back from `hash` until a header on the best chain is found.
    fn find_fork_point(&self, hash: BlockHash) -> StorageResult<StoredHeader> {
        let mut cursor = hash;
        loop {
            let stored = self.headers.get(&cursor).ok_or_else(|| {
                StorageError::InconsistentState(format!("missing ancestor {}", cursor))
            })?;
            if self.is_on_best_chain(&cursor) {
                return Ok(stored.clone());
            }
            if stored.height == 0 {
                return Err(StorageError::InconsistentState(
                    "branch does not connect to the best chain".to_string(),
                ));
            }
            cursor = stored.header.prev_blockhash;
        }
    }

    /// Make the branch ending in `tip` the best chain.
    fn switch_to_branch(&mut self, fork_height: u32, tip: BlockHash) -> StorageResult<()> {
        let mut branch = Vec::new();
        let mut cursor = tip;
        loop {
            let stored = self.headers.get(&cursor).ok_or_else(|| {
                StorageError::InconsistentState(format!("missing branch header {}", cursor))
            })?;
            if stored.height <= fork_height {
                break;
            }
            branch.push(cursor);
            cursor = stored.header.prev_blockhash;
        }

        self.best_chain.truncate(fork_height as usize + 1);
        self.best_chain.extend(branch.into_iter().rev());
        Ok(())
    }
}

/// Header store that treats the longest branch as the best chain.
#[derive(Debug)]
pub struct MemoryHeaderStore {
    chain: RwLock<HeaderChain>,
}

impl MemoryHeaderStore {
    /// Create a store whose chain starts at `root` (height 0).
    pub fn new(root: BlockHeader) -> Self {
        let hash = root.block_hash();
        let mut headers = HashMap::new();
        headers.insert(
            hash,
            StoredHeader {
                header: root,
                height: 0,
            },
        );

        Self {
            chain: RwLock::new(HeaderChain {
                headers,
                best_chain: vec![hash],
                chain_state: ChainState::Syncing,
                last_reorg: None,
            }),
        }
    }

    /// Hash of the best chain tip.
    pub async fn tip_hash(&self) -> BlockHash {
        self.chain.read().await.tip_hash()
    }

    /// Header on the best chain at `height`.
    pub async fn header_at(&self, height: u32) -> Option<BlockHeader> {
        let chain = self.chain.read().await;
        let hash = chain.best_chain.get(height as usize)?;
        chain.headers.get(hash).map(|stored| stored.header)
    }

    /// The most recently persisted reorg marker.
    pub async fn last_reorg(&self) -> Option<ReorgDescriptor> {
        self.chain.read().await.last_reorg.clone()
    }
}

#[async_trait]
impl HeaderStore for MemoryHeaderStore {
    async fn height(&self) -> StorageResult<u32> {
        Ok(self.chain.read().await.tip_height())
    }

    async fn block_locator_hashes(&self) -> StorageResult<Vec<BlockHash>> {
        let chain = self.chain.read().await;
        let mut locator = Vec::new();
        let mut height = chain.tip_height() as usize;
        let mut step = 1usize;

        loop {
            locator.push(chain.best_chain[height]);
            if height == 0 || locator.len() >= MAX_LOCATOR_HASHES - 1 {
                break;
            }
            if locator.len() >= LOCATOR_DENSE_ENTRIES {
                step *= 2;
            }
            height = height.saturating_sub(step);
        }

        if locator.last() != chain.best_chain.first() {
            locator.push(chain.best_chain[0]);
        }

        Ok(locator)
    }

    async fn commit_header(&self, header: BlockHeader) -> StorageResult<CommitOutcome> {
        let mut chain = self.chain.write().await;
        let hash = header.block_hash();

        if chain.is_on_best_chain(&hash) {
            return Ok(CommitOutcome::NotNew);
        }

        let parent_height = chain
            .headers
            .get(&header.prev_blockhash)
            .map(|parent| parent.height)
            .ok_or(StorageError::OrphanHeader(hash))?;
        let height = parent_height + 1;

        if header.prev_blockhash == chain.tip_hash() {
            chain.headers.insert(
                hash,
                StoredHeader {
                    header,
                    height,
                },
            );
            chain.best_chain.push(hash);
            return Ok(CommitOutcome::Extended {
                height,
            });
        }

        if chain.headers.contains_key(&hash) {
            return Ok(CommitOutcome::NotNew);
        }

        chain.headers.insert(
            hash,
            StoredHeader {
                header,
                height,
            },
        );

        if height <= chain.tip_height() {
            tracing::debug!("Stored side branch header {} at height {}", hash, height);
            return Ok(CommitOutcome::NotNew);
        }

        let fork_point = chain.find_fork_point(hash)?;
        chain.switch_to_branch(fork_point.height, hash)?;

        Ok(CommitOutcome::Reorg {
            height,
            descriptor: ReorgDescriptor {
                height: fork_point.height + 1,
                fork_point: fork_point.header,
            },
        })
    }

    async fn set_chain_state(&self, state: ChainState) -> StorageResult<()> {
        self.chain.write().await.chain_state = state;
        Ok(())
    }

    async fn chain_state(&self) -> StorageResult<ChainState> {
        Ok(self.chain.read().await.chain_state)
    }

    async fn persist_reorg_marker(
        &self,
        descriptor: &ReorgDescriptor,
        best: bool,
    ) -> StorageResult<()> {
        let mut chain = self.chain.write().await;
        let fork_hash = descriptor.fork_point.block_hash();

        if best {
            if !chain.is_on_best_chain(&fork_hash) {
                return Err(StorageError::InconsistentState(format!(
                    "reorg fork point {} is not on the best chain",
                    fork_hash
                )));
            }
            chain.best_chain.truncate(descriptor.height as usize);
        }

        chain.last_reorg = Some(descriptor.clone());
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct StoredTx {
    tx: Transaction,
    record: TxRecord,
}

#[derive(Debug, Default)]
struct Wallet {
    txs: HashMap<Txid, StoredTx>,
    /// Insertion order of `txs`.
    order: Vec<Txid>,
    scripts: Vec<ScriptBuf>,
    outpoints: HashSet<OutPoint>,
}

/// Transaction store that matches outputs against watched scripts.
#[derive(Debug)]
pub struct MemoryTxStore {
    wallet: RwLock<Wallet>,
    false_positive_rate: f64,
    tweak: u32,
    fail_process_reorg: AtomicBool,
    fail_build_filter: AtomicBool,
    fail_mark_dead: Mutex<HashSet<Txid>>,
}

impl Default for MemoryTxStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTxStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            wallet: RwLock::new(Wallet::default()),
            false_positive_rate: 0.0005,
            tweak: rand::random::<u32>(),
            fail_process_reorg: AtomicBool::new(false),
            fail_build_filter: AtomicBool::new(false),
            fail_mark_dead: Mutex::new(HashSet::new()),
        }
    }

    /// Make `process_reorg` fail with a write error.
    pub fn set_fail_process_reorg(&self, fail: bool) {
        self.fail_process_reorg.store(fail, Ordering::SeqCst);
    }

    /// Make `build_filter` fail with a read error.
    pub fn set_fail_build_filter(&self, fail: bool) {
        self.fail_build_filter.store(fail, Ordering::SeqCst);
    }

    /// Make `mark_dead` fail with a write error for `txid`.
    pub fn set_fail_mark_dead(&self, txid: Txid) {
        if let Ok(mut failing) = self.fail_mark_dead.lock() {
            failing.insert(txid);
        }
    }

    fn mark_dead_fails(&self, txid: &Txid) -> bool {
        self.fail_mark_dead.lock().map(|failing| failing.contains(txid)).unwrap_or(false)
    }

    /// Watch outputs paying to `script`.
    pub async fn watch_script(&self, script: ScriptBuf) {
        let mut wallet = self.wallet.write().await;
        if !wallet.scripts.contains(&script) {
            wallet.scripts.push(script);
        }
    }

    /// Store a transaction directly, bypassing matching.
    pub async fn insert(&self, tx: Transaction, height: u32, timestamp: DateTime<Utc>) {
        let mut wallet = self.wallet.write().await;
        let txid = tx.txid();
        let record = TxRecord {
            txid,
            height,
            timestamp,
            dead: false,
        };
        if wallet.txs.insert(txid, StoredTx { tx, record }).is_none() {
            wallet.order.push(txid);
        }
    }

    /// Stored record for `txid`.
    pub async fn record(&self, txid: &Txid) -> Option<TxRecord> {
        self.wallet.read().await.txs.get(txid).map(|stored| stored.record.clone())
    }
}

#[async_trait]
impl TxStore for MemoryTxStore {
    async fn ingest(&self, tx: &Transaction, height: u32) -> StorageResult<u32> {
        let mut wallet = self.wallet.write().await;
        let txid = tx.txid();
        let mut hits = 0u32;
        let mut received = Vec::new();

        for (vout, output) in tx.output.iter().enumerate() {
            if wallet.scripts.contains(&output.script_pubkey) {
                hits += 1;
                received.push(OutPoint::new(txid, vout as u32));
            }
        }
        for input in &tx.input {
            if wallet.outpoints.contains(&input.previous_output) {
                hits += 1;
            }
        }

        if hits == 0 {
            return Ok(0);
        }

        wallet.outpoints.extend(received);
        match wallet.txs.get_mut(&txid) {
            Some(stored) => {
                if height > 0 {
                    stored.record.height = height;
                    stored.record.dead = false;
                }
            }
            None => {
                wallet.txs.insert(
                    txid,
                    StoredTx {
                        tx: tx.clone(),
                        record: TxRecord {
                            txid,
                            height,
                            timestamp: Utc::now(),
                            dead: false,
                        },
                    },
                );
                wallet.order.push(txid);
            }
        }

        Ok(hits)
    }

    async fn all_transactions(&self, include_dead: bool) -> StorageResult<Vec<TxRecord>> {
        let wallet = self.wallet.read().await;
        Ok(wallet
            .order
            .iter()
            .filter_map(|txid| wallet.txs.get(txid))
            .filter(|stored| include_dead || !stored.record.dead)
            .map(|stored| stored.record.clone())
            .collect())
    }

    async fn mark_dead(&self, txid: &Txid) -> StorageResult<()> {
        if self.mark_dead_fails(txid) {
            return Err(StorageError::WriteFailed(format!("mark {} dead", txid)));
        }
        let mut wallet = self.wallet.write().await;
        let stored = wallet
            .txs
            .get_mut(txid)
            .ok_or_else(|| StorageError::NotFound(format!("transaction {}", txid)))?;
        stored.record.dead = true;
        Ok(())
    }

    async fn process_reorg(&self, from_height: u32) -> StorageResult<()> {
        if self.fail_process_reorg.load(Ordering::SeqCst) {
            return Err(StorageError::WriteFailed(format!("reorg rollback from {}", from_height)));
        }
        let mut wallet = self.wallet.write().await;
        for stored in wallet.txs.values_mut() {
            if stored.record.height > 0 && stored.record.height >= from_height {
                stored.record.height = 0;
            }
        }
        Ok(())
    }

    async fn lookup(&self, txid: &Txid) -> StorageResult<Option<(Transaction, TxRecord)>> {
        let wallet = self.wallet.read().await;
        Ok(wallet.txs.get(txid).map(|stored| (stored.tx.clone(), stored.record.clone())))
    }

    async fn build_filter(&self) -> StorageResult<FilterLoad> {
        if self.fail_build_filter.load(Ordering::SeqCst) {
            return Err(StorageError::ReadFailed("bloom filter: store unavailable".into()));
        }
        let wallet = self.wallet.read().await;
        let elements = (wallet.scripts.len() + wallet.outpoints.len()).max(1) as u32;

        let mut filter =
            BloomFilter::new(elements, self.false_positive_rate, self.tweak, BloomFlags::All)
                .map_err(|e| StorageError::ReadFailed(format!("bloom filter: {:?}", e)))?;

        for script in &wallet.scripts {
            filter.insert(script.as_bytes());
        }
        for outpoint in &wallet.outpoints {
            filter.insert(&outpoint_bytes(outpoint));
        }

        Ok(FilterLoad::from_bloom_filter(&filter))
    }

    async fn pending_inventory(&self) -> StorageResult<Vec<Inventory>> {
        let wallet = self.wallet.read().await;
        Ok(wallet
            .order
            .iter()
            .filter_map(|txid| wallet.txs.get(txid))
            .filter(|stored| stored.record.is_unconfirmed() && !stored.record.dead)
            .map(|stored| Inventory::Transaction(stored.record.txid))
            .collect())
    }
}

/// Serialized outpoint as inserted into bloom filters.
fn outpoint_bytes(outpoint: &OutPoint) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(36);
    bytes.extend_from_slice(&outpoint.txid.to_byte_array());
    bytes.extend_from_slice(&outpoint.vout.to_le_bytes());
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{header_chain, pay_to, test_script};

    #[tokio::test]
    async fn test_extend_and_duplicate() {
        let headers = header_chain(3, 0);
        let store = MemoryHeaderStore::new(headers[0]);

        assert_eq!(
            store.commit_header(headers[1]).await.unwrap(),
            CommitOutcome::Extended {
                height: 1
            }
        );
        assert_eq!(store.commit_header(headers[1]).await.unwrap(), CommitOutcome::NotNew);
        assert_eq!(store.height().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_orphan_header_is_rejected() {
        let headers = header_chain(3, 0);
        let store = MemoryHeaderStore::new(headers[0]);

        let result = store.commit_header(headers[2]).await;
        assert!(matches!(result, Err(StorageError::OrphanHeader(_))));
    }

    #[tokio::test]
    async fn test_longer_branch_triggers_reorg() {
        let main = header_chain(4, 0);
        let store = MemoryHeaderStore::new(main[0]);
        for header in &main[1..] {
            store.commit_header(*header).await.unwrap();
        }

        // Branch off after height 1: heights 2, 3 are side branch, 4 wins.
        let fork = crate::test_utils::extend_chain(&main[1], 3, 100);
        assert_eq!(store.commit_header(fork[0]).await.unwrap(), CommitOutcome::NotNew);
        assert_eq!(store.commit_header(fork[1]).await.unwrap(), CommitOutcome::NotNew);

        match store.commit_header(fork[2]).await.unwrap() {
            CommitOutcome::Reorg {
                height,
                descriptor,
            } => {
                assert_eq!(height, 4);
                assert_eq!(descriptor.height, 2);
                assert_eq!(descriptor.fork_point, main[1]);
            }
            other => panic!("expected reorg, got {:?}", other),
        }
        assert_eq!(store.tip_hash().await, fork[2].block_hash());
    }

    #[tokio::test]
    async fn test_reorg_marker_rewinds_tip_to_fork_point() {
        let main = header_chain(4, 0);
        let store = MemoryHeaderStore::new(main[0]);
        for header in &main[1..] {
            store.commit_header(*header).await.unwrap();
        }

        let descriptor = ReorgDescriptor {
            height: 2,
            fork_point: main[1],
        };
        store.persist_reorg_marker(&descriptor, true).await.unwrap();

        assert_eq!(store.height().await.unwrap(), 1);
        assert_eq!(store.last_reorg().await, Some(descriptor));
        // The next block on top of the fork point extends the chain again.
        assert_eq!(
            store.commit_header(main[2]).await.unwrap(),
            CommitOutcome::Extended {
                height: 2
            }
        );
    }

    #[tokio::test]
    async fn test_block_locator_starts_at_tip_and_ends_at_root() {
        let headers = header_chain(40, 0);
        let store = MemoryHeaderStore::new(headers[0]);
        for header in &headers[1..] {
            store.commit_header(*header).await.unwrap();
        }

        let locator = store.block_locator_hashes().await.unwrap();
        assert_eq!(locator[0], headers[39].block_hash());
        assert_eq!(locator[1], headers[38].block_hash());
        assert_eq!(*locator.last().unwrap(), headers[0].block_hash());
        assert!(locator.len() < 40);
    }

    #[tokio::test]
    async fn test_ingest_counts_hits_and_tracks_spends() {
        let store = MemoryTxStore::new();
        store.watch_script(test_script(1)).await;

        let unrelated = pay_to(test_script(9), 1_000);
        assert_eq!(store.ingest(&unrelated, 0).await.unwrap(), 0);
        assert!(store.record(&unrelated.txid()).await.is_none());

        let funding = pay_to(test_script(1), 5_000);
        assert_eq!(store.ingest(&funding, 0).await.unwrap(), 1);

        let spend = crate::test_utils::spend(OutPoint::new(funding.txid(), 0), test_script(9));
        assert_eq!(store.ingest(&spend, 12).await.unwrap(), 1);
        assert_eq!(store.record(&spend.txid()).await.unwrap().height, 12);
    }

    #[tokio::test]
    async fn test_process_reorg_unconfirms_from_height() {
        let store = MemoryTxStore::new();
        let low = pay_to(test_script(1), 1);
        let high = pay_to(test_script(2), 2);
        store.insert(low.clone(), 299, Utc::now()).await;
        store.insert(high.clone(), 300, Utc::now()).await;

        store.process_reorg(300).await.unwrap();

        assert_eq!(store.record(&low.txid()).await.unwrap().height, 299);
        assert_eq!(store.record(&high.txid()).await.unwrap().height, 0);
    }

    #[tokio::test]
    async fn test_pending_inventory_skips_confirmed_and_dead() {
        let store = MemoryTxStore::new();
        let pending = pay_to(test_script(1), 1);
        let confirmed = pay_to(test_script(2), 2);
        let dead = pay_to(test_script(3), 3);
        store.insert(pending.clone(), 0, Utc::now()).await;
        store.insert(confirmed, 10, Utc::now()).await;
        store.insert(dead.clone(), 0, Utc::now()).await;
        store.mark_dead(&dead.txid()).await.unwrap();

        let inventory = store.pending_inventory().await.unwrap();
        assert_eq!(inventory, vec![Inventory::Transaction(pending.txid())]);
    }

    #[tokio::test]
    async fn test_mark_dead_unknown_transaction_fails() {
        let store = MemoryTxStore::new();
        let tx = pay_to(test_script(1), 1);
        assert!(matches!(store.mark_dead(&tx.txid()).await, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_build_filter_with_empty_wallet() {
        let store = MemoryTxStore::new();
        assert!(store.build_filter().await.is_ok());
    }

    #[tokio::test]
    async fn test_failure_switches() {
        let store = MemoryTxStore::new();
        let broken = pay_to(test_script(1), 1);
        let healthy = pay_to(test_script(2), 2);
        store.insert(broken.clone(), 0, Utc::now()).await;
        store.insert(healthy.clone(), 0, Utc::now()).await;

        store.set_fail_mark_dead(broken.txid());
        store.set_fail_process_reorg(true);
        store.set_fail_build_filter(true);

        assert!(matches!(store.mark_dead(&broken.txid()).await, Err(StorageError::WriteFailed(_))));
        assert!(store.mark_dead(&healthy.txid()).await.is_ok());
        assert!(matches!(store.process_reorg(1).await, Err(StorageError::WriteFailed(_))));
        assert!(matches!(store.build_filter().await, Err(StorageError::ReadFailed(_))));

        store.set_fail_process_reorg(false);
        store.set_fail_build_filter(false);
        assert!(store.process_reorg(1).await.is_ok());
        assert!(store.build_filter().await.is_ok());
    }
}
