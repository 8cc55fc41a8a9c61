use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashcore::Header as BlockHeader;
use tokio::time::Instant;

use super::chain::header_chain;
use super::network::MockPeerManager;
use crate::config::SyncConfig;
use crate::engine::SyncEngine;
use crate::storage::{HeaderStore, MemoryHeaderStore, MemoryTxStore};

/// Engine wired to the in-memory stores and a mock peer manager.
pub type MemoryEngine = SyncEngine<MemoryHeaderStore, MemoryTxStore, MockPeerManager>;

/// An engine together with handles to its collaborators.
pub struct TestHarness {
    pub engine: MemoryEngine,
    pub headers: Arc<MemoryHeaderStore>,
    pub txs: Arc<MemoryTxStore>,
    pub peers: Arc<MockPeerManager>,
    /// Headers committed to the header store, index = height.
    pub chain: Vec<BlockHeader>,
}

impl TestHarness {
    /// Engine whose header store already holds a chain up to `tip_height`.
    pub async fn new(config: SyncConfig, tip_height: u32) -> Self {
        Self::with_chain(config, header_chain(tip_height as usize + 1, 0)).await
    }

    /// Engine whose header store holds `chain`, root first.
    pub async fn with_chain(config: SyncConfig, chain: Vec<BlockHeader>) -> Self {
        let headers = Arc::new(MemoryHeaderStore::new(chain[0]));
        for header in &chain[1..] {
            headers.commit_header(*header).await.unwrap();
        }
        let txs = Arc::new(MemoryTxStore::new());
        let peers = Arc::new(MockPeerManager::new());

        let engine = SyncEngine::new(config, headers.clone(), txs.clone(), peers.clone())
            .await
            .unwrap();

        Self {
            engine,
            headers,
            txs,
            peers,
            chain,
        }
    }

    /// Best chain tip header.
    pub fn tip(&self) -> &BlockHeader {
        self.chain.last().unwrap()
    }
}

/// Poll `condition` until it holds or five seconds pass. Returns whether it held.
pub async fn wait_for<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if condition().await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
