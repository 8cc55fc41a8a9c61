//! The sync engine.
//!
//! `SyncEngine` is a cheap, cloneable handle. Its methods are spread over the
//! modules of this directory, one per component:
//!
//! - `driver` - requests block ranges and decides when sync is complete
//! - `merkle_block` - order check, proof validation and header commit
//! - `reorg` - transaction rollback after a chain reorganization
//! - `inventory` - turns announcements into data requests
//! - `transactions` - transaction ingest and filter updates
//! - `false_positives` - per-peer false positive tracking
//! - `responder` - serves stored transactions
//! - `rebroadcast` - re-announces pending transactions
//! - `sweeper` - gives up on transactions that never confirm
//! - `dispatch` - routes peer messages to the handlers above

mod dispatch;
mod driver;
mod false_positives;
mod inventory;
mod merkle_block;
mod rebroadcast;
mod reorg;
mod responder;
mod sweeper;
mod tasks;
mod transactions;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashcore::Txid;
use tokio::sync::{mpsc, Mutex};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::network::{PeerHandle, PeerManager};
use crate::storage::{HeaderStore, TxStore};
use crate::sync::{BlockExpectationQueue, SyncState};
use crate::types::{ChainState, PeerId, SyncStats};

use tasks::TaskSupervisor;

/// Merkle-block synchronization engine.
///
/// Generic over the header store `H`, the transaction store `T` and the peer
/// manager `P`. All engine state lives behind a single coarse lock that is
/// never held while calling into a collaborator or queueing a message.
pub struct SyncEngine<H, T, P> {
    config: Arc<SyncConfig>,
    headers: Arc<H>,
    txs: Arc<T>,
    peers: Arc<P>,
    state: Arc<Mutex<SyncState>>,
    /// Serializes `advance_sync`.
    driver_lock: Arc<Mutex<()>>,
    /// Keeps expectation pushes in the order their requests are queued.
    routing_lock: Arc<Mutex<()>>,
    expectations: Arc<BlockExpectationQueue>,
    false_positive_tx: mpsc::UnboundedSender<PeerHandle>,
    false_positive_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<PeerHandle>>>>,
    /// Set once `start` has handed the receiver to the tracker task.
    tracker_running: Arc<AtomicBool>,
    tasks: TaskSupervisor,
}

// Not derived, H, T and P need not be Clone.
impl<H, T, P> Clone for SyncEngine<H, T, P> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            headers: self.headers.clone(),
            txs: self.txs.clone(),
            peers: self.peers.clone(),
            state: self.state.clone(),
            driver_lock: self.driver_lock.clone(),
            routing_lock: self.routing_lock.clone(),
            expectations: self.expectations.clone(),
            false_positive_tx: self.false_positive_tx.clone(),
            false_positive_rx: self.false_positive_rx.clone(),
            tracker_running: self.tracker_running.clone(),
            tasks: self.tasks.clone(),
        }
    }
}

impl<H, T, P> SyncEngine<H, T, P>
where
    H: HeaderStore + 'static,
    T: TxStore + 'static,
    P: PeerManager + 'static,
{
    /// Create an engine. The chain state is restored from the header store.
    pub async fn new(
        config: SyncConfig,
        headers: Arc<H>,
        txs: Arc<T>,
        peers: Arc<P>,
    ) -> SyncResult<Self> {
        config.validate().map_err(SyncError::Config)?;

        let chain_state = headers.chain_state().await?;
        let (false_positive_tx, false_positive_rx) = mpsc::unbounded_channel();

        tracing::debug!("Creating sync engine in state {}", chain_state);

        Ok(Self {
            expectations: Arc::new(BlockExpectationQueue::new(config.expectation_queue_capacity)),
            config: Arc::new(config),
            headers,
            txs,
            peers,
            state: Arc::new(Mutex::new(SyncState::new(chain_state))),
            driver_lock: Arc::new(Mutex::new(())),
            routing_lock: Arc::new(Mutex::new(())),
            false_positive_tx,
            false_positive_rx: Arc::new(Mutex::new(Some(false_positive_rx))),
            tracker_running: Arc::new(AtomicBool::new(false)),
            tasks: TaskSupervisor::new(),
        })
    }

    /// Start the background false positive tracker.
    ///
    /// False positives seen before this call are counted in the stats but not
    /// tracked per peer.
    pub async fn start(&self) -> SyncResult<()> {
        if self.tasks.is_shutting_down() {
            return Err(SyncError::Shutdown);
        }

        let Some(events) = self.false_positive_rx.lock().await.take() else {
            tracing::warn!("Sync engine already started");
            return Ok(());
        };

        let engine = self.clone();
        let quit = self.tasks.shutdown_token();
        let spawned = self
            .tasks
            .spawn("false positive tracker", async move {
                engine.track_false_positives(events, quit).await;
                Ok(())
            })
            .await;
        if !spawned {
            return Err(SyncError::Shutdown);
        }
        self.tracker_running.store(true, Ordering::SeqCst);

        tracing::info!("Sync engine started");
        Ok(())
    }

    /// Begin downloading blocks from the current download peer.
    ///
    /// Returns `false` if there is no download peer yet.
    pub async fn start_sync(&self) -> bool {
        match self.peers.download_peer().await {
            Some(peer) => {
                tracing::info!("Starting chain download from {}", peer.id());
                self.spawn_advance_sync(peer).await;
                true
            }
            None => {
                tracing::debug!("No download peer available, not starting sync");
                false
            }
        }
    }

    /// Cancel all background work and wait for it to finish.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down sync engine");
        self.tasks.shutdown().await;
        // Wake anything still blocked on the expectation queue.
        self.expectations.close();
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub async fn chain_state(&self) -> ChainState {
        self.state.lock().await.chain_state()
    }

    pub async fn stats(&self) -> SyncStats {
        self.state.lock().await.stats().clone()
    }

    /// Height recorded for `txid` when it was matched in a merkle block.
    pub async fn pending_height(&self, txid: &Txid) -> Option<u32> {
        self.state.lock().await.recorded_height(txid)
    }

    /// False positives counted for `peer` since its last filter refresh.
    pub async fn false_positive_count(&self, peer: PeerId) -> u32 {
        self.state.lock().await.false_positive_count(peer)
    }

    /// Filtered blocks requested from the download peer and not yet delivered.
    pub fn outstanding_block_requests(&self) -> usize {
        self.expectations.len()
    }

    /// Whether the block expectation queue has been closed.
    pub fn expectations_closed(&self) -> bool {
        self.expectations.is_closed()
    }

    fn tracker_running(&self) -> bool {
        self.tracker_running.load(Ordering::SeqCst)
    }

    /// Mirror `state` into the header store. Failures are logged.
    async fn persist_chain_state(&self, state: ChainState) {
        if let Err(e) = self.headers.set_chain_state(state).await {
            tracing::warn!("Failed to persist chain state {}: {}", state, e);
        }
    }
}
