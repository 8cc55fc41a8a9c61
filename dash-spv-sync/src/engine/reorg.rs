//! Reorganization handling.

use super::SyncEngine;
use crate::network::{PeerHandle, PeerManager};
use crate::storage::{HeaderStore, TxStore};
use crate::types::{ChainState, ReorgDescriptor};

impl<H, T, P> SyncEngine<H, T, P>
where
    H: HeaderStore + 'static,
    T: TxStore + 'static,
    P: PeerManager + 'static,
{
    /// Invalidate everything recorded at `divergence_height` or above.
    ///
    /// Transactions confirmed on the abandoned branch are unconfirmed in the
    /// transaction store, and their entries in the pending height index are
    /// dropped. A store failure is logged and does not stop the caller.
    pub async fn handle_reorg(&self, divergence_height: u32) {
        if let Err(e) = self.txs.process_reorg(divergence_height).await {
            tracing::error!(
                "Failed to roll back transactions from height {}: {}",
                divergence_height,
                e
            );
        }

        let purged = self.state.lock().await.purge_from_height(divergence_height);
        if purged > 0 {
            tracing::debug!(
                "Dropped {} pending height entries at or above {}",
                purged,
                divergence_height
            );
        }
    }

    /// Roll back, go back to SYNCING and resume the download from the fork point.
    pub(crate) async fn recover_from_reorg(&self, peer: PeerHandle, descriptor: &ReorgDescriptor) {
        tracing::warn!(
            "Chain reorganization at height {}, fork point {} at height {}",
            descriptor.height,
            descriptor.fork_point.block_hash(),
            descriptor.fork_point_height()
        );

        self.handle_reorg(descriptor.height).await;

        let previous = {
            let mut state = self.state.lock().await;
            state.stats_mut().reorgs_handled += 1;
            state.force_syncing()
        };
        if previous != ChainState::Syncing {
            tracing::info!("Resuming chain download after reorganization");
        }
        self.persist_chain_state(ChainState::Syncing).await;

        if let Err(e) = self.headers.persist_reorg_marker(descriptor, true).await {
            tracing::error!("Failed to persist reorg marker at height {}: {}", descriptor.height, e);
        }

        self.spawn_advance_sync(peer).await;
    }
}
