//! Chain sync driver.

use dashcore::network::message::NetworkMessage;
use dashcore::network::message_blockdata::GetBlocksMessage;
use dashcore::BlockHash;
use dashcore_hashes::Hash;

use super::SyncEngine;
use crate::error::SyncResult;
use crate::network::{PeerHandle, PeerManager};
use crate::storage::{HeaderStore, TxStore};
use crate::types::ChainState;

impl<H, T, P> SyncEngine<H, T, P>
where
    H: HeaderStore + 'static,
    T: TxStore + 'static,
    P: PeerManager + 'static,
{
    /// Continue the chain download from `peer`.
    ///
    /// Does nothing unless the engine is SYNCING. If the local chain has
    /// reached the height `peer` advertised and no other peer has more
    /// blocks, sync is complete: the engine moves to WAITING, pending
    /// transactions are rebroadcast and the block expectation queue is closed.
    /// Otherwise a `getblocks` for everything past our locator is queued.
    ///
    /// Concurrent calls are serialized.
    pub async fn advance_sync(&self, peer: PeerHandle) -> SyncResult<()> {
        let _driver = self.driver_lock.lock().await;

        if self.chain_state().await != ChainState::Syncing {
            tracing::trace!("Not advancing sync from {}, chain state is WAITING", peer.id());
            return Ok(());
        }

        let height = self.headers.height().await?;
        let advertised = peer.last_advertised_height();

        if i64::from(height) >= i64::from(advertised) {
            if self.peers.check_for_more_blocks(height).await {
                tracing::debug!(
                    "{} has no blocks past height {}, another peer has more",
                    peer.id(),
                    height
                );
                return Ok(());
            }
            self.finish_sync(height).await;
            return Ok(());
        }

        let locator = self.headers.block_locator_hashes().await?;
        tracing::debug!(
            "Requesting blocks after height {} from {} (advertises {})",
            height,
            peer.id(),
            advertised
        );
        peer.queue_message(NetworkMessage::GetBlocks(GetBlocksMessage::new(
            locator,
            BlockHash::all_zeros(),
        )));

        Ok(())
    }

    async fn finish_sync(&self, height: u32) {
        if !self.state.lock().await.transition_to_waiting() {
            return;
        }

        tracing::info!("Chain download complete at height {}", height);
        self.persist_chain_state(ChainState::Waiting).await;

        if self.config.rebroadcast_on_sync_complete {
            if let Err(e) = self.rebroadcast().await {
                tracing::error!("Rebroadcast error: {}", e);
            }
        }

        if self.expectations.close() {
            tracing::debug!("Closed block expectation queue");
        }
    }

    /// Run `advance_sync` against `peer` as a detached task.
    pub(crate) async fn spawn_advance_sync(&self, peer: PeerHandle) {
        let engine = self.clone();
        self.tasks.spawn("sync continuation", async move { engine.advance_sync(peer).await }).await;
    }
}
