//! Rebroadcast of pending transactions.

use dashcore::network::message::NetworkMessage;

use super::SyncEngine;
use crate::error::SyncResult;
use crate::network::PeerManager;
use crate::storage::{HeaderStore, TxStore};

impl<H, T, P> SyncEngine<H, T, P>
where
    H: HeaderStore + 'static,
    T: TxStore + 'static,
    P: PeerManager + 'static,
{
    /// Announce every pending transaction to every connected peer.
    ///
    /// Runs when sync completes and may be called periodically by the
    /// embedder. Returns the number of peers the announcement went to.
    pub async fn rebroadcast(&self) -> SyncResult<usize> {
        let inventory = self.txs.pending_inventory().await?;
        if inventory.is_empty() {
            return Ok(0);
        }

        let peers = self.peers.connected_peers().await;
        for peer in &peers {
            peer.queue_message(NetworkMessage::Inv(inventory.clone()));
        }

        self.state.lock().await.stats_mut().rebroadcasts += 1;
        tracing::info!(
            "Rebroadcast {} pending transactions to {} peers",
            inventory.len(),
            peers.len()
        );
        Ok(peers.len())
    }
}
