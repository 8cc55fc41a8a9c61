//! Transaction ingest and filter updates.

use dashcore::network::message::NetworkMessage;
use dashcore::Transaction;

use super::SyncEngine;
use crate::error::SyncResult;
use crate::network::{Peer, PeerHandle, PeerManager};
use crate::storage::{HeaderStore, TxStore};

impl<H, T, P> SyncEngine<H, T, P>
where
    H: HeaderStore + 'static,
    T: TxStore + 'static,
    P: PeerManager + 'static,
{
    /// Handle a transaction delivered by `peer`. Returns the store's hit count.
    ///
    /// The transaction is ingested at the height its merkle block recorded,
    /// or at height 0 if none did. A transaction that touches nothing is a
    /// filter false positive and is reported to the false positive tracker
    /// once `start` has launched it.
    /// A hit sends `peer` a fresh filter right away, since the transaction may
    /// have added outputs the old filter does not cover.
    pub async fn on_tx(&self, peer: PeerHandle, tx: Transaction) -> SyncResult<u32> {
        let txid = tx.txid();
        // Height 0 stands for both unconfirmed and unknown.
        let height = self.state.lock().await.recorded_height(&txid).unwrap_or(0);

        let hits = match self.txs.ingest(&tx, height).await {
            Ok(hits) => hits,
            Err(e) => {
                tracing::error!("Error ingesting tx {}: {}", txid, e);
                return Err(e.into());
            }
        };

        if hits == 0 {
            tracing::debug!("Tx {} from {} had no hits, filter false positive", txid, peer.id());
            self.state.lock().await.stats_mut().false_positives += 1;
            if !self.tracker_running() {
                tracing::debug!("False positive tracker not running, dropping event");
            } else if self.false_positive_tx.send(peer).is_err() {
                tracing::debug!("False positive tracker is gone, dropping event");
            }
            return Ok(0);
        }

        self.state.lock().await.stats_mut().transactions_matched += 1;
        self.send_filter(peer.as_ref()).await;
        tracing::info!(
            "Tx {} from {} ingested at height {} and matches {} utxos/addresses",
            txid,
            peer.id(),
            height,
            hits
        );

        Ok(hits)
    }

    /// Build a filter from the transaction store and queue it to `peer`.
    ///
    /// Returns `false` if the filter could not be built; the failure is logged.
    pub async fn send_filter(&self, peer: &dyn Peer) -> bool {
        let filter = match self.txs.build_filter().await {
            Ok(filter) => filter,
            Err(e) => {
                tracing::error!("Error creating filter for {}: {}", peer.id(), e);
                return false;
            }
        };

        peer.queue_message(NetworkMessage::FilterLoad(filter));
        self.state.lock().await.stats_mut().filter_updates_sent += 1;
        tracing::debug!("Sent filter to {}", peer.id());
        true
    }
}
