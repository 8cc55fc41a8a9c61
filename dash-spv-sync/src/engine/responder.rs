//! Serving `getdata` requests for wallet transactions.

use dashcore::network::message::NetworkMessage;
use dashcore::network::message_blockdata::Inventory;

use super::SyncEngine;
use crate::network::{Peer, PeerManager};
use crate::storage::{HeaderStore, TxStore};

impl<H, T, P> SyncEngine<H, T, P>
where
    H: HeaderStore + 'static,
    T: TxStore + 'static,
    P: PeerManager + 'static,
{
    /// Answer a `getdata` from `peer` with the stored transactions it asks
    /// for. Blocks are never served. Returns how many transactions were sent.
    pub async fn on_get_data(&self, peer: &dyn Peer, items: &[Inventory]) -> usize {
        tracing::debug!("Received getdata request from {}", peer.id());
        let mut sent = 0;

        for item in items {
            let Inventory::Transaction(txid) = item else {
                tracing::debug!("We only respond to tx requests, ignoring {:?}", item);
                continue;
            };

            match self.txs.lookup(txid).await {
                Ok(Some((tx, _))) => {
                    peer.queue_message(NetworkMessage::Tx(tx));
                    sent += 1;
                }
                Ok(None) => tracing::debug!("Requested tx {} is not stored", txid),
                Err(e) => tracing::error!("Error getting tx {}: {}", txid, e),
            }
        }

        tracing::debug!("Sent {} of {} requested items to {}", sent, items.len(), peer.id());
        sent
    }
}
