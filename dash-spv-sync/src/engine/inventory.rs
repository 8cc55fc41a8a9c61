//! Inventory routing.

use dashcore::network::message::NetworkMessage;
use dashcore::network::message_blockdata::Inventory;

use super::SyncEngine;
use crate::network::{filtered_block_inv, PeerHandle, PeerManager};
use crate::storage::{HeaderStore, TxStore};
use crate::types::ChainState;

impl<H, T, P> SyncEngine<H, T, P>
where
    H: HeaderStore + 'static,
    T: TxStore + 'static,
    P: PeerManager + 'static,
{
    /// Handle an `inv` from `peer`.
    ///
    /// Routing happens on a detached task so a full expectation queue or a
    /// slow send cannot hold up the peer's inbound messages.
    pub async fn on_inventory(&self, peer: PeerHandle, items: Vec<Inventory>) {
        let engine = self.clone();
        self.tasks
            .spawn("inventory routing", async move {
                engine.route_inventory(peer, items).await;
                Ok(())
            })
            .await;
    }

    /// Request every announced block (as a filtered block) and transaction.
    ///
    /// Blocks announced by the download peer while syncing are registered
    /// with the expectation queue before they are requested. The routing lock
    /// covers each register-then-request pair, so concurrent routing tasks
    /// cannot make the queue order differ from the request order. Returns the
    /// number of requests queued.
    pub(crate) async fn route_inventory(&self, peer: PeerHandle, items: Vec<Inventory>) -> usize {
        let mut requested = 0;

        for item in items {
            match item {
                Inventory::Block(block_hash) => {
                    let _routing = self.routing_lock.lock().await;

                    if self.chain_state().await == ChainState::Syncing
                        && self.peers.is_download_peer(peer.as_ref()).await
                        && !self.expectations.push(block_hash).await
                    {
                        tracing::trace!("Expectation queue closed, not tracking {}", block_hash);
                    }

                    let request = vec![filtered_block_inv(block_hash)];
                    peer.queue_message(NetworkMessage::GetData(request));
                    requested += 1;
                }
                Inventory::Transaction(txid) => {
                    let request = vec![Inventory::Transaction(txid)];
                    peer.queue_message(NetworkMessage::GetData(request));
                    requested += 1;
                }
                other => {
                    tracing::trace!("Ignoring inventory item {:?} from {}", other, peer.id());
                }
            }
        }

        requested
    }
}

#[cfg(test)]
mod tests {
    use dashcore::{BlockHash, Txid};
    use dashcore_hashes::Hash;

    use super::*;
    use crate::config::SyncConfig;
    use crate::network::requested_filtered_block;
    use crate::test_utils::{wait_for, MockPeer, TestHarness};

    fn requested_blocks(peer: &MockPeer) -> Vec<BlockHash> {
        peer.sent_messages()
            .iter()
            .filter_map(|message| match message {
                NetworkMessage::GetData(items) => items.first().and_then(requested_filtered_block),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_download_peer_blocks_are_expected_in_order() {
        let harness = TestHarness::new(SyncConfig::default(), 0).await;
        let peer = MockPeer::new(1, 100);
        harness.peers.add_peer(peer.clone(), true);
        let hashes: Vec<BlockHash> = (1..=3).map(|n| BlockHash::from_byte_array([n; 32])).collect();

        let announced = hashes.iter().copied().map(Inventory::Block).collect();
        let requested = harness.engine.route_inventory(peer.clone(), announced).await;

        assert_eq!(requested, 3);
        assert_eq!(requested_blocks(&peer), hashes);
        assert_eq!(harness.engine.outstanding_block_requests(), 3);
        for hash in &hashes {
            assert_eq!(harness.engine.expectations.try_pop(), Some(*hash));
        }
    }

    #[tokio::test]
    async fn test_other_peer_blocks_are_requested_but_not_expected() {
        let harness = TestHarness::new(SyncConfig::default(), 0).await;
        let download = MockPeer::new(1, 100);
        let other = MockPeer::new(2, 100);
        harness.peers.add_peer(download.clone(), true);
        harness.peers.add_peer(other.clone(), false);
        let hash = BlockHash::from_byte_array([9u8; 32]);

        harness.engine.route_inventory(other.clone(), vec![Inventory::Block(hash)]).await;

        assert_eq!(requested_blocks(&other), vec![hash]);
        assert_eq!(harness.engine.outstanding_block_requests(), 0);
    }

    #[tokio::test]
    async fn test_transactions_are_requested_and_unknown_items_ignored() {
        let harness = TestHarness::new(SyncConfig::default(), 0).await;
        let peer = MockPeer::new(1, 100);
        let txid = Txid::from_byte_array([4u8; 32]);

        let requested = harness
            .engine
            .route_inventory(
                peer.clone(),
                vec![
                    Inventory::Transaction(txid),
                    Inventory::Unknown {
                        inv_type: 99,
                        hash: [1u8; 32],
                    },
                ],
            )
            .await;

        assert_eq!(requested, 1);
        assert_eq!(
            peer.sent_messages(),
            vec![NetworkMessage::GetData(vec![Inventory::Transaction(txid)])]
        );
    }

    #[tokio::test]
    async fn test_push_after_close_is_ignored() {
        let harness = TestHarness::new(SyncConfig::default(), 0).await;
        let peer = MockPeer::new(1, 100);
        harness.peers.add_peer(peer.clone(), true);
        harness.engine.expectations.close();
        let hash = BlockHash::from_byte_array([3u8; 32]);

        harness.engine.route_inventory(peer.clone(), vec![Inventory::Block(hash)]).await;

        assert_eq!(requested_blocks(&peer), vec![hash]);
        assert_eq!(harness.engine.outstanding_block_requests(), 0);
        assert!(harness.engine.expectations_closed());
    }

    #[tokio::test]
    async fn test_concurrent_routing_keeps_request_order() {
        let harness = TestHarness::new(SyncConfig::default(), 0).await;
        let peer = MockPeer::new(1, 100);
        harness.peers.add_peer(peer.clone(), true);
        let first = BlockHash::from_byte_array([1u8; 32]);
        let second = BlockHash::from_byte_array([2u8; 32]);

        let gate = harness.peers.hold_next_download_check();
        harness.engine.on_inventory(peer.clone(), vec![Inventory::Block(first)]).await;
        let peers = &harness.peers;
        assert!(wait_for(|| async move { peers.download_checks() == 1 }).await);

        harness.engine.on_inventory(peer.clone(), vec![Inventory::Block(second)]).await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(peer.sent_messages().is_empty());
        assert_eq!(harness.engine.outstanding_block_requests(), 0);

        gate.notify_one();
        let engine = &harness.engine;
        assert!(wait_for(|| async move { engine.outstanding_block_requests() == 2 }).await);
        let peer_ref = &peer;
        assert!(wait_for(|| async move { peer_ref.sent_count("getdata") == 2 }).await);

        assert_eq!(requested_blocks(&peer), vec![first, second]);
        assert_eq!(harness.engine.expectations.try_pop(), Some(first));
        assert_eq!(harness.engine.expectations.try_pop(), Some(second));
        harness.engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_on_inventory_routes_on_detached_task() {
        let harness = TestHarness::new(SyncConfig::default(), 0).await;
        let peer = MockPeer::new(1, 100);
        let hash = BlockHash::from_byte_array([5u8; 32]);

        harness.engine.on_inventory(peer.clone(), vec![Inventory::Block(hash)]).await;

        let peer_ref = &peer;
        assert!(wait_for(|| async move { peer_ref.sent_count("getdata") == 1 }).await);
        harness.engine.shutdown().await;
    }
}
