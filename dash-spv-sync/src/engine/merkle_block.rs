//! Merkle block ingestion.

use std::time::Instant;

use dashcore::merkle_tree::MerkleBlock;
use dashcore::BlockHash;

use super::SyncEngine;
use crate::error::{ProtocolViolation, SyncError, SyncResult, ViolationKind};
use crate::network::{Peer, PeerHandle, PeerManager};
use crate::storage::{HeaderStore, TxStore};
use crate::types::{ChainState, CommitOutcome, MerkleBlockOutcome};
use crate::validation::validate_merkle_block;

impl<H, T, P> SyncEngine<H, T, P>
where
    H: HeaderStore + 'static,
    T: TxStore + 'static,
    P: PeerManager + 'static,
{
    /// Handle a merkle block delivered by `peer`.
    ///
    /// While syncing, a block from the download peer must be the one at the
    /// head of the expectation queue. A block that arrives out of order or
    /// carries an invalid proof gets the peer disconnected and is dropped
    /// before anything is committed.
    ///
    /// If the block waits for a matching request, this call waits with it.
    pub async fn on_merkle_block(
        &self,
        peer: PeerHandle,
        block: MerkleBlock,
    ) -> SyncResult<MerkleBlockOutcome> {
        let block_hash = block.header.block_hash();

        if self.chain_state().await == ChainState::Syncing
            && self.peers.is_download_peer(peer.as_ref()).await
        {
            self.check_block_order(peer.as_ref(), block_hash).await?;
        }

        let matched = match validate_merkle_block(&block) {
            Ok(matched) => matched,
            Err(e) => {
                tracing::error!("{} sent an invalid merkle block {}: {}", peer.id(), block_hash, e);
                let kind = ViolationKind::InvalidMerkleProof(e);
                return Err(self.reject_peer(peer.as_ref(), kind).await);
            }
        };

        let outcome = match self.headers.commit_header(block.header).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!("Failed to commit header {} from {}: {}", block_hash, peer.id(), e);
                return Err(e.into());
            }
        };

        let height = match outcome {
            CommitOutcome::NotNew => {
                tracing::trace!("Merkle block {} is not a new best block", block_hash);
                return Ok(MerkleBlockOutcome::Duplicate(block_hash));
            }
            CommitOutcome::Reorg {
                height,
                descriptor,
            } => {
                tracing::info!("Merkle block {} at height {} switched the best chain", block_hash, height);
                self.recover_from_reorg(peer, &descriptor).await;
                return Ok(MerkleBlockOutcome::Reorganized {
                    block_hash,
                    height,
                    descriptor,
                });
            }
            CommitOutcome::Extended {
                height,
            } => height,
        };

        let now = Instant::now();
        let chain_state = {
            let mut state = self.state.lock().await;
            for txid in &matched {
                state.record_pending(*txid, height, now);
            }
            state.stats_mut().merkle_blocks_committed += 1;
            state.chain_state()
        };
        tracing::debug!(
            "Received merkle block {} at height {} with {} matched transactions",
            block_hash,
            height,
            matched.len()
        );

        match chain_state {
            ChainState::Syncing => {
                if self.expectations.is_empty() {
                    self.spawn_advance_sync(peer).await;
                }
            }
            ChainState::Waiting => {
                self.sweep_stale_transactions().await;
            }
        }

        Ok(MerkleBlockOutcome::Committed {
            block_hash,
            height,
            matched,
        })
    }

    /// Pop the next expected hash and compare it with `received`.
    async fn check_block_order(&self, peer: &dyn Peer, received: BlockHash) -> SyncResult<()> {
        match self.expectations.pop().await {
            Some(expected) if expected == received => Ok(()),
            Some(expected) => {
                tracing::error!(
                    "{} is sending us blocks out of order: expected {}, got {}",
                    peer.id(),
                    expected,
                    received
                );
                Err(self
                    .reject_peer(
                        peer,
                        ViolationKind::OutOfOrderBlock {
                            expected,
                            received,
                        },
                    )
                    .await)
            }
            None => {
                tracing::trace!("Expectation queue closed, accepting {} unchecked", received);
                Ok(())
            }
        }
    }

    /// Disconnect `peer` and build the error describing what it did.
    async fn reject_peer(&self, peer: &dyn Peer, kind: ViolationKind) -> SyncError {
        peer.disconnect();
        self.state.lock().await.stats_mut().peers_disconnected += 1;
        SyncError::Protocol(ProtocolViolation {
            peer: peer.id(),
            kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use dashcore::network::message_blockdata::Inventory;
    use dashcore_hashes::Hash;

    use super::*;
    use crate::config::SyncConfig;
    use crate::error::ValidationError;
    use crate::test_utils::{
        child_block, extend_chain, pay_to, test_script, to_merkle_block, wait_for, MockPeer,
        TestHarness,
    };

    #[tokio::test]
    async fn test_block_from_non_download_peer_skips_order_check() {
        let harness = TestHarness::new(SyncConfig::default(), 3).await;
        let download = MockPeer::new(1, 100);
        let other = MockPeer::new(2, 100);
        harness.peers.add_peer(download.clone(), true);

        let next = extend_chain(harness.tip(), 1, 0)[0];
        let outcome =
            harness.engine.on_merkle_block(other.clone(), to_merkle_block(&next)).await.unwrap();

        assert_eq!(
            outcome,
            MerkleBlockOutcome::Committed {
                block_hash: next.block_hash(),
                height: 4,
                matched: vec![],
            }
        );
        assert!(!other.is_disconnected());
    }

    #[tokio::test]
    async fn test_matched_transactions_are_recorded_at_block_height() {
        let harness = TestHarness::new(SyncConfig::default(), 3).await;
        let peer = MockPeer::new(1, 100);

        let wallet_tx = pay_to(test_script(1), 500);
        let noise = pay_to(test_script(2), 700);
        let block = child_block(
            harness.tip(),
            &[noise.txid(), wallet_tx.txid()],
            &[false, true],
            42,
        );

        harness.engine.on_merkle_block(peer.clone(), block).await.unwrap();

        assert_eq!(harness.engine.pending_height(&wallet_tx.txid()).await, Some(4));
        assert_eq!(harness.engine.pending_height(&noise.txid()).await, None);
        assert_eq!(harness.engine.stats().await.merkle_blocks_committed, 1);
    }

    #[tokio::test]
    async fn test_invalid_proof_disconnects_before_commit() {
        let harness = TestHarness::new(SyncConfig::default(), 3).await;
        let peer = MockPeer::new(1, 100);

        let mut block = to_merkle_block(&extend_chain(harness.tip(), 1, 0)[0]);
        block.header.merkle_root = dashcore::TxMerkleNode::from_byte_array([7u8; 32]);

        let err = harness.engine.on_merkle_block(peer.clone(), block).await.unwrap_err();

        assert!(matches!(
            err,
            SyncError::Protocol(ProtocolViolation {
                kind: ViolationKind::InvalidMerkleProof(ValidationError::MerkleBlock(_)),
                ..
            })
        ));
        assert!(peer.is_disconnected());
        assert_eq!(harness.headers.tip_hash().await, harness.tip().block_hash());
        assert_eq!(harness.engine.stats().await.peers_disconnected, 1);
    }

    #[tokio::test]
    async fn test_duplicate_block_is_ignored() {
        let harness = TestHarness::new(SyncConfig::default(), 3).await;
        let peer = MockPeer::new(1, 100);

        let outcome = harness
            .engine
            .on_merkle_block(peer.clone(), to_merkle_block(&harness.chain[2]))
            .await
            .unwrap();

        assert_eq!(outcome, MerkleBlockOutcome::Duplicate(harness.chain[2].block_hash()));
        assert_eq!(harness.engine.stats().await.merkle_blocks_committed, 0);
        assert!(!peer.is_disconnected());
    }

    #[tokio::test]
    async fn test_orphan_header_is_a_local_failure() {
        let harness = TestHarness::new(SyncConfig::default(), 3).await;
        let peer = MockPeer::new(1, 100);
        let detached = extend_chain(harness.tip(), 2, 0);

        let err = harness
            .engine
            .on_merkle_block(peer.clone(), to_merkle_block(&detached[1]))
            .await
            .unwrap_err();

        assert_eq!(err.category(), "storage");
        assert!(!peer.is_disconnected());
    }

    #[tokio::test]
    async fn test_in_order_delivery_continues_sync_when_queue_drains() {
        let harness = TestHarness::new(SyncConfig::default(), 3).await;
        let peer = MockPeer::new(1, 100);
        harness.peers.add_peer(peer.clone(), true);

        let blocks = extend_chain(harness.tip(), 2, 0);
        let announced = blocks.iter().map(|h| Inventory::Block(h.block_hash())).collect();
        harness.engine.on_inventory(peer.clone(), announced).await;
        let engine = &harness.engine;
        assert!(wait_for(|| async move { engine.outstanding_block_requests() == 2 }).await);

        harness.engine.on_merkle_block(peer.clone(), to_merkle_block(&blocks[0])).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(peer.sent_count("getblocks"), 0);

        harness.engine.on_merkle_block(peer.clone(), to_merkle_block(&blocks[1])).await.unwrap();
        let peer_ref = &peer;
        assert!(wait_for(|| async move { peer_ref.sent_count("getblocks") == 1 }).await);
        assert!(!peer.is_disconnected());
        harness.engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_waiting_state_runs_staleness_sweep() {
        let harness = TestHarness::new(SyncConfig::default(), 3).await;
        let peer = MockPeer::new(1, 3);
        harness.peers.add_peer(peer.clone(), true);
        harness.engine.advance_sync(peer.clone()).await.unwrap();
        assert_eq!(harness.engine.chain_state().await, ChainState::Waiting);

        let stale = pay_to(test_script(1), 1);
        let old = chrono::Utc::now() - chrono::Duration::days(8);
        harness.txs.insert(stale.clone(), 0, old).await;

        let next = extend_chain(harness.tip(), 1, 0)[0];
        harness.engine.on_merkle_block(peer.clone(), to_merkle_block(&next)).await.unwrap();

        assert!(harness.txs.record(&stale.txid()).await.unwrap().dead);
    }
}
