//! Peer-facing collaborator interfaces.
//!
//! The transport layer owns connections, handshakes and message encoding. The
//! sync engine only needs a handle per peer to queue outbound messages and to
//! drop misbehaving peers, plus a peer manager that knows which peer is the
//! designated download peer.

use std::sync::Arc;

use async_trait::async_trait;
use dashcore::network::message::NetworkMessage;
use dashcore::network::message_blockdata::Inventory;
use dashcore::BlockHash;
use dashcore_hashes::Hash;

use crate::types::PeerId;

/// Inventory type code for a BIP37 filtered block (`MSG_FILTERED_BLOCK`).
pub const MSG_FILTERED_BLOCK: u32 = 3;

/// Handle to a connected peer.
///
/// Both `queue_message` and `disconnect` are fire-and-forget: they hand work to
/// the transport and return immediately.
pub trait Peer: Send + Sync {
    /// Identifier assigned by the transport layer.
    fn id(&self) -> PeerId;

    /// Best height the peer advertised in its version message.
    fn last_advertised_height(&self) -> i32;

    /// Queue a message for delivery to the peer.
    fn queue_message(&self, message: NetworkMessage);

    /// Drop the connection to the peer.
    fn disconnect(&self);
}

/// Shared handle to a peer.
pub type PeerHandle = Arc<dyn Peer>;

/// Peer manager collaborator.
#[async_trait]
pub trait PeerManager: Send + Sync {
    /// Whether some connected peer advertises more blocks than `height`.
    /// Implementations switch the download peer to such a peer and continue
    /// the download from there.
    async fn check_for_more_blocks(&self, height: u32) -> bool;

    /// The peer blocks are currently downloaded from, if any.
    async fn download_peer(&self) -> Option<PeerHandle>;

    /// All currently connected peers.
    async fn connected_peers(&self) -> Vec<PeerHandle>;

    /// Whether `peer` is the designated download peer.
    async fn is_download_peer(&self, peer: &dyn Peer) -> bool {
        self.download_peer().await.is_some_and(|p| p.id() == peer.id())
    }
}

/// Rewrite a block announcement into a request for its filtered variant.
pub fn filtered_block_inv(block_hash: BlockHash) -> Inventory {
    Inventory::Unknown {
        inv_type: MSG_FILTERED_BLOCK,
        hash: block_hash.to_byte_array(),
    }
}

/// Block hash requested by a filtered block inventory, if `inv` is one.
pub fn requested_filtered_block(inv: &Inventory) -> Option<BlockHash> {
    match inv {
        Inventory::Unknown {
            inv_type: MSG_FILTERED_BLOCK,
            hash,
        } => Some(BlockHash::from_byte_array(*hash)),
        _ => None,
    }
}

/// Short name of a message for log output.
pub fn message_name(message: &NetworkMessage) -> &'static str {
    message.cmd()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filtered_block_inventory_roundtrip() {
        let hash = BlockHash::from_byte_array([9u8; 32]);
        let inv = filtered_block_inv(hash);

        assert_eq!(requested_filtered_block(&inv), Some(hash));
        assert_eq!(requested_filtered_block(&Inventory::Block(hash)), None);
    }
}
