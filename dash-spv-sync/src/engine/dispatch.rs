//! Inbound message routing.

use dashcore::network::message::NetworkMessage;

use super::SyncEngine;
use crate::error::SyncResult;
use crate::network::{message_name, PeerHandle, PeerManager};
use crate::storage::{HeaderStore, TxStore};

impl<H, T, P> SyncEngine<H, T, P>
where
    H: HeaderStore + 'static,
    T: TxStore + 'static,
    P: PeerManager + 'static,
{
    /// Route a message received from `peer` to its handler.
    ///
    /// Messages the engine has no interest in are ignored. Errors from the
    /// handlers are returned; a protocol violation means the peer has already
    /// been disconnected.
    pub async fn handle_message(
        &self,
        peer: PeerHandle,
        message: NetworkMessage,
    ) -> SyncResult<()> {
        match message {
            NetworkMessage::Inv(items) => {
                self.on_inventory(peer, items).await;
            }
            NetworkMessage::MerkleBlock(block) => {
                self.on_merkle_block(peer, block).await?;
            }
            NetworkMessage::Tx(tx) => {
                self.on_tx(peer, tx).await?;
            }
            NetworkMessage::GetData(items) => {
                self.on_get_data(peer.as_ref(), &items).await;
            }
            other => {
                tracing::trace!("Ignoring {} message from {}", message_name(&other), peer.id());
            }
        }
        Ok(())
    }
}
