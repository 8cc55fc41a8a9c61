//! Common type definitions for the sync engine.

use std::fmt;

use chrono::{DateTime, Utc};
use dashcore::{BlockHash, Header as BlockHeader, Txid};
use serde::{Deserialize, Serialize};

/// Download state of the engine.
///
/// `Syncing` means a block range is actively being requested from the download
/// peer. `Waiting` means the local chain has caught up and the engine only
/// listens for newly announced blocks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChainState {
    #[default]
    Syncing,
    Waiting,
}

impl fmt::Display for ChainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainState::Syncing => write!(f, "SYNCING"),
            ChainState::Waiting => write!(f, "WAITING"),
        }
    }
}

/// Identifier assigned to a connected peer by the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// Describes a switch of the best chain to a heavier branch.
///
/// Produced by the header store when a committed header makes a different
/// branch the best one. Consumed immediately by the reorg handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReorgDescriptor {
    /// First height at which the abandoned and the new branch differ.
    /// Everything recorded at this height or above is invalid.
    pub height: u32,
    /// Last header both branches have in common (at `height - 1`).
    pub fork_point: BlockHeader,
}

impl ReorgDescriptor {
    /// Height of the last common ancestor.
    pub fn fork_point_height(&self) -> u32 {
        self.height.saturating_sub(1)
    }
}

/// Result of submitting a header to the header store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Not a new best block: a duplicate, or a header on a side branch that
    /// did not become the best chain.
    NotNew,
    /// The header extends the current best chain.
    Extended {
        height: u32,
    },
    /// The header made another branch the best chain.
    Reorg {
        height: u32,
        descriptor: ReorgDescriptor,
    },
}

/// Summary of a stored wallet transaction as reported by the transaction store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRecord {
    pub txid: Txid,
    /// Confirmation height, 0 while unconfirmed.
    pub height: u32,
    /// When the transaction was first seen.
    pub timestamp: DateTime<Utc>,
    /// Whether the transaction has been given up on.
    pub dead: bool,
}

impl TxRecord {
    /// Whether the transaction is still waiting for a confirmation.
    pub fn is_unconfirmed(&self) -> bool {
        self.height == 0
    }
}

/// Outcome of handling a single merkle block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MerkleBlockOutcome {
    /// The header was already known, nothing was recorded.
    Duplicate(BlockHash),
    /// The block extended the best chain.
    Committed {
        block_hash: BlockHash,
        height: u32,
        matched: Vec<Txid>,
    },
    /// The block triggered a reorganization and sync was restarted.
    Reorganized {
        block_hash: BlockHash,
        /// Height of the block on the new best chain.
        height: u32,
        descriptor: ReorgDescriptor,
    },
}

/// Counters describing what the engine has done since it was created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Merkle blocks that extended the best chain.
    pub merkle_blocks_committed: u64,
    /// Reorganizations handled.
    pub reorgs_handled: u64,
    /// Peers disconnected for protocol violations.
    pub peers_disconnected: u64,
    /// Transactions that matched nothing locally.
    pub false_positives: u64,
    /// Filters sent to peers.
    pub filter_updates_sent: u64,
    /// Transactions ingested with at least one hit.
    pub transactions_matched: u64,
    /// Unconfirmed transactions given up on.
    pub transactions_marked_dead: u64,
    /// Rebroadcasts of pending transactions.
    pub rebroadcasts: u64,
}
