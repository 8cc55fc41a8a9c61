//! Mutable engine state guarded by the engine's coarse lock.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use dashcore::Txid;

use crate::types::{ChainState, PeerId, SyncStats};

#[derive(Debug, Clone, Copy)]
struct PendingEntry {
    height: u32,
    first_seen: Instant,
}

/// State shared by every engine component.
///
/// All methods are plain in-memory updates so the lock guarding this struct is
/// only ever held for short critical sections.
#[derive(Debug, Default)]
pub struct SyncState {
    chain_state: ChainState,
    /// Height at which a matched transaction was first seen in a merkle block.
    pending_heights: HashMap<Txid, PendingEntry>,
    /// False positives per peer since the peer's last filter refresh.
    false_positives: HashMap<PeerId, u32>,
    stats: SyncStats,
}

impl SyncState {
    pub fn new(chain_state: ChainState) -> Self {
        Self {
            chain_state,
            ..Self::default()
        }
    }

    pub fn chain_state(&self) -> ChainState {
        self.chain_state
    }

    /// Move from SYNCING to WAITING. Returns `false` if already waiting.
    pub fn transition_to_waiting(&mut self) -> bool {
        if self.chain_state != ChainState::Syncing {
            return false;
        }
        self.chain_state = ChainState::Waiting;
        true
    }

    /// Force SYNCING after a reorganization. Returns the previous state.
    pub fn force_syncing(&mut self) -> ChainState {
        std::mem::replace(&mut self.chain_state, ChainState::Syncing)
    }

    /// Remember that `txid` was matched in a block at `height`.
    ///
    /// The first recorded entry for a transaction keeps its timestamp, later
    /// records only update the height.
    pub fn record_pending(&mut self, txid: Txid, height: u32, now: Instant) {
        self.pending_heights
            .entry(txid)
            .and_modify(|entry| entry.height = height)
            .or_insert(PendingEntry {
                height,
                first_seen: now,
            });
    }

    /// Height recorded for `txid`, if any.
    pub fn recorded_height(&self, txid: &Txid) -> Option<u32> {
        self.pending_heights.get(txid).map(|entry| entry.height)
    }

    /// Drop entries recorded at `height` or above. Returns how many were removed.
    pub fn purge_from_height(&mut self, height: u32) -> usize {
        let before = self.pending_heights.len();
        self.pending_heights.retain(|_, entry| entry.height < height);
        before - self.pending_heights.len()
    }

    /// Drop entries first seen more than `ttl` before `now`.
    pub fn evict_older_than(&mut self, ttl: Duration, now: Instant) -> usize {
        let before = self.pending_heights.len();
        self.pending_heights
            .retain(|_, entry| now.saturating_duration_since(entry.first_seen) <= ttl);
        before - self.pending_heights.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending_heights.len()
    }

    /// Count a false positive for `peer`.
    ///
    /// Returns `true` once the count exceeds `threshold`; the count is then
    /// reset to zero and the caller is expected to refresh the peer's filter.
    pub fn record_false_positive(&mut self, peer: PeerId, threshold: u32) -> bool {
        let count = self.false_positives.entry(peer).or_insert(0);
        *count += 1;
        if *count > threshold {
            *count = 0;
            return true;
        }
        false
    }

    pub fn false_positive_count(&self, peer: PeerId) -> u32 {
        self.false_positives.get(&peer).copied().unwrap_or(0)
    }

    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut SyncStats {
        &mut self.stats
    }
}
