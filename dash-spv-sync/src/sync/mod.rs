//! Shared synchronization state.
//!
//! - `expectation` - FIFO of filtered blocks requested from the download peer
//! - `state` - chain state, pending transaction heights and false positive counters

pub mod expectation;
pub mod state;

pub use expectation::BlockExpectationQueue;
pub use state::SyncState;
