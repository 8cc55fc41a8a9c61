//! Test helpers: mock collaborators and block builders.

mod chain;
mod harness;
mod network;

pub use chain::{
    child_block, extend_chain, header_chain, merkle_block, pay_to, spend, test_header,
    test_script, test_txids, to_merkle_block,
};
pub use harness::{wait_for, MemoryEngine, TestHarness};
pub use network::{MockPeer, MockPeerManager};
