//! Merkle-block synchronization core for Dash SPV clients.
//!
//! This crate drives filtered block download from untrusted peers:
//!
//! - Requests block ranges from the designated download peer and decides when
//!   the local chain has caught up
//! - Verifies that the download peer answers in request order
//! - Validates BIP37 merkle block proofs and commits headers
//! - Rolls back transaction heights and restarts sync on reorganizations
//! - Tracks bloom filter false positives per peer and refreshes filters
//! - Serves and rebroadcasts pending wallet transactions
//!
//! Transport, header storage and the wallet's transaction store are external
//! collaborators, reached through the traits in [`network`] and [`storage`].
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use dash_spv_sync::{SyncConfig, SyncEngine};
//! use dash_spv_sync::storage::{MemoryHeaderStore, MemoryTxStore};
//!
//! let engine = SyncEngine::new(
//!     SyncConfig::default(),
//!     Arc::new(MemoryHeaderStore::new(genesis)),
//!     Arc::new(MemoryTxStore::new()),
//!     Arc::new(peer_manager),
//! )
//! .await?;
//! engine.start().await?;
//! engine.start_sync().await;
//!
//! // For every message a peer delivers:
//! engine.handle_message(peer, message).await?;
//!
//! engine.shutdown().await;
//! ```

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod network;
pub mod storage;
pub mod sync;
pub mod types;
pub mod validation;

// Re-export main types for convenience
pub use config::SyncConfig;
pub use engine::SyncEngine;
pub use error::{
    LoggingError, LoggingResult, ProtocolViolation, StorageError, StorageResult, SyncError,
    SyncResult, ValidationError, ValidationResult, ViolationKind,
};
pub use logging::{init_console_logging, init_logging, LogFileConfig, LoggingConfig, LoggingGuard};
pub use network::{Peer, PeerHandle, PeerManager};
pub use storage::{HeaderStore, TxStore};
pub use sync::BlockExpectationQueue;
pub use tracing::level_filters::LevelFilter;
pub use types::{
    ChainState, CommitOutcome, MerkleBlockOutcome, PeerId, ReorgDescriptor, SyncStats, TxRecord,
};

// Re-export commonly used dashcore types
pub use dashcore::{BlockHash, Txid};

/// Current version of the dash-spv-sync library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
