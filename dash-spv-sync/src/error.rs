//! Error types for the merkle-block synchronization core.

use std::io;

use dashcore::merkle_tree::MerkleBlockError;
use dashcore::BlockHash;
use thiserror::Error;

use crate::types::PeerId;

/// Main error type for the sync engine.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Logging error: {0}")]
    Logging(#[from] LoggingError),

    /// The engine was shut down while the operation was pending.
    #[error("Sync engine is shutting down")]
    Shutdown,
}

impl SyncError {
    /// Returns a static string representing the error category based on the variant
    pub fn category(&self) -> &'static str {
        match self {
            SyncError::Protocol(_) => "protocol",
            SyncError::Storage(_) => "storage",
            SyncError::Validation(_) => "validation",
            SyncError::Config(_) => "config",
            SyncError::Logging(_) => "logging",
            SyncError::Shutdown => "shutdown",
        }
    }

    /// Whether the error was caused by the remote peer misbehaving.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, SyncError::Protocol(_))
    }
}

/// A peer broke the download protocol. The peer has already been disconnected
/// by the time this error is returned.
#[derive(Debug, Error)]
#[error("{peer} {kind}")]
pub struct ProtocolViolation {
    pub peer: PeerId,
    pub kind: ViolationKind,
}

/// What the peer did wrong.
#[derive(Debug, Error)]
pub enum ViolationKind {
    #[error("sent block {received} out of order, expected {expected}")]
    OutOfOrderBlock {
        expected: BlockHash,
        received: BlockHash,
    },

    #[error("sent an invalid merkle block: {0}")]
    InvalidMerkleProof(#[source] ValidationError),
}

/// Storage-related errors reported by the header and transaction stores.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Data not found: {0}")]
    NotFound(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Header {0} does not connect to any known header")]
    OrphanHeader(BlockHash),

    #[error("Inconsistent state: {0}")]
    InconsistentState(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// A merkle block whose proof does not hold up.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("invalid partial merkle tree: {0:?}")]
    MerkleBlock(MerkleBlockError),
}

/// Logging-related errors.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Failed to create log directory: {0}")]
    DirectoryCreation(#[from] std::io::Error),

    #[error("Subscriber initialization failed: {0}")]
    SubscriberInit(String),

    #[error("Log rotation failed: {0}")]
    RotationFailed(String),
}

/// Type alias for sync operation results.
pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Type alias for storage operation results.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Type alias for validation operation results.
pub type ValidationResult<T> = std::result::Result<T, ValidationError>;

/// Type alias for logging operation results.
pub type LoggingResult<T> = std::result::Result<T, LoggingError>;
