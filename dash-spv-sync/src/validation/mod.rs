//! Validation of data received from peers.

pub mod merkle;

pub use merkle::validate_merkle_block;
