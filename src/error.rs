//! Error types for activation tracking.

use crate::types::SnapshotIndex;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Main error type for tracker operations.
#[derive(Debug, Error)]
pub enum VersionBitsError {
    #[error("Invalid versionbits configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Block sequencing error at height {height}: {reason}")]
    Sequencing { height: u64, reason: String },

    #[error("Not enough blocks buffered to calculate median time past ({have} of {need})")]
    InsufficientData { have: usize, need: usize },

    #[error("Reorg depth exceeded: cannot roll back to {requested:?}, oldest retained is {oldest:?}")]
    ReorgDepthExceeded {
        requested: SnapshotIndex,
        oldest: SnapshotIndex,
    },

    #[error("Block at height {height} signals bit {bit} with no deployment")]
    UnknownSignal { bit: u8, height: u64 },

    #[error("Stream halted after fatal {0} error")]
    Halted(ErrorKind),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot not found: {0:?}")]
    SnapshotNotFound(SnapshotIndex),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Store is locked by another process")]
    Locked,

    #[error("Store not initialized")]
    NotInitialized,
}

/// Coarse classification of an error, carried by error notifications.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidConfiguration,
    Sequencing,
    InsufficientData,
    ReorgDepthExceeded,
    UnknownSignal,
    StoreFailure,
    Halted,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InvalidConfiguration => "invalid configuration",
            ErrorKind::Sequencing => "sequencing",
            ErrorKind::InsufficientData => "insufficient data",
            ErrorKind::ReorgDepthExceeded => "reorg depth",
            ErrorKind::UnknownSignal => "unknown signal",
            ErrorKind::StoreFailure => "store",
            ErrorKind::Halted => "halted",
        };
        f.write_str(name)
    }
}

impl VersionBitsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VersionBitsError::InvalidConfiguration(_) => ErrorKind::InvalidConfiguration,
            VersionBitsError::Sequencing { .. } => ErrorKind::Sequencing,
            VersionBitsError::InsufficientData { .. } => ErrorKind::InsufficientData,
            VersionBitsError::ReorgDepthExceeded { .. } => ErrorKind::ReorgDepthExceeded,
            VersionBitsError::UnknownSignal { .. } => ErrorKind::UnknownSignal,
            VersionBitsError::Halted(_) => ErrorKind::Halted,
            _ => ErrorKind::StoreFailure,
        }
    }

    /// Fatal errors stop the block stream; nothing is accepted afterwards.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Sequencing | ErrorKind::ReorgDepthExceeded | ErrorKind::UnknownSignal
        )
    }
}

impl From<serde_json::Error> for VersionBitsError {
    fn from(e: serde_json::Error) -> Self {
        VersionBitsError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for VersionBitsError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        VersionBitsError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for VersionBitsError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        VersionBitsError::Deserialization(e.to_string())
    }
}

/// Result type for tracker operations.
pub type Result<T> = std::result::Result<T, VersionBitsError>;
