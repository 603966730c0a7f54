//! Core types shared across the tracker.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Seconds in a (non-leap) year.
pub const YEAR: u64 = 31_536_000;

/// Position of a committed snapshot in the versioned store.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct SnapshotIndex(pub u64);

impl fmt::Debug for SnapshotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Snap({})", self.0)
    }
}

impl fmt::Display for SnapshotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl SnapshotIndex {
    pub fn next(self) -> Self {
        SnapshotIndex(self.0 + 1)
    }

    pub fn prev(self) -> Option<Self> {
        if self.0 > 0 {
            Some(SnapshotIndex(self.0 - 1))
        } else {
            None
        }
    }

    /// Big-endian key bytes, so snapshots sort by index in an ordered backend.
    pub fn to_key_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    pub fn from_key_bytes(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 8] = bytes.try_into().ok()?;
        Some(SnapshotIndex(u64::from_be_bytes(arr)))
    }
}

/// 32-byte hash, used for block hashes and snapshot digests (SHA-256).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// Compute hash from bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Hash(hasher.finalize().into())
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Hash(arr))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({}...)", &self.to_hex()[..8])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// The header fields the tracker consumes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u32,
    /// Unix seconds.
    pub timestamp: u32,
    pub hash: Hash,
    pub prev_hash: Hash,
}

/// A connect (`add = true`) or disconnect event from the chain tracker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockEvent {
    pub height: u64,
    pub add: bool,
    pub header: BlockHeader,
}

impl BlockEvent {
    pub fn add(height: u64, header: BlockHeader) -> Self {
        Self {
            height,
            add: true,
            header,
        }
    }

    pub fn remove(height: u64, header: BlockHeader) -> Self {
        Self {
            height,
            add: false,
            header,
        }
    }
}

/// Last connected block, persisted with every snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTip {
    pub height: u64,
    pub hash: Hash,
}

impl ChainTip {
    pub fn of(event: &BlockEvent) -> Self {
        Self {
            height: event.height,
            hash: event.header.hash,
        }
    }
}
