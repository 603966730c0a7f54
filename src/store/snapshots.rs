//! Versioned snapshots of the window state.
//!
//! Each committed block produces one full snapshot keyed by a monotonically
//! increasing index. Rolling back deletes every snapshot above the target;
//! pruning deletes everything below a horizon, which is what bounds the
//! deepest reorg that can be undone.

use super::backend::{KvBackend, WriteBatch};
use crate::engine::WindowState;
use crate::error::{Result, VersionBitsError};
use crate::types::{Hash, SnapshotIndex};
use lru::LruCache;
use std::num::NonZeroUsize;

/// Current snapshot encoding version, stored as the first byte.
const SNAPSHOT_VERSION: u8 = 1;

const SNAPSHOT_PREFIX: &[u8] = b"s/";
const LATEST_KEY: &[u8] = b"m/latest";
const OLDEST_KEY: &[u8] = b"m/oldest";

/// Decoded snapshots kept in memory for cheap rollbacks.
const SNAPSHOT_CACHE_SIZE: usize = 32;

fn snapshot_key(index: SnapshotIndex) -> Vec<u8> {
    let mut key = SNAPSHOT_PREFIX.to_vec();
    key.extend_from_slice(&index.to_key_bytes());
    key
}

fn encode_snapshot(state: &WindowState) -> Result<Vec<u8>> {
    let mut bytes = vec![SNAPSHOT_VERSION];
    bytes.extend(rmp_serde::to_vec(state)?);
    Ok(bytes)
}

fn decode_snapshot(bytes: &[u8]) -> Result<WindowState> {
    match bytes.split_first() {
        Some((&SNAPSHOT_VERSION, body)) => Ok(rmp_serde::from_slice(body)?),
        Some((version, _)) => Err(VersionBitsError::InvalidFormat(format!(
            "Unsupported snapshot version: {}",
            version
        ))),
        None => Err(VersionBitsError::Corruption("Empty snapshot".into())),
    }
}

fn read_index(backend: &impl KvBackend, key: &[u8]) -> Result<Option<SnapshotIndex>> {
    match backend.get(key)? {
        Some(bytes) => SnapshotIndex::from_key_bytes(&bytes)
            .map(Some)
            .ok_or_else(|| VersionBitsError::Corruption("Malformed snapshot index".into())),
        None => Ok(None),
    }
}

/// Commit / rollback / prune over an opaque key-value backend.
pub struct SnapshotStore<B: KvBackend> {
    backend: B,
    cache: LruCache<SnapshotIndex, WindowState>,
    latest: Option<SnapshotIndex>,
    oldest: SnapshotIndex,
}

impl<B: KvBackend> SnapshotStore<B> {
    /// Wrap a backend, reading any existing metadata.
    pub fn open(backend: B) -> Result<Self> {
        let latest = read_index(&backend, LATEST_KEY)?;
        let oldest = read_index(&backend, OLDEST_KEY)?.unwrap_or_default();
        if let Some(latest) = latest {
            if oldest > latest {
                return Err(VersionBitsError::Corruption(format!(
                    "oldest snapshot {:?} is above latest {:?}",
                    oldest, latest
                )));
            }
        }

        let cache_size = NonZeroUsize::new(SNAPSHOT_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN);

        Ok(Self {
            backend,
            cache: LruCache::new(cache_size),
            latest,
            oldest,
        })
    }

    /// Index of the most recent commit, if any.
    pub fn latest_index(&self) -> Option<SnapshotIndex> {
        self.latest
    }

    /// Lowest index still retained, if any commit exists.
    pub fn oldest_index(&self) -> Option<SnapshotIndex> {
        self.latest.map(|_| self.oldest)
    }

    /// Number of retained snapshots.
    pub fn snapshot_count(&self) -> usize {
        self.latest.map_or(0, |latest| (latest.0 - self.oldest.0 + 1) as usize)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn into_inner(self) -> B {
        self.backend
    }

    /// Most recent snapshot and its index.
    pub fn latest(&mut self) -> Result<Option<(SnapshotIndex, WindowState)>> {
        match self.latest {
            Some(index) => Ok(Some((index, self.get(index)?))),
            None => Ok(None),
        }
    }

    /// Snapshot at `index`.
    pub fn get(&mut self, index: SnapshotIndex) -> Result<WindowState> {
        if let Some(state) = self.cache.get(&index) {
            return Ok(state.clone());
        }
        let bytes = self
            .backend
            .get(&snapshot_key(index))?
            .ok_or(VersionBitsError::SnapshotNotFound(index))?;
        let state = decode_snapshot(&bytes)?;
        self.cache.put(index, state.clone());
        Ok(state)
    }

    /// Persist `state` as the next snapshot.
    pub fn commit(&mut self, state: &WindowState) -> Result<SnapshotIndex> {
        let index = self.latest.map_or(SnapshotIndex(0), SnapshotIndex::next);

        let mut batch = WriteBatch::new();
        batch.put(snapshot_key(index), encode_snapshot(state)?);
        batch.put(LATEST_KEY, index.to_key_bytes().to_vec());
        if self.latest.is_none() {
            batch.put(OLDEST_KEY, index.to_key_bytes().to_vec());
        }
        self.backend.write_batch(batch)?;

        if self.latest.is_none() {
            self.oldest = index;
        }
        self.latest = Some(index);
        self.cache.put(index, state.clone());

        tracing::debug!(index = index.0, "committed snapshot");
        Ok(index)
    }

    /// Restore the snapshot at `target`, discarding every later one.
    pub fn rollback(&mut self, target: SnapshotIndex) -> Result<WindowState> {
        let latest = self.latest.ok_or(VersionBitsError::SnapshotNotFound(target))?;
        if target < self.oldest {
            return Err(VersionBitsError::ReorgDepthExceeded {
                requested: target,
                oldest: self.oldest,
            });
        }
        if target > latest {
            return Err(VersionBitsError::SnapshotNotFound(target));
        }

        let state = self.get(target)?;

        let mut batch = WriteBatch::new();
        for index in (target.0 + 1)..=latest.0 {
            batch.delete(snapshot_key(SnapshotIndex(index)));
        }
        batch.put(LATEST_KEY, target.to_key_bytes().to_vec());
        self.backend.write_batch(batch)?;

        for index in (target.0 + 1)..=latest.0 {
            self.cache.pop(&SnapshotIndex(index));
        }
        self.latest = Some(target);

        tracing::debug!(from = latest.0, to = target.0, "rolled back snapshots");
        Ok(state)
    }

    /// Delete snapshots below `below`. The latest snapshot is never pruned.
    ///
    /// Returns the number of snapshots removed.
    pub fn prune(&mut self, below: SnapshotIndex) -> Result<usize> {
        let latest = match self.latest {
            Some(latest) => latest,
            None => return Ok(0),
        };
        let below = below.min(latest);
        if below <= self.oldest {
            return Ok(0);
        }

        let mut batch = WriteBatch::new();
        for index in self.oldest.0..below.0 {
            batch.delete(snapshot_key(SnapshotIndex(index)));
        }
        batch.put(OLDEST_KEY, below.to_key_bytes().to_vec());
        self.backend.write_batch(batch)?;

        for index in self.oldest.0..below.0 {
            self.cache.pop(&SnapshotIndex(index));
        }
        let removed = (below.0 - self.oldest.0) as usize;
        self.oldest = below;

        tracing::debug!(below = below.0, removed, "pruned snapshots");
        Ok(removed)
    }

    /// SHA-256 of the latest committed snapshot's bytes.
    pub fn state_hash(&self) -> Result<Hash> {
        let latest = self.latest.ok_or(VersionBitsError::NotInitialized)?;
        let bytes = self
            .backend
            .get(&snapshot_key(latest))?
            .ok_or(VersionBitsError::SnapshotNotFound(latest))?;
        Ok(Hash::from_bytes(&bytes))
    }

    /// Indices of the snapshots present in the backend, in order.
    pub fn retained_indices(&self) -> Result<Vec<SnapshotIndex>> {
        let mut end = SNAPSHOT_PREFIX.to_vec();
        if let Some(last) = end.last_mut() {
            *last += 1;
        }
        let entries = self.backend.read_range(SNAPSHOT_PREFIX, &end)?;
        entries
            .iter()
            .map(|(key, _)| {
                SnapshotIndex::from_key_bytes(&key[SNAPSHOT_PREFIX.len()..])
                    .ok_or_else(|| VersionBitsError::Corruption("Malformed snapshot key".into()))
            })
            .collect()
    }
}
