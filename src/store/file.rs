//! Append-only file backend.
//!
//! Every batch is written as one checksummed frame and fsync'd before it is
//! acknowledged. A frame that fails to write is cut back off the log before
//! the error is returned. Opening replays the frames into an ordered map; a
//! torn or corrupt tail frame (a batch that was never acknowledged) is cut
//! off as well.

use super::backend::{KvBackend, WriteBatch};
use super::memory::apply_batch;
use crate::error::{Result, VersionBitsError};
use fs2::FileExt;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Magic bytes for the batch log.
const LOG_MAGIC: &[u8; 4] = b"VBL\0";

/// Current log format version.
const LOG_VERSION: u8 = 1;

const HEADER_SIZE: usize = 5;

/// Frames larger than this are treated as corruption.
const MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

const LOG_FILE: &str = "state.log";
const COMPACT_FILE: &str = "state.log.compact";
const LOCK_FILE: &str = "LOCK";

/// File backend configuration.
#[derive(Clone, Debug)]
pub struct FileBackendConfig {
    /// Directory holding the log and lock file.
    pub path: PathBuf,

    /// Whether to create the directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Rewrite the log after this many batches (0 = never).
    pub compact_after: u64,
}

impl Default for FileBackendConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./versionbits"),
            create_if_missing: true,
            compact_after: 1000,
        }
    }
}

impl FileBackendConfig {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }
}

/// Durable backend over a single append-only batch log.
pub struct FileBackend {
    config: FileBackendConfig,

    /// Held for exclusive access until drop.
    _lock_file: File,

    /// Append handle on the live log.
    log: File,

    /// Length of the log up to the last acknowledged frame.
    log_len: u64,

    entries: BTreeMap<Vec<u8>, Vec<u8>>,

    /// Frames in the log since it was last rewritten.
    batches_in_log: u64,
}

impl FileBackend {
    /// Open an existing backend or create a new one.
    pub fn open(config: FileBackendConfig) -> Result<Self> {
        if !config.path.exists() {
            if !config.create_if_missing {
                return Err(VersionBitsError::NotInitialized);
            }
            fs::create_dir_all(&config.path)?;
        }

        let lock_file = Self::acquire_lock(&config.path)?;
        let log_path = config.path.join(LOG_FILE);

        let (entries, batches_in_log) = if log_path.exists() {
            Self::replay(&log_path)?
        } else {
            Self::write_header(&log_path)?;
            (BTreeMap::new(), 0)
        };

        let log = OpenOptions::new().append(true).open(&log_path)?;
        let log_len = log.metadata()?.len();

        tracing::debug!(
            path = %config.path.display(),
            keys = entries.len(),
            batches = batches_in_log,
            "opened file backend"
        );

        Ok(Self {
            config,
            _lock_file: lock_file,
            log,
            log_len,
            entries,
            batches_in_log,
        })
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Number of frames currently in the log.
    pub fn batches_in_log(&self) -> u64 {
        self.batches_in_log
    }

    /// Rewrite the log so it holds only live keys, in a single frame.
    pub fn compact(&mut self) -> Result<()> {
        let compact_path = self.config.path.join(COMPACT_FILE);
        let log_path = self.config.path.join(LOG_FILE);

        Self::write_header(&compact_path)?;
        let mut file = OpenOptions::new().append(true).open(&compact_path)?;
        let mut batches = 0;
        if !self.entries.is_empty() {
            let mut batch = WriteBatch::new();
            for (key, value) in &self.entries {
                batch.put(key.clone(), value.clone());
            }
            file.write_all(&Self::encode_frame(&batch)?)?;
            batches = 1;
        }
        file.sync_all()?;
        let len = file.metadata()?.len();

        // The handle follows the file through the rename.
        fs::rename(&compact_path, &log_path)?;
        self.log = file;
        self.log_len = len;
        self.batches_in_log = batches;

        tracing::debug!(keys = self.entries.len(), "compacted batch log");
        Ok(())
    }

    /// Write and sync one frame, advancing `log_len` only once it is durable.
    fn append_frame(&mut self, batch: &WriteBatch) -> Result<()> {
        let frame = Self::encode_frame(batch)?;
        self.log.write_all(&frame)?;
        self.log.sync_data()?;
        self.log_len += frame.len() as u64;
        Ok(())
    }

    /// Cut anything written after the last acknowledged frame.
    fn discard_tail(&mut self) -> Result<()> {
        self.log.set_len(self.log_len)?;
        self.log.sync_all()?;
        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_file = File::create(path.join(LOCK_FILE))?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| VersionBitsError::Locked)?;

        Ok(lock_file)
    }

    fn write_header(path: &Path) -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.write_all(LOG_MAGIC)?;
        file.write_all(&[LOG_VERSION])?;
        file.sync_all()?;
        Ok(())
    }

    /// Rebuild the key space from the log, cutting off a bad tail.
    fn replay(path: &Path) -> Result<(BTreeMap<Vec<u8>, Vec<u8>>, u64)> {
        let data = fs::read(path)?;
        if data.len() < HEADER_SIZE || &data[..4] != LOG_MAGIC {
            return Err(VersionBitsError::InvalidFormat("Invalid batch log magic".into()));
        }
        if data[4] != LOG_VERSION {
            return Err(VersionBitsError::InvalidFormat(format!(
                "Unsupported batch log version: {}",
                data[4]
            )));
        }

        let mut entries = BTreeMap::new();
        let mut batches = 0;
        let mut offset = HEADER_SIZE;

        while offset < data.len() {
            match Self::read_frame(&data[offset..]) {
                Ok((batch, frame_len)) => {
                    apply_batch(&mut entries, batch);
                    offset += frame_len;
                    batches += 1;
                }
                Err(err) => {
                    tracing::warn!(
                        path = %path.display(),
                        offset,
                        dropped = data.len() - offset,
                        error = %err,
                        "truncating unacknowledged tail of batch log"
                    );
                    let file = OpenOptions::new().write(true).open(path)?;
                    file.set_len(offset as u64)?;
                    file.sync_all()?;
                    break;
                }
            }
        }

        Ok((entries, batches))
    }

    /// `[u32 len][MessagePack batch][u32 crc32]`
    fn encode_frame(batch: &WriteBatch) -> Result<Vec<u8>> {
        let encoded = rmp_serde::to_vec(batch)?;

        let mut frame = Vec::with_capacity(encoded.len() + 8);
        frame.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
        frame.extend_from_slice(&encoded);
        frame.extend_from_slice(&crc32fast::hash(&encoded).to_le_bytes());
        Ok(frame)
    }

    /// Decode one frame from the front of `data`, returning it and its size.
    fn read_frame(data: &[u8]) -> Result<(WriteBatch, usize)> {
        let truncated = || VersionBitsError::Corruption("Truncated batch frame".into());

        let len_bytes: [u8; 4] = data.get(..4).ok_or_else(truncated)?.try_into().map_err(|_| truncated())?;
        let len = u32::from_le_bytes(len_bytes) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(VersionBitsError::Corruption("Batch frame too large".into()));
        }

        let encoded = data.get(4..4 + len).ok_or_else(truncated)?;
        let checksum_bytes: [u8; 4] = data
            .get(4 + len..8 + len)
            .ok_or_else(truncated)?
            .try_into()
            .map_err(|_| truncated())?;

        let expected = u32::from_le_bytes(checksum_bytes);
        let got = crc32fast::hash(encoded);
        if expected != got {
            return Err(VersionBitsError::ChecksumMismatch { expected, got });
        }

        let batch = rmp_serde::from_slice(encoded)?;
        Ok((batch, 8 + len))
    }
}

impl KvBackend for FileBackend {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(key).cloned())
    }

    fn read_range(&self, start: &[u8], end: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        if start >= end {
            return Ok(Vec::new());
        }
        Ok(self
            .entries
            .range(start.to_vec()..end.to_vec())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn write_batch(&mut self, batch: WriteBatch) -> Result<()> {
        if let Err(err) = self.append_frame(&batch) {
            if let Err(cleanup) = self.discard_tail() {
                tracing::error!(error = %cleanup, "failed to cut partial frame from batch log");
            }
            return Err(err);
        }

        apply_batch(&mut self.entries, batch);
        self.batches_in_log += 1;

        // The batch is durable at this point; a failed rewrite is retried
        // after the next batch.
        if self.config.compact_after > 0 && self.batches_in_log >= self.config.compact_after {
            if let Err(err) = self.compact() {
                tracing::warn!(
                    path = %self.config.path.display(),
                    batches = self.batches_in_log,
                    error = %err,
                    "batch log compaction failed"
                );
            }
        }
        Ok(())
    }
}
