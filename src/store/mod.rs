//! Versioned state storage.
//!
//! [`SnapshotStore`] layers commit / rollback / prune over any
//! [`KvBackend`]. Two backends ship with the crate: [`MemoryBackend`] for
//! tests and ephemeral nodes, and [`FileBackend`], a durable append-only
//! batch log.

mod backend;
mod file;
mod memory;
mod snapshots;

pub use backend::{BatchOp, KvBackend, WriteBatch};
pub use file::{FileBackend, FileBackendConfig};
pub use memory::MemoryBackend;
pub use snapshots::SnapshotStore;
