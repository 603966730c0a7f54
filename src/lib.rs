//! # Versionbits
//!
//! Soft-fork activation tracking from block version bits.
//!
//! ## Core Concepts
//!
//! - **Signals**: The low 28 bits of a `001`-prefixed block version are
//!   independent votes for candidate deployments
//! - **Deployments**: Move `defined -> started -> lockedIn -> activated`
//!   (or `failed`), evaluated once per confirmation window against the
//!   median time past of the last 11 blocks
//! - **Snapshots**: Every connected block commits a full snapshot of the
//!   window state; a disconnect restores the previous one verbatim
//! - **Subscriptions**: Observers receive typed status-change events
//!
//! ## Example
//!
//! ```ignore
//! use versionbits::{DeploymentParams, FileBackend, FileBackendConfig, VersionBits, VersionBitsConfig};
//!
//! let config = VersionBitsConfig::new(2016, 1916, vec![
//!     DeploymentParams::new("csv", 0, 1462060800, 1493596800),
//! ]);
//! let backend = FileBackend::open(FileBackendConfig::at("./versionbits"))?;
//! let tracker = VersionBits::open(config, backend)?;
//!
//! // Feed connect/disconnect events from the chain tracker
//! tracker.add_block(height, header)?;
//!
//! if let Some(csv) = tracker.get("csv") {
//!     println!("csv is {}", csv.status);
//! }
//! ```

pub mod bits;
pub mod config;
pub mod deployments;
pub mod engine;
pub mod error;
pub mod mtp;
pub mod store;
pub mod stream;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use bits::{active_bits, is_signaling_version};
pub use config::{DeploymentParams, UnknownBitPolicy, VersionBitsConfig};
pub use deployments::{Deployment, DeploymentRegistry, DeploymentStatus, DeploymentUpdate};
pub use engine::{BlockInput, TransitionEngine, WindowState};
pub use error::{ErrorKind, Result, VersionBitsError};
pub use mtp::{MedianTimeWindow, TIME_WINDOW};
pub use store::{
    BatchOp, FileBackend, FileBackendConfig, KvBackend, MemoryBackend, SnapshotStore, WriteBatch,
};
pub use stream::{Outcome, VersionBits};
pub use subscriptions::{
    DropReason, SubscriptionConfig, SubscriptionFilter, SubscriptionHandle, SubscriptionId,
    SubscriptionManager, VersionBitsEvent,
};
pub use types::*;
