//! Observer surface for tracker notifications.
//!
//! Subscribers receive [`VersionBitsEvent`]s over bounded channels:
//! - Deployment updates and status transitions
//! - Block pass-through (connect/disconnect)
//! - Lifecycle (ready, fatal errors)
//!
//! A subscriber that lets its buffer fill up is dropped rather than
//! stalling block processing.
//!
//! # Example
//!
//! ```ignore
//! let handle = tracker.subscribe(SubscriptionConfig {
//!     filter: SubscriptionFilter::deployment_ids(vec!["csv".to_string()]),
//!     ..Default::default()
//! });
//!
//! loop {
//!     match handle.recv() {
//!         Ok(VersionBitsEvent::Activated { deployment }) => println!("{} active", deployment.id),
//!         Ok(VersionBitsEvent::Dropped { .. }) => break,
//!         Ok(_) => {}
//!         Err(_) => break,
//!     }
//! }
//! ```

mod manager;
mod types;

pub use manager::SubscriptionManager;
pub use types::{
    DropReason, SubscriptionConfig, SubscriptionFilter, SubscriptionHandle, SubscriptionId,
    VersionBitsEvent,
};
