//! Tracked deployments and the registry that owns them.
//!
//! Every mutation of a deployment goes through [`DeploymentRegistry::upsert`],
//! which also queues the matching notifications. Callers outside the engine
//! only ever see owned copies.

mod registry;
mod types;

pub use registry::DeploymentRegistry;
pub use types::{Deployment, DeploymentStatus, DeploymentUpdate};
