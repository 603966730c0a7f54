//! Notification types for tracker observers.

use crate::deployments::{Deployment, DeploymentStatus};
use crate::error::ErrorKind;
use crate::types::BlockEvent;
use serde::{Deserialize, Serialize};

/// Configuration for a subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    /// Max buffered events before dropping subscriber.
    /// Default: 1000
    pub buffer_size: usize,

    /// Filter criteria.
    pub filter: SubscriptionFilter,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            filter: SubscriptionFilter::all(),
        }
    }
}

/// Filter criteria for subscriptions.
#[derive(Clone, Debug, Default)]
pub struct SubscriptionFilter {
    /// Only these deployment ids (None = all deployments).
    pub deployment_ids: Option<Vec<String>>,

    /// Include deployment updates and status transitions.
    pub include_deployments: bool,

    /// Include block pass-through events.
    pub include_blocks: bool,

    /// Include ready and error events.
    pub include_lifecycle: bool,
}

impl SubscriptionFilter {
    /// Deployment events only.
    pub fn deployments() -> Self {
        Self {
            include_deployments: true,
            ..Default::default()
        }
    }

    /// Events for the given deployment ids.
    pub fn deployment_ids(ids: Vec<String>) -> Self {
        Self {
            deployment_ids: Some(ids),
            include_deployments: true,
            ..Default::default()
        }
    }

    /// Block pass-through events only.
    pub fn blocks() -> Self {
        Self {
            include_blocks: true,
            ..Default::default()
        }
    }

    /// Ready and error events only.
    pub fn lifecycle() -> Self {
        Self {
            include_lifecycle: true,
            ..Default::default()
        }
    }

    /// Subscribe to everything.
    pub fn all() -> Self {
        Self {
            include_deployments: true,
            include_blocks: true,
            include_lifecycle: true,
            ..Default::default()
        }
    }

    pub(crate) fn matches(&self, event: &VersionBitsEvent) -> bool {
        match event {
            VersionBitsEvent::Ready | VersionBitsEvent::Error { .. } => self.include_lifecycle,
            VersionBitsEvent::Block { .. }
            | VersionBitsEvent::Add { .. }
            | VersionBitsEvent::Remove { .. } => self.include_blocks,
            VersionBitsEvent::Dropped { .. } => true,
            _ => {
                if !self.include_deployments {
                    return false;
                }
                match (&self.deployment_ids, event.deployment_id()) {
                    (Some(ids), Some(id)) => ids.iter().any(|i| i == id),
                    _ => true,
                }
            }
        }
    }
}

/// Events emitted to subscribers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VersionBitsEvent {
    // --- Deployment Events ---
    /// Some field of a deployment changed.
    Update { deployment: Deployment },

    /// A deployment's status changed (`previous` is None for a new one).
    Status {
        deployment: Deployment,
        previous: Option<DeploymentStatus>,
    },

    Started { deployment: Deployment },

    LockedIn { deployment: Deployment },

    Activated { deployment: Deployment },

    Failed { deployment: Deployment },

    /// Fires alongside the status event of a bit-discovered deployment.
    Unknown { deployment: Deployment },

    /// A deployment vanished because the block that discovered it was disconnected.
    Discarded { id: String },

    // --- Block Events ---
    Block { block: BlockEvent },

    Add { block: BlockEvent },

    Remove { block: BlockEvent },

    // --- Lifecycle Events ---
    /// Persisted state finished loading.
    Ready,

    /// A block could not be processed.
    Error { kind: ErrorKind, message: String },

    /// Subscription was dropped.
    Dropped { reason: DropReason },
}

impl VersionBitsEvent {
    /// The notification mirroring a new status, if that status has one.
    pub fn for_status(deployment: &Deployment) -> Option<Self> {
        let deployment = deployment.clone();
        match deployment.status {
            DeploymentStatus::Defined => None,
            DeploymentStatus::Started => Some(VersionBitsEvent::Started { deployment }),
            DeploymentStatus::LockedIn => Some(VersionBitsEvent::LockedIn { deployment }),
            DeploymentStatus::Activated => Some(VersionBitsEvent::Activated { deployment }),
            DeploymentStatus::Failed => Some(VersionBitsEvent::Failed { deployment }),
        }
    }

    /// Id of the deployment this event concerns.
    pub fn deployment_id(&self) -> Option<&str> {
        match self {
            VersionBitsEvent::Update { deployment }
            | VersionBitsEvent::Status { deployment, .. }
            | VersionBitsEvent::Started { deployment }
            | VersionBitsEvent::LockedIn { deployment }
            | VersionBitsEvent::Activated { deployment }
            | VersionBitsEvent::Failed { deployment }
            | VersionBitsEvent::Unknown { deployment } => Some(&deployment.id),
            VersionBitsEvent::Discarded { id } => Some(id),
            _ => None,
        }
    }
}

/// Why a subscription was dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Explicitly unsubscribed.
    Unsubscribed,
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Handle to manage a subscription.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<VersionBitsEvent>,
}

impl SubscriptionHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<VersionBitsEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<VersionBitsEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<VersionBitsEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Everything currently buffered, without blocking.
    pub fn drain(&self) -> Vec<VersionBitsEvent> {
        self.receiver.try_iter().collect()
    }
}
