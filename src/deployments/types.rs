//! Deployment record and field updates.

use crate::config::DeploymentParams;
use crate::error::{Result, VersionBitsError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Activation status of a deployment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeploymentStatus {
    Defined,
    Started,
    LockedIn,
    Activated,
    Failed,
}

impl DeploymentStatus {
    /// Statuses in which a deployment owns its bit.
    pub const SIGNALING: [DeploymentStatus; 2] = [DeploymentStatus::Started, DeploymentStatus::LockedIn];

    pub fn is_signaling(self) -> bool {
        Self::SIGNALING.contains(&self)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, DeploymentStatus::Activated | DeploymentStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeploymentStatus::Defined => "defined",
            DeploymentStatus::Started => "started",
            DeploymentStatus::LockedIn => "lockedIn",
            DeploymentStatus::Activated => "activated",
            DeploymentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tracked soft fork.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,
    pub name: String,
    /// Discovered from an unconfigured signal bit.
    pub unknown: bool,
    pub bit: u8,
    pub start: u64,
    pub timeout: u64,
    pub status: DeploymentStatus,
    /// Signaling blocks seen in the current confirmation window.
    pub count: u32,
    pub start_height: Option<u64>,
    pub start_time: Option<u64>,
    pub lock_in_height: Option<u64>,
    pub lock_in_time: Option<u64>,
    pub activation_height: Option<u64>,
    pub activation_time: Option<u64>,
}

impl Deployment {
    /// A configured deployment in its initial `defined` state.
    pub fn from_params(params: &DeploymentParams) -> Self {
        Self {
            id: params.id.clone(),
            name: params.name.clone().unwrap_or_else(|| params.id.clone()),
            unknown: false,
            bit: params.bit,
            start: params.start,
            timeout: params.timeout,
            status: DeploymentStatus::Defined,
            count: 0,
            start_height: None,
            start_time: None,
            lock_in_height: None,
            lock_in_time: None,
            activation_height: None,
            activation_time: None,
        }
    }
}

/// Partial set of deployment fields, applied by the registry.
///
/// For an id the registry has not seen, the update becomes the new
/// deployment and must then carry `bit`, `start` and `timeout`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeploymentUpdate {
    pub unknown: Option<bool>,
    pub bit: Option<u8>,
    pub start: Option<u64>,
    pub timeout: Option<u64>,
    pub status: Option<DeploymentStatus>,
    pub count: Option<u32>,
    pub start_height: Option<u64>,
    pub start_time: Option<u64>,
    pub lock_in_height: Option<u64>,
    pub lock_in_time: Option<u64>,
    pub activation_height: Option<u64>,
    pub activation_time: Option<u64>,
}

impl DeploymentUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    pub fn status(mut self, status: DeploymentStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn started(mut self, height: u64, time: u64) -> Self {
        self.status = Some(DeploymentStatus::Started);
        self.start_height = Some(height);
        self.start_time = Some(time);
        self
    }

    pub fn locked_in(mut self, height: u64, time: u64) -> Self {
        self.status = Some(DeploymentStatus::LockedIn);
        self.lock_in_height = Some(height);
        self.lock_in_time = Some(time);
        self
    }

    pub fn activated(mut self, height: u64, time: u64) -> Self {
        self.status = Some(DeploymentStatus::Activated);
        self.activation_height = Some(height);
        self.activation_time = Some(time);
        self
    }

    /// Payload for a deployment discovered from an unconfigured bit.
    pub fn unknown_bit(bit: u8, start: u64, timeout: u64) -> Self {
        Self {
            unknown: Some(true),
            bit: Some(bit),
            start: Some(start),
            timeout: Some(timeout),
            ..Self::default()
        }
    }

    /// Merge the present fields into `dep`.
    pub fn apply(&self, dep: &mut Deployment) {
        if let Some(unknown) = self.unknown {
            dep.unknown = unknown;
        }
        if let Some(bit) = self.bit {
            dep.bit = bit;
        }
        if let Some(start) = self.start {
            dep.start = start;
        }
        if let Some(timeout) = self.timeout {
            dep.timeout = timeout;
        }
        if let Some(status) = self.status {
            dep.status = status;
        }
        if let Some(count) = self.count {
            dep.count = count;
        }
        if self.start_height.is_some() {
            dep.start_height = self.start_height;
        }
        if self.start_time.is_some() {
            dep.start_time = self.start_time;
        }
        if self.lock_in_height.is_some() {
            dep.lock_in_height = self.lock_in_height;
        }
        if self.lock_in_time.is_some() {
            dep.lock_in_time = self.lock_in_time;
        }
        if self.activation_height.is_some() {
            dep.activation_height = self.activation_height;
        }
        if self.activation_time.is_some() {
            dep.activation_time = self.activation_time;
        }
    }

    /// Build a brand-new deployment from this payload.
    pub fn into_deployment(self, id: &str) -> Result<Deployment> {
        let (bit, start, timeout) = match (self.bit, self.start, self.timeout) {
            (Some(bit), Some(start), Some(timeout)) => (bit, start, timeout),
            _ => {
                return Err(VersionBitsError::InvalidConfiguration(format!(
                    "new deployment {} needs bit, start and timeout",
                    id
                )))
            }
        };
        let mut dep = Deployment {
            id: id.to_string(),
            name: id.to_string(),
            unknown: false,
            bit,
            start,
            timeout,
            status: DeploymentStatus::Defined,
            count: 0,
            start_height: None,
            start_time: None,
            lock_in_height: None,
            lock_in_time: None,
            activation_height: None,
            activation_time: None,
        };
        self.apply(&mut dep);
        Ok(dep)
    }
}
