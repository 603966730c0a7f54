//! Deployment registry: ordered deployments plus an id index.

use super::types::{Deployment, DeploymentStatus, DeploymentUpdate};
use crate::config::DeploymentParams;
use crate::error::Result;
use crate::subscriptions::VersionBitsEvent;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The set of tracked deployments, in registration order.
///
/// Serialized as the plain ordered list; the id index is rebuilt whenever a
/// registry is deserialized, so a restored snapshot is always relinked.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Deployment>", into = "Vec<Deployment>")]
pub struct DeploymentRegistry {
    deployments: Vec<Deployment>,
    /// id -> position in `deployments`.
    index: HashMap<String, usize>,
    /// Notifications queued by `upsert`, drained by the caller.
    pending: Vec<VersionBitsEvent>,
}

impl DeploymentRegistry {
    pub fn from_params(params: &[DeploymentParams]) -> Self {
        params
            .iter()
            .map(Deployment::from_params)
            .collect::<Vec<_>>()
            .into()
    }

    pub fn len(&self) -> usize {
        self.deployments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deployments.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Deployment> {
        self.index.get(id).map(|&pos| &self.deployments[pos])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Deployment> + '_ {
        self.deployments.iter()
    }

    /// Ids in registration order.
    pub fn ids(&self) -> Vec<String> {
        self.deployments.iter().map(|d| d.id.clone()).collect()
    }

    /// Owned copy of every deployment.
    pub fn to_vec(&self) -> Vec<Deployment> {
        self.deployments.clone()
    }

    /// First deployment on `bit` that currently owns it (started or locked in).
    pub fn lookup_by_bit(&self, bit: u8) -> Option<&Deployment> {
        self.lookup_by_bit_in(bit, &DeploymentStatus::SIGNALING)
    }

    /// First deployment, in registration order, on `bit` with one of `statuses`.
    pub fn lookup_by_bit_in(&self, bit: u8, statuses: &[DeploymentStatus]) -> Option<&Deployment> {
        self.deployments
            .iter()
            .find(|d| d.bit == bit && statuses.contains(&d.status))
    }

    /// Insert a new deployment or merge fields into an existing one.
    ///
    /// Queues `Update` on any field change. A status change additionally
    /// queues `Status`, the event for the new status, and `Unknown` for
    /// bit-discovered deployments.
    pub fn upsert(&mut self, id: &str, update: DeploymentUpdate) -> Result<()> {
        let (previous, current) = match self.index.get(id) {
            Some(&pos) => {
                let dep = &mut self.deployments[pos];
                let before = dep.clone();
                update.apply(dep);
                if *dep == before {
                    return Ok(());
                }
                (Some(before.status), dep.clone())
            }
            None => {
                let dep = update.into_deployment(id)?;
                self.index.insert(dep.id.clone(), self.deployments.len());
                self.deployments.push(dep.clone());
                (None, dep)
            }
        };

        self.pending.push(VersionBitsEvent::Update {
            deployment: current.clone(),
        });
        if previous != Some(current.status) {
            self.pending.push(VersionBitsEvent::Status {
                deployment: current.clone(),
                previous,
            });
            if let Some(event) = VersionBitsEvent::for_status(&current) {
                self.pending.push(event);
            }
            if current.unknown {
                self.pending.push(VersionBitsEvent::Unknown {
                    deployment: current,
                });
            }
        }
        Ok(())
    }

    /// Take the queued notifications.
    pub fn drain_events(&mut self) -> Vec<VersionBitsEvent> {
        std::mem::take(&mut self.pending)
    }

    /// Rebuild the id index from the ordered list.
    pub fn relink(&mut self) {
        self.index.clear();
        for (pos, dep) in self.deployments.iter().enumerate() {
            // First registration wins an id tie.
            self.index.entry(dep.id.clone()).or_insert(pos);
        }
    }
}

impl From<Vec<Deployment>> for DeploymentRegistry {
    fn from(deployments: Vec<Deployment>) -> Self {
        let mut registry = Self {
            deployments,
            index: HashMap::new(),
            pending: Vec::new(),
        };
        registry.relink();
        registry
    }
}

impl From<DeploymentRegistry> for Vec<Deployment> {
    fn from(registry: DeploymentRegistry) -> Self {
        registry.deployments
    }
}

impl PartialEq for DeploymentRegistry {
    fn eq(&self, other: &Self) -> bool {
        self.deployments == other.deployments
    }
}

impl Eq for DeploymentRegistry {}
