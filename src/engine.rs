//! Per-block deployment state transitions.
//!
//! The engine is stateless: it owns the activation parameters and mutates a
//! [`WindowState`] handed to it, one connected block at a time. Disconnects
//! never reach the engine; they are served by restoring an earlier snapshot.

use crate::bits::{active_bits, is_signaling_version};
use crate::config::{UnknownBitPolicy, VersionBitsConfig, UNKNOWN_ID_PREFIX};
use crate::deployments::{Deployment, DeploymentRegistry, DeploymentStatus, DeploymentUpdate};
use crate::error::{Result, VersionBitsError};
use crate::mtp::MedianTimeWindow;
use crate::subscriptions::VersionBitsEvent;
use crate::types::{ChainTip, YEAR};
use serde::{Deserialize, Serialize};

/// Placeholder lifetime for deployments discovered from unconfigured bits.
pub const UNKNOWN_DEPLOYMENT_TIMEOUT: u64 = 100 * YEAR;

/// The versioned, process-wide activation state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowState {
    pub deployments: DeploymentRegistry,
    pub timestamps: MedianTimeWindow,
    /// Signaling blocks seen in the current confirmation window.
    pub bip9_count: u32,
    /// Last connected block.
    pub tip: Option<ChainTip>,
}

impl WindowState {
    /// Fresh state for a first run.
    pub fn initial(config: &VersionBitsConfig) -> Self {
        Self {
            deployments: DeploymentRegistry::from_params(&config.deployments),
            timestamps: MedianTimeWindow::new(),
            bip9_count: 0,
            tip: None,
        }
    }

    pub fn drain_events(&mut self) -> Vec<VersionBitsEvent> {
        self.deployments.drain_events()
    }
}

/// Fields of a connected block the engine looks at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockInput {
    pub height: u64,
    pub version: u32,
    pub timestamp: u32,
}

/// Drives deployments through `defined -> started -> lockedIn -> activated`
/// (or `failed`).
#[derive(Clone, Debug)]
pub struct TransitionEngine {
    confirmation_window: u64,
    activation_threshold: u32,
    unknown_bits: UnknownBitPolicy,
}

impl TransitionEngine {
    pub fn new(config: &VersionBitsConfig) -> Self {
        Self {
            confirmation_window: u64::from(config.confirmation_window),
            activation_threshold: config.activation_threshold,
            unknown_bits: config.unknown_bits,
        }
    }

    pub fn is_boundary(&self, height: u64) -> bool {
        height % self.confirmation_window == 0
    }

    /// Apply one connected block to `state`.
    pub fn connect(&self, state: &mut WindowState, block: BlockInput) -> Result<()> {
        state.timestamps.push(block.timestamp);
        if !state.timestamps.is_full() {
            // Bootstrap: no MTP yet.
            return Ok(());
        }

        if self.is_boundary(block.height) {
            let mtp = u64::from(state.timestamps.median_time_past()?);
            self.evaluate_boundary(state, block.height, mtp)?;
        }

        if is_signaling_version(block.version) {
            self.count_signals(state, block)?;
        }
        Ok(())
    }

    fn evaluate_boundary(&self, state: &mut WindowState, height: u64, mtp: u64) -> Result<()> {
        let registry = &mut state.deployments;

        for id in registry.ids() {
            let dep = match registry.get(&id) {
                Some(dep) => dep.clone(),
                None => continue,
            };

            match dep.status {
                DeploymentStatus::LockedIn => {
                    registry.upsert(&id, DeploymentUpdate::new().activated(height, mtp))?;
                }
                DeploymentStatus::Started if dep.count >= self.activation_threshold => {
                    registry.upsert(&id, DeploymentUpdate::new().locked_in(height, mtp))?;
                }
                DeploymentStatus::Started if mtp >= dep.timeout => {
                    registry.upsert(&id, DeploymentUpdate::new().status(DeploymentStatus::Failed))?;
                }
                DeploymentStatus::Defined if mtp >= dep.timeout => {
                    registry.upsert(&id, DeploymentUpdate::new().status(DeploymentStatus::Failed))?;
                }
                DeploymentStatus::Defined if mtp >= dep.start => {
                    Self::resolve_collision(registry, &dep)?;
                    registry.upsert(&id, DeploymentUpdate::new().started(height, mtp))?;
                }
                _ => {}
            }
            if let Some(after) = registry.get(&id).map(|d| d.status).filter(|s| *s != dep.status) {
                tracing::debug!(deployment = %id, height, mtp, from = %dep.status, to = %after, "deployment transition");
            }
        }

        for id in registry.ids() {
            registry.upsert(&id, DeploymentUpdate::new().count(0))?;
        }
        state.bip9_count = 0;
        Ok(())
    }

    /// Fail whichever deployment currently owns `incoming`'s bit.
    fn resolve_collision(registry: &mut DeploymentRegistry, incoming: &Deployment) -> Result<()> {
        let holder = registry
            .lookup_by_bit(incoming.bit)
            .filter(|d| d.id != incoming.id)
            .map(|d| d.id.clone());
        if let Some(holder) = holder {
            tracing::debug!(
                bit = incoming.bit,
                failed = %holder,
                started = %incoming.id,
                "bit collision"
            );
            registry.upsert(&holder, DeploymentUpdate::new().status(DeploymentStatus::Failed))?;
        }
        Ok(())
    }

    fn count_signals(&self, state: &mut WindowState, block: BlockInput) -> Result<()> {
        state.bip9_count += 1;
        let registry = &mut state.deployments;

        for bit in active_bits(block.version) {
            let id = match registry.lookup_by_bit(bit) {
                Some(dep) => dep.id.clone(),
                None => {
                    if self.unknown_bits == UnknownBitPolicy::Reject {
                        return Err(VersionBitsError::UnknownSignal {
                            bit,
                            height: block.height,
                        });
                    }
                    let id = format!("{}{}-{}", UNKNOWN_ID_PREFIX, bit, block.height);
                    let start = u64::from(block.timestamp);
                    registry.upsert(
                        &id,
                        DeploymentUpdate::unknown_bit(bit, start, start + UNKNOWN_DEPLOYMENT_TIMEOUT)
                            .started(block.height, start),
                    )?;
                    tracing::debug!(bit, height = block.height, deployment = %id, "unknown signal bit");
                    id
                }
            };
            let count = registry.get(&id).map_or(0, |d| d.count);
            registry.upsert(&id, DeploymentUpdate::new().count(count + 1))?;
        }
        Ok(())
    }
}
