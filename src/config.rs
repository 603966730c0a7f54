//! Tracker configuration.

use crate::bits::MAX_SIGNAL_BIT;
use crate::error::{Result, VersionBitsError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Default pruning horizon; also the deepest reorg that can be undone.
pub const DEFAULT_REORG_WINDOW: u64 = 100;

/// Default number of heights between progress log lines.
pub const DEFAULT_LOG_INTERVAL: u64 = 20_000;

/// Id prefix reserved for deployments discovered from unconfigured bits.
pub const UNKNOWN_ID_PREFIX: &str = "unknown-";

/// What to do with a signal bit that no started deployment watches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownBitPolicy {
    /// Synthesize an `unknown` deployment for the bit.
    #[default]
    Track,
    /// Treat the signal as a fatal error.
    Reject,
}

/// A configured soft-fork deployment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentParams {
    pub id: String,
    /// Display label; defaults to `id`.
    #[serde(default)]
    pub name: Option<String>,
    pub bit: u8,
    /// MTP (seconds) at which signaling may begin.
    pub start: u64,
    /// MTP (seconds) after which the deployment is abandoned.
    pub timeout: u64,
}

impl DeploymentParams {
    pub fn new(id: impl Into<String>, bit: u8, start: u64, timeout: u64) -> Self {
        Self {
            id: id.into(),
            name: None,
            bit,
            start,
            timeout,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Versionbits parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionBitsConfig {
    /// Blocks per retarget period.
    pub confirmation_window: u32,

    /// Signals required within one window to lock in.
    pub activation_threshold: u32,

    /// Deployments to track, in registration order.
    pub deployments: Vec<DeploymentParams>,

    /// Number of snapshots retained behind the tip.
    #[serde(default = "default_reorg_window")]
    pub reorg_window: u64,

    #[serde(default)]
    pub unknown_bits: UnknownBitPolicy,

    /// Heights between progress log lines (0 = never).
    #[serde(default = "default_log_interval")]
    pub log_interval: u64,
}

fn default_reorg_window() -> u64 {
    DEFAULT_REORG_WINDOW
}

fn default_log_interval() -> u64 {
    DEFAULT_LOG_INTERVAL
}

impl VersionBitsConfig {
    pub fn new(
        confirmation_window: u32,
        activation_threshold: u32,
        deployments: Vec<DeploymentParams>,
    ) -> Self {
        Self {
            confirmation_window,
            activation_threshold,
            deployments,
            reorg_window: DEFAULT_REORG_WINDOW,
            unknown_bits: UnknownBitPolicy::default(),
            log_interval: DEFAULT_LOG_INTERVAL,
        }
    }

    pub fn with_reorg_window(mut self, reorg_window: u64) -> Self {
        self.reorg_window = reorg_window;
        self
    }

    pub fn with_unknown_bits(mut self, policy: UnknownBitPolicy) -> Self {
        self.unknown_bits = policy;
        self
    }

    /// Parse and validate a JSON document.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let config: Self = serde_json::from_slice(bytes)
            .map_err(|e| VersionBitsError::InvalidConfiguration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = fs::read(path.as_ref())?;
        Self::from_json(&bytes)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(VersionBitsError::InvalidConfiguration(msg));

        if self.confirmation_window == 0 {
            return invalid("confirmation_window must be positive".into());
        }
        if self.activation_threshold == 0 {
            return invalid("activation_threshold must be positive".into());
        }
        if self.activation_threshold > self.confirmation_window {
            return invalid(format!(
                "activation_threshold {} exceeds confirmation_window {}",
                self.activation_threshold, self.confirmation_window
            ));
        }
        if self.deployments.is_empty() {
            return invalid("deployments must not be empty".into());
        }
        if self.reorg_window == 0 {
            return invalid("reorg_window must be positive".into());
        }

        let mut ids = HashSet::new();
        for dep in &self.deployments {
            if dep.id.is_empty() {
                return invalid("deployment id must not be empty".into());
            }
            if dep.id.starts_with(UNKNOWN_ID_PREFIX) {
                return invalid(format!(
                    "deployment id {} uses the reserved prefix {}",
                    dep.id, UNKNOWN_ID_PREFIX
                ));
            }
            if !ids.insert(dep.id.as_str()) {
                return invalid(format!("duplicate deployment id {}", dep.id));
            }
            if dep.bit > MAX_SIGNAL_BIT {
                return invalid(format!(
                    "deployment {} uses bit {} (max {})",
                    dep.id, dep.bit, MAX_SIGNAL_BIT
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn foo() -> DeploymentParams {
        DeploymentParams::new("foo", 0, 5, 105)
    }

    #[test]
    fn test_valid_config() {
        let config = VersionBitsConfig::new(20, 15, vec![foo()]);
        config.validate().unwrap();
        assert_eq!(config.reorg_window, DEFAULT_REORG_WINDOW);
    }

    #[test]
    fn test_invalid_configs() {
        let cases = vec![
            VersionBitsConfig::new(0, 15, vec![foo()]),
            VersionBitsConfig::new(20, 0, vec![foo()]),
            VersionBitsConfig::new(20, 15, vec![]),
            VersionBitsConfig::new(20, 21, vec![foo()]),
            VersionBitsConfig::new(20, 15, vec![foo(), foo()]),
            VersionBitsConfig::new(20, 15, vec![DeploymentParams::new("x", 28, 0, 1)]),
            VersionBitsConfig::new(20, 15, vec![DeploymentParams::new("unknown-3-11", 0, 5, 105)]),
            VersionBitsConfig::new(20, 15, vec![foo()]).with_reorg_window(0),
        ];
        for config in cases {
            let result = config.validate();
            assert!(
                matches!(result, Err(VersionBitsError::InvalidConfiguration(_))),
                "accepted {:?}",
                config
            );
        }
    }

    #[test]
    fn test_from_json_defaults() {
        let json = br#"{
            "confirmation_window": 20,
            "activation_threshold": 15,
            "deployments": [{ "id": "foo", "bit": 0, "start": 5, "timeout": 105 }]
        }"#;
        let config = VersionBitsConfig::from_json(json).unwrap();
        assert_eq!(config.deployments[0].name, None);
        assert_eq!(config.unknown_bits, UnknownBitPolicy::Track);
        assert_eq!(config.log_interval, DEFAULT_LOG_INTERVAL);
    }

    #[test]
    fn test_from_json_missing_fields() {
        for json in [
            &br#"{}"#[..],
            br#"{ "confirmation_window": 123 }"#,
            br#"{ "confirmation_window": 123, "activation_threshold": 45 }"#,
            br#"{ "activation_threshold": 123 }"#,
            br#"{ "deployments": [] }"#,
        ] {
            let result = VersionBitsConfig::from_json(json);
            assert!(matches!(
                result,
                Err(VersionBitsError::InvalidConfiguration(_))
            ));
        }
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("versionbits.json");
        let config = VersionBitsConfig::new(2016, 1916, vec![foo().with_name("Foo")])
            .with_unknown_bits(UnknownBitPolicy::Reject);
        fs::write(&path, serde_json::to_vec(&config).unwrap()).unwrap();

        let loaded = VersionBitsConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
