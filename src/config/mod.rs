//! Configuration module for scree.

use crate::error::{Result, ScreeError};
use crate::types::TargetId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for a scree target.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScreeConfig {
    /// Node configuration.
    pub node: NodeConfig,
    /// Rebalance tuning.
    pub rebalance: RebalanceConfig,
    /// Control-plane and data-plane timeouts.
    pub timeout: TimeoutConfig,
    /// Observability configuration.
    pub observability: ObservabilityConfig,
}

impl ScreeConfig {
    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ScreeError::InvalidConfig {
            field: "file".to_string(),
            reason: format!("failed to read {}: {}", path.display(), e),
        })?;

        let config: Self = serde_json::from_str(&content).map_err(|e| ScreeError::InvalidConfig {
            field: "file".to_string(),
            reason: format!("failed to parse: {}", e),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.node.id.as_str().is_empty() {
            return Err(ScreeError::InvalidConfig {
                field: "node.id".to_string(),
                reason: "target id must be non-empty".to_string(),
            });
        }
        if self.rebalance.multiplier == 0 || self.rebalance.multiplier > 8 {
            return Err(ScreeError::InvalidConfig {
                field: "rebalance.multiplier".to_string(),
                reason: format!("must be in [1,8], got {}", self.rebalance.multiplier),
            });
        }
        if self.timeout.cplane_operation.is_zero() {
            return Err(ScreeError::InvalidConfig {
                field: "timeout.cplane_operation".to_string(),
                reason: "must be non-zero".to_string(),
            });
        }
        Ok(())
    }

    /// Create a minimal development configuration.
    pub fn development(id: impl Into<String>, conf_dir: impl Into<PathBuf>) -> Self {
        Self {
            node: NodeConfig {
                id: TargetId(id.into()),
                name: "dev-target".to_string(),
                conf_dir: conf_dir.into(),
            },
            rebalance: RebalanceConfig {
                multiplier: 1,
                compression: Compression::None,
                dest_retry_time: Duration::from_millis(250),
                quiet_rounds: 3,
            },
            timeout: TimeoutConfig {
                cplane_operation: Duration::from_millis(25),
                send_file: Duration::from_secs(3),
            },
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Node-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Stable daemon identifier of this target.
    pub id: TargetId,
    /// Human-readable node name.
    pub name: String,
    /// Directory holding node-local control files (the in-progress marker).
    pub conf_dir: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: TargetId("t1".to_string()),
            name: "scree-target".to_string(),
            conf_dir: PathBuf::from("/var/lib/scree"),
        }
    }
}

/// Stream compression policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    /// Never compress.
    None,
    /// Always compress object streams.
    Always,
}

/// Rebalance tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceConfig {
    /// Concurrent sends per jogger, in [1,8].
    pub multiplier: u8,
    /// Object stream compression.
    pub compression: Compression,
    /// Base budget for waiting on destination acknowledgements.
    #[serde(with = "humantime_serde")]
    pub dest_retry_time: Duration,
    /// Consecutive quiet control-plane intervals required before closing streams.
    pub quiet_rounds: u32,
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            multiplier: 1,
            compression: Compression::None,
            dest_retry_time: Duration::from_secs(120),
            quiet_rounds: 10,
        }
    }
}

/// Timeouts used by the rebalance control loops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// One control-plane operation (also the polling step everywhere).
    #[serde(with = "humantime_serde")]
    pub cplane_operation: Duration,
    /// Budget for sending one file.
    #[serde(with = "humantime_serde")]
    pub send_file: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            cplane_operation: Duration::from_secs(2),
            send_file: Duration::from_secs(300),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level filter (e.g. "info", "scree=debug").
    pub log_level: String,
    /// Emit JSON-formatted logs.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}
