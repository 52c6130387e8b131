//! Resource limit policy - risk tier to concrete ceilings

use super::risk::RiskTier;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Built-in limits shipped with the binary
pub const DEFAULT_LIMITS_YAML: &str = include_str!("../../config/limits.yml");

/// Ceilings for one risk tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub timeout_sec: u64,
    pub grace_kill_sec: u64,
    #[serde(default)]
    pub cpus: Option<f64>,
    #[serde(default)]
    pub memory_mb: Option<u64>,
    #[serde(default)]
    pub pids: Option<u32>,
    #[serde(default)]
    pub no_network: bool,
    /// Step-level wall-clock ceiling; wins over `timeout_sec`
    #[serde(skip)]
    pub timeout_override: Option<Duration>,
}

impl ResourceLimits {
    pub fn timeout(&self) -> Duration {
        self.timeout_override
            .unwrap_or_else(|| Duration::from_secs(self.timeout_sec))
    }

    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_kill_sec)
    }

    /// Copy with the wall-clock ceiling replaced by a step override
    pub fn with_timeout(&self, timeout: Option<Duration>) -> Self {
        let mut limits = self.clone();
        if let Some(t) = timeout.filter(|t| !t.is_zero()) {
            limits.timeout_override = Some(t);
        }
        limits
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LimitsDocument {
    Nested { limits: HashMap<String, ResourceLimits> },
    Flat(HashMap<String, ResourceLimits>),
}

/// One `ResourceLimits` per tier, read-only after load
#[derive(Debug, Clone, PartialEq)]
pub struct LimitPolicy {
    read_only: ResourceLimits,
    mutating: ResourceLimits,
    dangerous: ResourceLimits,
}

impl LimitPolicy {
    /// Parse a limits document; every tier must be present
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let mut tiers = match serde_yaml::from_str::<LimitsDocument>(content)? {
            LimitsDocument::Nested { limits } => limits,
            LimitsDocument::Flat(map) => map,
        };
        let mut take = |tier: RiskTier| {
            tiers
                .remove(tier.key())
                .ok_or(ConfigError::MissingTier(tier.key()))
        };
        Ok(Self {
            read_only: take(RiskTier::ReadOnly)?,
            mutating: take(RiskTier::Mutating)?,
            dangerous: take(RiskTier::Dangerous)?,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// The built-in policy
    pub fn builtin() -> Result<Self, ConfigError> {
        Self::from_yaml(DEFAULT_LIMITS_YAML)
    }

    pub fn for_risk(&self, risk: RiskTier) -> &ResourceLimits {
        match risk {
            RiskTier::ReadOnly => &self.read_only,
            RiskTier::Mutating => &self.mutating,
            RiskTier::Dangerous => &self.dangerous,
        }
    }
}
