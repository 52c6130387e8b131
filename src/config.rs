//! Execution configuration - built once, shared read-only by the dispatchers
//!
//! `ExecConfig::from_env` is the only place the process environment is
//! consulted; everything downstream receives the resolved values.

use crate::core::workflow::expand_tilde;
use crate::error::ConfigError;
use crate::exec::LimitPolicy;
use anyhow::Result;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_SANDBOX_IMAGE: &str = "ghostflow-sandbox:latest";
pub const DEFAULT_HOST_KEY_CHECKING: &str = "accept-new";
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Immutable execution settings
#[derive(Debug, Clone)]
pub struct ExecConfig {
    pub limits: LimitPolicy,
    pub hosts: HostProfiles,
    pub sandbox_image: String,
    /// `set -x` in host scripts
    pub debug_script: bool,
    /// Scripts and stdout/stderr artifacts land here
    pub artifacts_dir: PathBuf,
}

impl ExecConfig {
    /// Defaults around an explicit limit policy
    pub fn new(limits: LimitPolicy) -> Self {
        Self {
            limits,
            hosts: HostProfiles::default(),
            sandbox_image: DEFAULT_SANDBOX_IMAGE.to_string(),
            debug_script: false,
            artifacts_dir: std::env::temp_dir().join("ghostflow"),
        }
    }

    /// Read GHOSTFLOW_* variables and the user config
    pub fn from_env() -> Result<Self> {
        let limits = match std::env::var_os("GHOSTFLOW_LIMITS") {
            Some(path) => LimitPolicy::from_file(Path::new(&path))?,
            None => LimitPolicy::builtin()?,
        };

        let config_path = std::env::var_os("GHOSTFLOW_CONFIG")
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|h| h.join(".ghostflow").join("config.yml")));
        let default_user = std::env::var("USER").unwrap_or_default();
        let hosts = match config_path {
            Some(path) => HostProfiles::load(&path, default_user),
            None => HostProfiles::empty(default_user),
        };

        let mut config = Self::new(limits)
            .with_hosts(hosts)
            .with_debug_script(std::env::var("GHOSTFLOW_DEBUG_SCRIPT").as_deref() == Ok("1"));
        if let Ok(image) = std::env::var("GHOSTFLOW_SANDBOX_IMAGE") {
            if !image.trim().is_empty() {
                config = config.with_sandbox_image(image);
            }
        }
        if let Some(dir) = std::env::var_os("GHOSTFLOW_ARTIFACTS") {
            config = config.with_artifacts_dir(dir);
        }
        Ok(config)
    }

    pub fn with_hosts(mut self, hosts: HostProfiles) -> Self {
        self.hosts = hosts;
        self
    }

    pub fn with_artifacts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifacts_dir = dir.into();
        self
    }

    pub fn with_sandbox_image(mut self, image: impl Into<String>) -> Self {
        self.sandbox_image = image.into();
        self
    }

    pub fn with_debug_script(mut self, enabled: bool) -> Self {
        self.debug_script = enabled;
        self
    }
}

/// One `ssh:` entry as written by the user
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct HostProfile {
    pub host: Option<String>,
    pub user: Option<String>,
    pub port: Option<u16>,
    pub identity_file: Option<String>,
    pub strict_host_key_checking: Option<String>,
}

/// A profile with defaults applied, ready for the remote backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedHost {
    pub alias: String,
    pub host: String,
    pub user: String,
    pub port: u16,
    pub identity_file: Option<PathBuf>,
    pub strict_host_key_checking: String,
}

impl ResolvedHost {
    pub fn destination(&self) -> String {
        if self.user.is_empty() {
            self.host.clone()
        } else {
            format!("{}@{}", self.user, self.host)
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct UserConfig {
    #[serde(default)]
    ssh: BTreeMap<String, serde_yaml::Value>,
}

/// Remote host aliases from `~/.ghostflow/config.yml`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostProfiles {
    profiles: BTreeMap<String, HostProfile>,
    default_user: String,
}

impl HostProfiles {
    pub fn empty(default_user: impl Into<String>) -> Self {
        Self {
            profiles: BTreeMap::new(),
            default_user: default_user.into(),
        }
    }

    /// Parse the user config; malformed entries are dropped
    pub fn from_yaml(content: &str, default_user: impl Into<String>) -> Result<Self, ConfigError> {
        let doc: Option<UserConfig> = serde_yaml::from_str(content)?;
        let mut profiles = BTreeMap::new();
        for (alias, entry) in doc.unwrap_or_default().ssh {
            match serde_yaml::from_value::<HostProfile>(entry) {
                Ok(profile) => {
                    profiles.insert(alias, profile);
                }
                Err(e) => log::warn!("ignoring ssh profile '{}': {}", alias, e),
            }
        }
        Ok(Self {
            profiles,
            default_user: default_user.into(),
        })
    }

    /// Lenient load: a missing or unreadable config is an empty profile set
    pub fn load(path: &Path, default_user: impl Into<String>) -> Self {
        let default_user = default_user.into();
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("cannot read user config {}: {}", path.display(), e);
                }
                return Self::empty(default_user);
            }
        };
        Self::from_yaml(&content, default_user.clone()).unwrap_or_else(|e| {
            log::warn!("ignoring user config {}: {}", path.display(), e);
            Self::empty(default_user)
        })
    }

    pub fn insert(&mut self, alias: impl Into<String>, profile: HostProfile) {
        self.profiles.insert(alias.into(), profile);
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    /// Look up an alias and apply defaults
    pub fn resolve(&self, alias: &str) -> Result<ResolvedHost, ConfigError> {
        let profile = self
            .profiles
            .get(alias)
            .ok_or_else(|| ConfigError::UnknownHostAlias(alias.to_string()))?;
        let host = profile
            .host
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ConfigError::MissingHost(alias.to_string()))?;

        Ok(ResolvedHost {
            alias: alias.to_string(),
            host: host.to_string(),
            user: profile
                .user
                .clone()
                .unwrap_or_else(|| self.default_user.clone()),
            port: profile.port.unwrap_or(DEFAULT_SSH_PORT),
            identity_file: profile
                .identity_file
                .as_deref()
                .map(|p| expand_tilde(Path::new(p))),
            strict_host_key_checking: profile
                .strict_host_key_checking
                .clone()
                .unwrap_or_else(|| DEFAULT_HOST_KEY_CHECKING.to_string()),
        })
    }
}
