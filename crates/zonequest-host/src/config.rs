use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::layout::ScriptLayout;
use crate::supervisor::LockPolicy;

/// Scope names that can never be used as a zone name
pub const RESERVED_SCOPES: &[&str] = &["global", "common"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write config {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Runtime configuration (`zonequest.toml`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestConfig {
    /// Root every relative path below is resolved against
    #[serde(default = "default_workdir")]
    pub workdir: PathBuf,

    /// Directory holding one sub-directory per scope (default: scripts)
    #[serde(default = "default_script_root")]
    pub script_root: PathBuf,

    /// Directory compiled artifacts and lock files are written to (default: out)
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// External compiler executable
    #[serde(default = "default_compiler")]
    pub compiler: PathBuf,

    /// Marker in compiler stdout that signals a failed build
    #[serde(default = "default_failure_marker")]
    pub failure_marker: String,

    /// File extension of compiled artifacts
    #[serde(default = "default_artifact_extension")]
    pub artifact_extension: String,

    /// Extensions of source files that take part in the build key
    #[serde(default = "default_source_extensions")]
    pub source_extensions: Vec<String>,

    /// Extension of the per-scope project descriptor (`{scope}.{ext}`)
    #[serde(default = "default_descriptor_extension")]
    pub descriptor_extension: String,

    /// Whether source changes are polled for and reloaded automatically
    #[serde(default = "default_true")]
    pub hot_reload: bool,

    /// Change poll interval in milliseconds (default: 500ms)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    #[serde(default)]
    pub lock: LockConfig,

    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// Cross-process build lock settings for the global scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockConfig {
    /// Lock file name (without the `.lock` suffix)
    #[serde(default = "default_lock_name")]
    pub name: String,

    /// Delay between acquisition attempts while another process builds
    #[serde(default = "default_lock_poll_interval")]
    pub poll_interval_ms: u64,

    /// Attempts before giving up on the other builder and building locally
    #[serde(default = "default_lock_attempts")]
    pub max_attempts: u32,
}

/// Guest execution settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Fuel granted to each guest call; 0 disables metering
    #[serde(default)]
    pub fuel_per_event: u64,
}

fn default_true() -> bool {
    true
}

fn default_workdir() -> PathBuf {
    PathBuf::from(".")
}

fn default_script_root() -> PathBuf {
    PathBuf::from("scripts")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("out")
}

fn default_compiler() -> PathBuf {
    PathBuf::from("bin/quest-compiler")
}

fn default_failure_marker() -> String {
    "FAILED".to_string()
}

fn default_artifact_extension() -> String {
    "wasm".to_string()
}

fn default_source_extensions() -> Vec<String> {
    vec!["rs".to_string()]
}

fn default_descriptor_extension() -> String {
    "toml".to_string()
}

fn default_poll_interval() -> u64 {
    500
}

fn default_lock_name() -> String {
    "global-reload".to_string()
}

fn default_lock_poll_interval() -> u64 {
    100
}

fn default_lock_attempts() -> u32 {
    300
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            name: default_lock_name(),
            poll_interval_ms: default_lock_poll_interval(),
            max_attempts: default_lock_attempts(),
        }
    }
}

impl Default for QuestConfig {
    fn default() -> Self {
        Self {
            workdir: default_workdir(),
            script_root: default_script_root(),
            output_dir: default_output_dir(),
            compiler: default_compiler(),
            failure_marker: default_failure_marker(),
            artifact_extension: default_artifact_extension(),
            source_extensions: default_source_extensions(),
            descriptor_extension: default_descriptor_extension(),
            hot_reload: true,
            poll_interval_ms: default_poll_interval(),
            lock: LockConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

impl QuestConfig {
    /// Config rooted at `workdir`, everything else defaulted
    pub fn with_workdir(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            ..Default::default()
        }
    }

    /// Default config file location (platform config dir)
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "zonequest")
            .map(|dirs| dirs.config_dir().join("zonequest.toml"))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: QuestConfig = toml::from_str(&content)?;
        config.validate()?;
        info!(target: "quest::config", "Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }

        fs::write(path, self.to_toml()?).map_err(write_err)?;
        info!(target: "quest::config", "Saved config to {}", path.display());
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be > 0".into()));
        }
        if self.lock.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "lock.poll_interval_ms must be > 0".into(),
            ));
        }
        if self.lock.name.is_empty() {
            return Err(ConfigError::Invalid("lock.name must not be empty".into()));
        }
        if self.artifact_extension.is_empty() {
            return Err(ConfigError::Invalid(
                "artifact_extension must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Check that `zone` can be used as a zone scope name
    pub fn validate_zone(zone: &str) -> Result<(), ConfigError> {
        if zone.is_empty() {
            return Err(ConfigError::Invalid("zone name must not be empty".into()));
        }
        if RESERVED_SCOPES.contains(&zone) {
            return Err(ConfigError::Invalid(format!(
                "zone name '{zone}' is reserved"
            )));
        }
        if zone.contains(['/', '\\']) || zone == "." || zone == ".." {
            return Err(ConfigError::Invalid(format!(
                "zone name '{zone}' is not a plain directory name"
            )));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Resolve a configured path against the work directory
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workdir.join(path)
        }
    }

    pub fn compiler_path(&self) -> PathBuf {
        self.resolve(&self.compiler)
    }

    pub fn layout(&self) -> ScriptLayout {
        ScriptLayout {
            script_root: self.resolve(&self.script_root),
            output_dir: self.resolve(&self.output_dir),
            artifact_extension: self.artifact_extension.clone(),
            source_extensions: self.source_extensions.clone(),
            descriptor_extension: self.descriptor_extension.clone(),
        }
    }

    pub fn lock_policy(&self) -> LockPolicy {
        LockPolicy {
            name: self.lock.name.clone(),
            poll_interval: Duration::from_millis(self.lock.poll_interval_ms),
            max_attempts: self.lock.max_attempts,
        }
    }

    pub fn fuel_per_event(&self) -> Option<u64> {
        (self.runtime.fuel_per_event > 0).then_some(self.runtime.fuel_per_event)
    }
}
