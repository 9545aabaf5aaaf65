//! Engine configuration, read from a TOML file.
//!
//! Every key is optional; missing keys fall back to the defaults below.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config from {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config from {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Which batch backend runs the map/reduce stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    InProcess,
    External,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "in_process" | "inprocess" | "local" => Ok(BackendKind::InProcess),
            "external" | "process" => Ok(BackendKind::External),
            other => Err(format!("unknown backend '{other}' (expected in_process or external)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Root for per-job intermediate files.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Timeout around export, invocation and import, in milliseconds.
    #[serde(default = "default_timeout")]
    pub job_timeout_ms: u64,

    /// Whole-sequence attempts, each with a fresh job.
    #[serde(default = "default_attempts")]
    pub max_attempts: u32,

    #[serde(default)]
    pub keep_intermediate: bool,

    /// Age after which a pending high-priority case is listed as urgent.
    #[serde(default = "default_urgent_days")]
    pub urgent_after_days: u32,

    #[serde(default)]
    pub backend: BackendKind,

    /// Program id -> argv for the external backend. `{now}` in an argument is
    /// replaced with the evaluation instant.
    #[serde(default)]
    pub programs: BTreeMap<String, Vec<String>>,
}

fn default_work_dir() -> PathBuf {
    std::env::temp_dir().join("casescope-jobs")
}

fn default_timeout() -> u64 {
    30_000
}

fn default_attempts() -> u32 {
    2
}

fn default_urgent_days() -> u32 {
    3
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            job_timeout_ms: default_timeout(),
            max_attempts: default_attempts(),
            keep_intermediate: false,
            urgent_after_days: default_urgent_days(),
            backend: BackendKind::default(),
            programs: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.display().to_string(), source })?;
        let cfg: Self = toml::from_str(&content)
            .map_err(|source| ConfigError::Parse { path: path.display().to_string(), source })?;
        cfg.validate()?;
        tracing::debug!(path = %path.display(), backend = ?cfg.backend, "loaded engine config");
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".into()));
        }
        if self.job_timeout_ms == 0 {
            return Err(ConfigError::Invalid("job_timeout_ms must be positive".into()));
        }
        if let Some((id, _)) = self.programs.iter().find(|(_, argv)| argv.is_empty()) {
            return Err(ConfigError::Invalid(format!("program '{id}' has an empty command line")));
        }
        Ok(())
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_millis(self.job_timeout_ms)
    }
}
