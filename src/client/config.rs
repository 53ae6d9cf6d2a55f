//! Orchestrator configuration: profiles, YAML file, and defaults

use super::transport::Backoff;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Profile {
    /// Small chunks, connection cross-validation, inter-chunk delay
    #[default]
    Safe,
    /// Large chunks, no cross-validation, no delay
    Fast,
}

/// How a run is chunked, submitted and recovered.
///
/// Durations are stored as milliseconds so the YAML stays flat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct OrchestratorConfig {
    pub profile: Profile,
    pub chunk_size: usize,
    pub cross_validate: bool,
    pub inter_chunk_delay_ms: u64,
    /// Wait for each chunk to reach a terminal state
    pub poll: bool,
    pub poll_interval_ms: u64,
    pub poll_timeout_ms: u64,
    pub skip_existing: bool,
    pub continue_on_error: bool,
    /// Proceed when declared idFiles are missing or malformed
    pub allow_incomplete_id_files: bool,
    /// Bind unresolved tokens by exact concept name
    pub resolve_names: bool,
    /// Where to write the final tempId map
    #[serde(skip_serializing_if = "Option::is_none")]
    pub save_ids: Option<PathBuf>,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub backoff_retries: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::for_profile(Profile::Safe)
    }
}

impl OrchestratorConfig {
    pub fn for_profile(profile: Profile) -> Self {
        let backoff = Backoff::default();
        let base = Self {
            profile,
            chunk_size: 20,
            cross_validate: true,
            inter_chunk_delay_ms: 100,
            poll: true,
            poll_interval_ms: 100,
            poll_timeout_ms: 60_000,
            skip_existing: false,
            continue_on_error: false,
            allow_incomplete_id_files: false,
            resolve_names: false,
            save_ids: None,
            backoff_base_ms: backoff.base.as_millis() as u64,
            backoff_cap_ms: backoff.cap.as_millis() as u64,
            backoff_retries: backoff.max_retries,
        };
        match profile {
            Profile::Safe => base,
            Profile::Fast => Self {
                chunk_size: 100,
                cross_validate: false,
                inter_chunk_delay_ms: 0,
                ..base
            },
        }
    }

    /// Switch profile, resetting only the settings a profile decides
    pub fn with_profile(self, profile: Profile) -> Self {
        let defaults = Self::for_profile(profile);
        Self {
            profile,
            chunk_size: defaults.chunk_size,
            cross_validate: defaults.cross_validate,
            inter_chunk_delay_ms: defaults.inter_chunk_delay_ms,
            ..self
        }
    }

    /// Read a YAML config file
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Keys override the defaults of the file's `profile` (safe if absent)
    pub fn from_yaml_str(text: &str) -> Result<Self, serde_yaml::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let overrides = match serde_yaml::from_str::<Value>(text)? {
            Value::Mapping(m) => m,
            Value::Null => Mapping::new(),
            other => return serde_yaml::from_value(other),
        };
        let profile = match overrides.get("profile") {
            Some(p) => serde_yaml::from_value(p.clone())?,
            None => Profile::Safe,
        };
        let mut merged = match serde_yaml::to_value(Self::for_profile(profile))? {
            Value::Mapping(m) => m,
            _ => Mapping::new(),
        };
        for (key, value) in overrides {
            merged.insert(key, value);
        }
        serde_yaml::from_value(Value::Mapping(merged))
    }

    /// `<config dir>/archbatch/config.yaml`, if the platform has a config dir
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("archbatch").join("config.yaml"))
    }

    pub fn inter_chunk_delay(&self) -> Duration {
        Duration::from_millis(self.inter_chunk_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            base: Duration::from_millis(self.backoff_base_ms),
            cap: Duration::from_millis(self.backoff_cap_ms),
            max_retries: self.backoff_retries,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}
