//! Edge configuration: data directory, hub endpoint, retry and lifecycle
//! policy.
//!
//! Precedence per setting: CLI flag, then environment variable, then the
//! optional `config.json` in the data directory, then the built-in default.
//! The file is versioned and strict; an unknown key is a config error, not a
//! silent ignore.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::lifecycle::ReactivationPolicy;
use crate::orchestrator::RetryPolicy;

pub const CONFIG_SCHEMA_VERSION: u32 = 1;
pub const CONFIG_FILE_NAME: &str = "config.json";

pub const DEFAULT_HUB_URL: &str = "http://localhost:8000";
pub const DEFAULT_REMOTE_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MATERIALIZE_EXT: &str = "py";

pub const ENV_DATA_DIR: &str = "FNSTORE_DATA_DIR";
pub const ENV_HUB_URL: &str = "FNSTORE_HUB_URL";
pub const ENV_LM_COMMAND: &str = "FNSTORE_LM_COMMAND";

/// On-disk shape of `config.json`. Every knob is optional; absent keys fall
/// back to defaults.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hub_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_remote_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_backoff_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reactivation: Option<ReactivationPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub materialize_ext: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lm_command: Option<String>,
}

/// Fully resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct EdgeConfig {
    pub data_dir: PathBuf,
    pub hub_url: String,
    pub remote_timeout: Duration,
    pub retry: RetryPolicy,
    pub reactivation: ReactivationPolicy,
    pub materialize_ext: String,
    /// When set, verification runs in two-phase mode with this command as
    /// the local generator.
    pub lm_command: Option<String>,
}

/// Caller-supplied overrides that outrank both environment and file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub data_dir: Option<PathBuf>,
    pub hub_url: Option<String>,
}

impl EdgeConfig {
    /// Resolve configuration from overrides, process environment, and the
    /// data directory's `config.json`.
    pub fn load(overrides: ConfigOverrides) -> Result<Self> {
        let data_dir = match overrides.data_dir {
            Some(dir) => dir,
            None => match std::env::var_os(ENV_DATA_DIR) {
                Some(dir) => PathBuf::from(dir),
                None => default_data_dir()?,
            },
        };
        let file = read_config_file(&data_dir.join(CONFIG_FILE_NAME))?;
        let env = EnvOverrides::capture();
        resolve(data_dir, file, env, overrides.hub_url)
    }
}

#[derive(Debug, Clone, Default)]
struct EnvOverrides {
    hub_url: Option<String>,
    lm_command: Option<String>,
}

impl EnvOverrides {
    fn capture() -> Self {
        EnvOverrides {
            hub_url: std::env::var(ENV_HUB_URL).ok().filter(|v| !v.is_empty()),
            lm_command: std::env::var(ENV_LM_COMMAND).ok().filter(|v| !v.is_empty()),
        }
    }
}

fn default_data_dir() -> Result<PathBuf> {
    let base = dirs::data_dir().context("no platform data directory available")?;
    Ok(base.join("fnstore"))
}

fn read_config_file(path: &Path) -> Result<Option<ConfigFile>> {
    if !path.is_file() {
        return Ok(None);
    }
    let bytes =
        fs::read(path).with_context(|| format!("read config file {}", path.display()))?;
    let file: ConfigFile = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse config file {}", path.display()))?;
    if file.schema_version != CONFIG_SCHEMA_VERSION {
        bail!(
            "unsupported config schema_version {} in {} (expected {})",
            file.schema_version,
            path.display(),
            CONFIG_SCHEMA_VERSION
        );
    }
    Ok(Some(file))
}

fn resolve(
    data_dir: PathBuf,
    file: Option<ConfigFile>,
    env: EnvOverrides,
    hub_url_override: Option<String>,
) -> Result<EdgeConfig> {
    let file = file.unwrap_or_default();

    let hub_url = hub_url_override
        .or(env.hub_url)
        .or(file.hub_url)
        .unwrap_or_else(|| DEFAULT_HUB_URL.to_string());
    if hub_url.trim().is_empty() {
        bail!("hub_url must be non-empty");
    }

    let timeout_ms = file.remote_timeout_ms.unwrap_or(DEFAULT_REMOTE_TIMEOUT_MS);
    if timeout_ms == 0 {
        bail!("remote_timeout_ms must be greater than zero");
    }

    let defaults = RetryPolicy::default();
    let retry = RetryPolicy {
        max_retries: file.max_remote_retries.unwrap_or(defaults.max_retries),
        backoff: file
            .retry_backoff_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.backoff),
    };

    Ok(EdgeConfig {
        data_dir,
        hub_url,
        remote_timeout: Duration::from_millis(timeout_ms),
        retry,
        reactivation: file.reactivation.unwrap_or_default(),
        materialize_ext: file
            .materialize_ext
            .unwrap_or_else(|| DEFAULT_MATERIALIZE_EXT.to_string()),
        lm_command: env.lm_command.or(file.lm_command),
    })
}
