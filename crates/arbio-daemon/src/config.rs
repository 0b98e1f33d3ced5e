//! Configuration loading

use anyhow::Result;
use arbio_tracking::GatePolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub manifest: ManifestConfig,
    #[serde(default)]
    pub loader: LoaderConfig,
    #[serde(default)]
    pub animation: AnimationConfig,
    #[serde(default)]
    pub host: HostConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestConfig {
    /// Manifest location: http(s) URL, file:// URL, or local path
    #[serde(default = "default_manifest_url")]
    pub url: String,
    /// HTTP timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Directory for the offline manifest cache (disabled when unset)
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    /// Minimum delay between fetch attempts after a failure
    #[serde(default = "default_retry")]
    pub retry_secs: u64,
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            url: default_manifest_url(),
            timeout_secs: default_timeout(),
            cache_dir: None,
            retry_secs: default_retry(),
        }
    }
}

fn default_manifest_url() -> String {
    "./manifest.json".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_retry() -> u64 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Directory relative asset paths resolve against
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
    /// HTTP timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_base_dir() -> PathBuf {
    PathBuf::from(".")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnimationConfig {
    /// `once_per_process` or `restart_when_idle`
    #[serde(default)]
    pub policy: GatePolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// How long to keep forwarding events for waiting entities after input ends
    #[serde(default = "default_drain")]
    pub drain_secs: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            drain_secs: default_drain(),
        }
    }
}

fn default_drain() -> u64 {
    10
}

impl ManifestConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_secs)
    }
}

impl LoaderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl HostConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_secs)
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

/// Save default configuration to file
pub fn save_default_config(path: &Path) -> Result<()> {
    let config = Config {
        manifest: ManifestConfig {
            url: "https://example.com/arbio/manifest.json".to_string(),
            cache_dir: Some(PathBuf::from("./cache")),
            ..ManifestConfig::default()
        },
        loader: LoaderConfig::default(),
        animation: AnimationConfig::default(),
        host: HostConfig::default(),
    };

    let content = toml::to_string_pretty(&config)?;
    std::fs::write(path, content)?;
    Ok(())
}
