//! On-disk manifest cache with SHA-based deduplication
//!
//! Successfully fetched manifest bodies are stored by their SHA256 hash so the
//! last good manifest for a URL can be used when the network is unavailable.
//!
//! Layout:
//! - `{base_dir}/index.json` maps source URLs to cached entries
//! - `{base_dir}/{sha}.json` holds each distinct manifest body once

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("URL not in cache: {0}")]
    NotCached(String),
}

/// Index entry for one cached manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedManifest {
    /// URL the body was fetched from
    pub url: String,
    /// SHA256 of the body
    pub sha: String,
    /// File path relative to the cache directory
    pub path: String,
    /// When this was fetched (RFC 3339)
    pub fetched_at: String,
}

/// Cache index persisted as `index.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheIndex {
    #[serde(default = "default_version")]
    pub version: String,
    /// Entries keyed by source URL
    pub manifests: HashMap<String, CachedManifest>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl CacheIndex {
    pub fn new() -> Self {
        Self {
            version: default_version(),
            manifests: HashMap::new(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, CacheError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn load_or_create(path: &Path) -> Result<Self, CacheError> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::new())
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), CacheError> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn get(&self, url: &str) -> Option<&CachedManifest> {
        self.manifests.get(url)
    }
}

/// Manifest cache directory manager
#[derive(Debug, Clone)]
pub struct ManifestCache {
    pub base_dir: PathBuf,
    pub index_path: PathBuf,
    pub index: CacheIndex,
}

impl ManifestCache {
    /// Open (or create) a cache rooted at `base_dir`
    pub fn new(base_dir: PathBuf) -> Result<Self, CacheError> {
        std::fs::create_dir_all(&base_dir)?;

        let index_path = base_dir.join("index.json");
        let index = CacheIndex::load_or_create(&index_path)?;

        Ok(Self {
            base_dir,
            index_path,
            index,
        })
    }

    pub fn body_path(&self, sha: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", sha))
    }

    /// Whether a body with this SHA is on disk
    pub fn has_sha(&self, sha: &str) -> bool {
        self.body_path(sha).exists()
    }

    /// Whether a body for this URL is indexed and present
    pub fn has_url(&self, url: &str) -> bool {
        self.index
            .get(url)
            .map(|e| self.base_dir.join(&e.path).exists())
            .unwrap_or(false)
    }

    /// Store a manifest body for `url`, returning the body path.
    ///
    /// Identical bodies fetched from different URLs share one file.
    pub fn store(&mut self, url: &str, content: &[u8]) -> Result<PathBuf, CacheError> {
        let sha = sha256_hex(content);
        let path = self.body_path(&sha);
        if !self.has_sha(&sha) {
            std::fs::write(&path, content)?;
        }

        self.index.manifests.insert(
            url.to_string(),
            CachedManifest {
                url: url.to_string(),
                sha: sha.clone(),
                path: format!("{}.json", sha),
                fetched_at: chrono::Utc::now().to_rfc3339(),
            },
        );
        self.index.save(&self.index_path)?;

        Ok(path)
    }

    /// Read the cached body last stored for `url`
    pub fn read(&self, url: &str) -> Result<String, CacheError> {
        let entry = self
            .index
            .get(url)
            .ok_or_else(|| CacheError::NotCached(url.to_string()))?;
        Ok(std::fs::read_to_string(self.base_dir.join(&entry.path))?)
    }
}

/// Compute SHA256 hash of data and return as hex string
pub fn sha256_hex(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
