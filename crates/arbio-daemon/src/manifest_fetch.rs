//! Manifest fetching with an offline cache fallback
//!
//! The manifest is read from an http(s) URL, a `file://` URL, or a plain local
//! path. Every well-formed body is stored in the [`ManifestCache`]; when the
//! source cannot be reached the last good body for the same URL is used.

use anyhow::{Context, Result};
use arbio_core::{Manifest, ManifestCache, ManifestError};
use arbio_tracking::ManifestSource;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Manifest fetcher with optional caching
pub struct ManifestFetcher {
    /// HTTP client
    client: reqwest::Client,
    /// Configured manifest location
    url: String,
    /// Offline cache, when a cache directory is configured
    cache: Option<Arc<RwLock<ManifestCache>>>,
}

impl ManifestFetcher {
    pub fn new(url: &str, timeout: Duration, cache_dir: Option<PathBuf>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let cache = match cache_dir {
            Some(dir) => {
                let cache = ManifestCache::new(dir).context("Failed to create manifest cache")?;
                Some(Arc::new(RwLock::new(cache)))
            }
            None => None,
        };

        Ok(Self {
            client,
            url: url.trim().to_string(),
            cache,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetch the configured manifest
    pub async fn fetch(&self) -> Result<Manifest, ManifestError> {
        self.fetch_url(&self.url).await
    }

    /// Fetch and parse the manifest at `url`.
    ///
    /// A malformed body is an error even if a cached copy exists; only an
    /// unreachable source falls back to the cache.
    pub async fn fetch_url(&self, url: &str) -> Result<Manifest, ManifestError> {
        info!(url = %url, "Fetching manifest");

        let body = match self.read_body(url).await {
            Ok(body) => body,
            Err(reason) => {
                if let Some(body) = self.cached(url).await {
                    warn!(url = %url, error = %reason, "Manifest unreachable, using cached copy (offline)");
                    return Manifest::parse(&body);
                }
                warn!(url = %url, error = %reason, "Manifest unreachable and not cached");
                return Err(ManifestError::Unavailable(reason));
            }
        };

        let manifest = Manifest::parse(&body)?;
        info!(
            url = %url,
            entities = manifest.entity_ids().count(),
            assets = manifest.asset_count(),
            rejected = manifest.rejected.len(),
            "Manifest loaded"
        );

        self.store(url, &body).await;
        Ok(manifest)
    }

    async fn read_body(&self, url: &str) -> Result<String, String> {
        if url.starts_with("http://") || url.starts_with("https://") {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| e.to_string())?;

            if !response.status().is_success() {
                return Err(format!("HTTP {}", response.status()));
            }

            response.text().await.map_err(|e| e.to_string())
        } else {
            let path = url.strip_prefix("file://").unwrap_or(url);
            tokio::fs::read_to_string(path)
                .await
                .map_err(|e| format!("{}: {}", path, e))
        }
    }

    async fn cached(&self, url: &str) -> Option<String> {
        let cache = self.cache.as_ref()?.read().await;
        if !cache.has_url(url) {
            debug!(url = %url, "No cached manifest");
            return None;
        }
        match cache.read(url) {
            Ok(body) => Some(body),
            Err(e) => {
                warn!(url = %url, error = %e, "Failed to read cached manifest");
                None
            }
        }
    }

    async fn store(&self, url: &str, body: &str) {
        let Some(cache) = &self.cache else {
            return;
        };
        let mut cache = cache.write().await;
        match cache.store(url, body.as_bytes()) {
            Ok(path) => debug!(url = %url, path = %path.display(), "Cached manifest"),
            Err(e) => warn!(error = %e, "Failed to cache manifest"),
        }
    }
}

impl ManifestSource for ManifestFetcher {
    fn fetch_manifest(&self) -> BoxFuture<'_, Result<Manifest, ManifestError>> {
        self.fetch().boxed()
    }
}
