//! Application state management

use anyhow::Result;
use arbio_tracking::{AnimationGate, AssetLoader, AssetRegistry, ReadinessCoordinator};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{error, info};

use crate::asset_fetch::HttpAssetLoader;
use crate::config::Config;
use crate::manifest_fetch::ManifestFetcher;

/// Shared application state
pub struct AppState {
    /// Manifest fetcher with offline cache
    pub fetcher: Arc<ManifestFetcher>,
    /// Loads started from the manifest
    pub registry: Arc<AssetRegistry>,
    /// Placement decisions for recognized images
    pub coordinator: Arc<ReadinessCoordinator>,
    /// Configuration
    pub config: Config,
    /// Start of the last manifest fetch attempt
    last_attempt: Mutex<Option<Instant>>,
}

impl AppState {
    /// Create new application state
    pub fn new(config: Config) -> Result<Arc<Self>> {
        let fetcher = Arc::new(ManifestFetcher::new(
            &config.manifest.url,
            config.manifest.timeout(),
            config.manifest.cache_dir.clone(),
        )?);

        let loader: Arc<dyn AssetLoader> = Arc::new(HttpAssetLoader::new(
            config.loader.base_dir.clone(),
            config.loader.timeout(),
        )?);
        Ok(Self::with_loader(config, fetcher, loader))
    }

    /// State using a specific asset loader
    pub fn with_loader(
        config: Config,
        fetcher: Arc<ManifestFetcher>,
        loader: Arc<dyn AssetLoader>,
    ) -> Arc<Self> {
        let registry = Arc::new(AssetRegistry::new(loader));
        let coordinator = ReadinessCoordinator::new(
            registry.clone(),
            AnimationGate::new(config.animation.policy),
        );

        Arc::new(Self {
            fetcher,
            registry,
            coordinator,
            config,
            last_attempt: Mutex::new(None),
        })
    }

    /// Fetch the manifest and start its loads, unless already populated.
    ///
    /// Returns `true` once the registry is populated.
    pub async fn load_manifest(&self) -> bool {
        *self.last_attempt.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());

        match self.registry.ensure_loaded_from(self.fetcher.as_ref()).await {
            Ok(fresh) => {
                if fresh {
                    info!(
                        entities = self.registry.entity_ids().len(),
                        loads = self.registry.handle_count(),
                        "Asset loads started"
                    );
                }
                true
            }
            Err(e) => {
                error!(url = %self.fetcher.url(), error = %e, "Manifest fetch failed");
                false
            }
        }
    }

    /// Start a background manifest fetch if the registry is still empty and
    /// the retry interval has passed since the last attempt
    pub fn retry_manifest(self: &Arc<Self>) {
        if self.registry.is_populated() {
            return;
        }

        {
            let mut last = self.last_attempt.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(at) = *last {
                if at.elapsed() < self.config.manifest.retry_interval() {
                    return;
                }
            }
            *last = Some(Instant::now());
        }

        let state = self.clone();
        tokio::spawn(async move {
            state.load_manifest().await;
        });
    }
}
