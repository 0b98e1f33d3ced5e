//! Asset registry: the manifest's assets and their shared load handles
//!
//! The registry is populated once. Population starts exactly one load per
//! distinct normalized source, so descriptors that point at the same file
//! (within or across entities) share a single handle.

use arbio_core::{AssetDescriptor, Manifest, ManifestError};
use futures_util::future::BoxFuture;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, OnceCell};
use tracing::info;

use crate::handle::{LoadError, LoadHandle, LoadState, LoadedAsset};
use crate::loader::{spawn_load, AssetLoader};

/// Anything that can produce the asset manifest
pub trait ManifestSource: Send + Sync {
    fn fetch_manifest(&self) -> BoxFuture<'_, Result<Manifest, ManifestError>>;
}

/// Entity-level readiness failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReadinessError {
    #[error("Entity {entity_id} cannot be placed: {} asset(s) failed to load", .failures.len())]
    PartialFailure {
        entity_id: String,
        failures: Vec<AssetFailure>,
    },
    #[error("Entity {0} is not in the manifest")]
    EntityNotInManifest(String),
}

/// One failed asset of an entity
#[derive(Debug, Clone, PartialEq)]
pub struct AssetFailure {
    pub asset_key: String,
    pub error: LoadError,
}

/// One ready asset of an entity
#[derive(Debug, Clone)]
pub struct ReadyAsset {
    pub asset_key: String,
    pub descriptor: AssetDescriptor,
    pub asset: Arc<LoadedAsset>,
}

/// Readiness of an entity's required assets
#[derive(Debug, Clone)]
pub enum Readiness {
    /// The manifest has not been loaded yet
    Unpopulated,
    NotInManifest,
    /// Handles still loading
    Pending(Vec<LoadHandle>),
    /// At least one asset failed; takes precedence over pending ones
    Failed(Vec<AssetFailure>),
    /// Every asset is ready, in asset-key order
    Ready(Vec<ReadyAsset>),
}

/// Registry entry for one entity asset
#[derive(Debug, Clone)]
pub struct AssetSlot {
    pub descriptor: AssetDescriptor,
    pub handle: LoadHandle,
}

struct Catalog {
    entities: HashMap<String, BTreeMap<String, AssetSlot>>,
    by_source: HashMap<String, LoadHandle>,
}

/// Owns every descriptor and load handle
pub struct AssetRegistry {
    loader: Arc<dyn AssetLoader>,
    catalog: OnceCell<Catalog>,
    populated: watch::Sender<bool>,
}

impl AssetRegistry {
    pub fn new(loader: Arc<dyn AssetLoader>) -> Self {
        let (populated, _) = watch::channel(false);
        Self {
            loader,
            catalog: OnceCell::new(),
            populated,
        }
    }

    /// Populate from `manifest` unless already populated.
    ///
    /// Returns true if this call populated the registry.
    pub async fn ensure_loaded(&self, manifest: Manifest) -> bool {
        let mut fresh = false;
        let flag = &mut fresh;
        self.catalog
            .get_or_init(|| async move {
                *flag = true;
                self.populate(manifest)
            })
            .await;
        if fresh {
            self.populated.send_replace(true);
        }
        fresh
    }

    /// Fetch the manifest from `source` and populate, unless already populated.
    ///
    /// A failed fetch leaves the registry unpopulated so a later call can retry.
    pub async fn ensure_loaded_from<S>(&self, source: &S) -> Result<bool, ManifestError>
    where
        S: ManifestSource + ?Sized,
    {
        let mut fresh = false;
        let flag = &mut fresh;
        self.catalog
            .get_or_try_init(|| async move {
                let manifest = source.fetch_manifest().await?;
                *flag = true;
                Ok::<_, ManifestError>(self.populate(manifest))
            })
            .await?;
        if fresh {
            self.populated.send_replace(true);
        }
        Ok(fresh)
    }

    fn populate(&self, manifest: Manifest) -> Catalog {
        let mut entities: HashMap<String, BTreeMap<String, AssetSlot>> = HashMap::new();
        let mut by_source: HashMap<String, LoadHandle> = HashMap::new();

        for (entity_id, asset_key, descriptor) in manifest.iter() {
            let handle = by_source
                .entry(descriptor.source.key.clone())
                .or_insert_with(|| spawn_load(&self.loader, descriptor))
                .clone();

            entities.entry(entity_id.to_string()).or_default().insert(
                asset_key.to_string(),
                AssetSlot {
                    descriptor: descriptor.clone(),
                    handle,
                },
            );
        }

        info!(
            entities = entities.len(),
            assets = manifest.asset_count(),
            loads = by_source.len(),
            rejected = manifest.rejected.len(),
            "Asset registry populated"
        );

        Catalog {
            entities,
            by_source,
        }
    }

    pub fn is_populated(&self) -> bool {
        self.catalog.initialized()
    }

    /// Resolves once the registry has been populated
    pub async fn wait_populated(&self) {
        let mut rx = self.populated.subscribe();
        let _ = rx.wait_for(|populated| *populated).await;
    }

    /// Handle for one asset of an entity
    pub fn get_handle(&self, entity_id: &str, asset_key: &str) -> Option<LoadHandle> {
        self.catalog
            .get()?
            .entities
            .get(entity_id)?
            .get(asset_key)
            .map(|slot| slot.handle.clone())
    }

    /// Descriptors and handles of an entity, in asset-key order
    pub fn slots(&self, entity_id: &str) -> Option<Vec<(String, AssetSlot)>> {
        let assets = self.catalog.get()?.entities.get(entity_id)?;
        Some(
            assets
                .iter()
                .map(|(key, slot)| (key.clone(), slot.clone()))
                .collect(),
        )
    }

    /// True iff the entity is known and every asset is ready
    pub fn all_ready(&self, entity_id: &str) -> Result<bool, ReadinessError> {
        match self.readiness(entity_id) {
            Readiness::Ready(_) => Ok(true),
            Readiness::Failed(failures) => Err(ReadinessError::PartialFailure {
                entity_id: entity_id.to_string(),
                failures,
            }),
            Readiness::Unpopulated | Readiness::NotInManifest | Readiness::Pending(_) => Ok(false),
        }
    }

    /// Classify an entity's assets by load state
    pub fn readiness(&self, entity_id: &str) -> Readiness {
        let Some(catalog) = self.catalog.get() else {
            return Readiness::Unpopulated;
        };
        let Some(assets) = catalog.entities.get(entity_id) else {
            return Readiness::NotInManifest;
        };

        let mut pending = Vec::new();
        let mut failures = Vec::new();
        let mut ready = Vec::new();

        for (asset_key, slot) in assets {
            match slot.handle.state() {
                LoadState::Pending => pending.push(slot.handle.clone()),
                LoadState::Failed(error) => failures.push(AssetFailure {
                    asset_key: asset_key.clone(),
                    error,
                }),
                LoadState::Ready(asset) => ready.push(ReadyAsset {
                    asset_key: asset_key.clone(),
                    descriptor: slot.descriptor.clone(),
                    asset,
                }),
            }
        }

        if !failures.is_empty() {
            Readiness::Failed(failures)
        } else if !pending.is_empty() {
            Readiness::Pending(pending)
        } else {
            Readiness::Ready(ready)
        }
    }

    /// Known entity ids, sorted
    pub fn entity_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .catalog
            .get()
            .map(|c| c.entities.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Number of distinct loads started
    pub fn handle_count(&self) -> usize {
        self.catalog.get().map(|c| c.by_source.len()).unwrap_or(0)
    }

    /// Every distinct load handle
    pub fn handles(&self) -> Vec<LoadHandle> {
        self.catalog
            .get()
            .map(|c| c.by_source.values().cloned().collect())
            .unwrap_or_default()
    }
}
