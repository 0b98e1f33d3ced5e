//! Asset manifest parsing
//!
//! The manifest maps recognized-image ids to the assets placed on them:
//!
//! ```json
//! { "assets": { "lobby": { "bird": { "url": "macaw.sfb", "scale": 0.5 } } } }
//! ```
//!
//! Parsing is strict about the top-level shape and lenient per asset: an asset
//! entry with a missing `url` or a wrongly typed field is dropped and recorded
//! in [`Manifest::rejected`], while its siblings are kept.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::warn;

use crate::descriptor::{AssetDescriptor, AssetKind};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ManifestError {
    #[error("Manifest unavailable: {0}")]
    Unavailable(String),
    #[error("Manifest malformed: {0}")]
    Malformed(String),
}

/// Asset entry dropped during parsing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedAsset {
    pub entity_id: String,
    /// `None` when the whole entity entry was unusable
    pub asset_key: Option<String>,
    pub reason: String,
}

/// Parsed manifest: entity id -> asset key -> descriptor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    entities: BTreeMap<String, BTreeMap<String, AssetDescriptor>>,
    /// Entries dropped during parsing
    pub rejected: Vec<RejectedAsset>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a manifest document
    pub fn parse(content: &str) -> Result<Self, ManifestError> {
        let root: Value = serde_json::from_str(content)
            .map_err(|e| ManifestError::Malformed(format!("invalid JSON: {}", e)))?;
        Self::from_value(&root)
    }

    /// Build a manifest from an already-decoded JSON document
    pub fn from_value(root: &Value) -> Result<Self, ManifestError> {
        let root = root
            .as_object()
            .ok_or_else(|| ManifestError::Malformed("document is not an object".into()))?;
        let assets = root
            .get("assets")
            .ok_or_else(|| ManifestError::Malformed("missing top-level \"assets\"".into()))?
            .as_object()
            .ok_or_else(|| ManifestError::Malformed("\"assets\" is not an object".into()))?;

        let mut manifest = Manifest::new();

        for (entity_id, entry) in assets {
            let Some(entry) = entry.as_object() else {
                manifest.reject(entity_id, None, "entity entry is not an object");
                continue;
            };

            let mut descriptors = BTreeMap::new();
            for (asset_key, asset) in entry {
                match parse_asset(asset) {
                    Ok(descriptor) => {
                        descriptors.insert(asset_key.clone(), descriptor);
                    }
                    Err(reason) => manifest.reject(entity_id, Some(asset_key), &reason),
                }
            }

            if descriptors.is_empty() {
                manifest.reject(entity_id, None, "entity has no usable assets");
                continue;
            }
            manifest.entities.insert(entity_id.clone(), descriptors);
        }

        Ok(manifest)
    }

    fn reject(&mut self, entity_id: &str, asset_key: Option<&String>, reason: &str) {
        warn!(
            entity = %entity_id,
            asset = ?asset_key,
            reason = %reason,
            "Rejected manifest entry"
        );
        self.rejected.push(RejectedAsset {
            entity_id: entity_id.to_string(),
            asset_key: asset_key.cloned(),
            reason: reason.to_string(),
        });
    }

    /// Add or replace a descriptor
    pub fn insert(&mut self, entity_id: &str, asset_key: &str, descriptor: AssetDescriptor) {
        self.entities
            .entry(entity_id.to_string())
            .or_default()
            .insert(asset_key.to_string(), descriptor);
    }

    /// Assets required by an entity
    pub fn entity(&self, entity_id: &str) -> Option<&BTreeMap<String, AssetDescriptor>> {
        self.entities.get(entity_id)
    }

    pub fn entity_ids(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(|k| k.as_str())
    }

    /// Iterate `(entity_id, asset_key, descriptor)` over every asset
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &AssetDescriptor)> {
        self.entities.iter().flat_map(|(entity, assets)| {
            assets
                .iter()
                .map(move |(key, desc)| (entity.as_str(), key.as_str(), desc))
        })
    }

    pub fn asset_count(&self) -> usize {
        self.entities.values().map(|a| a.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

fn parse_asset(value: &Value) -> Result<AssetDescriptor, String> {
    let obj = value.as_object().ok_or("asset entry is not an object")?;

    let url = obj
        .get("url")
        .ok_or("missing \"url\"")?
        .as_str()
        .ok_or("\"url\" is not a string")?;
    if url.trim().is_empty() {
        return Err("\"url\" is empty".into());
    }

    let mut descriptor = AssetDescriptor::new(url);

    if let Some(scale) = obj.get("scale") {
        descriptor.scale = scale.as_f64().ok_or("\"scale\" is not a number")? as f32;
    }
    if obj.contains_key("position") {
        descriptor.position = number_array(obj, "position")?;
    }
    if obj.contains_key("rotation") {
        descriptor.rotation = number_array(obj, "rotation")?;
    }
    if let Some(kind) = obj.get("kind") {
        let name = kind.as_str().ok_or("\"kind\" is not a string")?;
        descriptor.kind =
            AssetKind::parse(name).ok_or_else(|| format!("unknown kind \"{}\"", name))?;
    }

    Ok(descriptor)
}

fn number_array<const N: usize>(obj: &Map<String, Value>, field: &str) -> Result<[f32; N], String> {
    let items = obj
        .get(field)
        .and_then(|v| v.as_array())
        .ok_or_else(|| format!("\"{}\" is not an array", field))?;
    if items.len() != N {
        return Err(format!(
            "\"{}\" has {} elements, expected {}",
            field,
            items.len(),
            N
        ));
    }

    let mut out = [0.0f32; N];
    for (slot, item) in out.iter_mut().zip(items) {
        *slot = item
            .as_f64()
            .ok_or_else(|| format!("\"{}\" contains a non-number", field))? as f32;
    }
    Ok(out)
}
