//! Asset loading over HTTP and the local filesystem
//!
//! Binary renderables are accepted as opaque payloads with a single clip.
//! Everything else is decoded as glTF (JSON or binary container) and reports
//! the number of animations it carries.

use anyhow::{Context, Result};
use arbio_core::{AssetDescriptor, LoadPath, SourceLocation};
use arbio_tracking::{AssetLoader, LoadError, LoadedAsset};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Clip count reported for binary renderables, which always carry one
/// animation track when they are animated at all
pub const BINARY_CLIP_COUNT: usize = 1;

/// Loads assets from http(s) URLs, `file://` URLs, or paths under a base directory
pub struct HttpAssetLoader {
    client: reqwest::Client,
    base_dir: PathBuf,
}

impl HttpAssetLoader {
    pub fn new(base_dir: PathBuf, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, base_dir })
    }
}

impl AssetLoader for HttpAssetLoader {
    fn fetch(&self, descriptor: &AssetDescriptor) -> BoxFuture<'static, Result<LoadedAsset, LoadError>> {
        let client = self.client.clone();
        let base_dir = self.base_dir.clone();
        let location = descriptor.source.clone();

        async move {
            let bytes = read_source(&client, &base_dir, &location)
                .await
                .map_err(|reason| LoadError::Fetch {
                    location: location.key.clone(),
                    reason,
                })?;
            decode(&location, &bytes)
        }
        .boxed()
    }
}

async fn read_source(
    client: &reqwest::Client,
    base_dir: &Path,
    location: &SourceLocation,
) -> Result<Vec<u8>, String> {
    if location.is_remote() {
        debug!(url = %location.raw, "Fetching remote asset");
        let response = client
            .get(&location.raw)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status()));
        }

        let bytes = response.bytes().await.map_err(|e| e.to_string())?;
        Ok(bytes.to_vec())
    } else {
        let path = local_path(base_dir, &location.key);
        debug!(path = %path.display(), "Reading local asset");
        tokio::fs::read(&path)
            .await
            .map_err(|e| format!("{}: {}", path.display(), e))
    }
}

fn local_path(base_dir: &Path, key: &str) -> PathBuf {
    if let Some(path) = key.strip_prefix("file://") {
        return PathBuf::from(path);
    }
    let path = Path::new(key);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

fn decode(location: &SourceLocation, bytes: &[u8]) -> Result<LoadedAsset, LoadError> {
    if bytes.is_empty() {
        return Err(LoadError::Decode {
            location: location.key.clone(),
            reason: "empty payload".into(),
        });
    }

    let clip_count = match location.load_path() {
        LoadPath::Binary => BINARY_CLIP_COUNT,
        LoadPath::Interchange => {
            let gltf = gltf::Gltf::from_slice(bytes).map_err(|e| LoadError::Decode {
                location: location.key.clone(),
                reason: e.to_string(),
            })?;
            gltf.animations().count()
        }
    };

    Ok(LoadedAsset::new(location, clip_count, bytes.len()))
}
