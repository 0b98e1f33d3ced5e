//! Asset loading: one spawned task per load, settling a shared handle

use arbio_core::AssetDescriptor;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::handle::{LoadError, LoadHandle, LoadedAsset};

/// Produces loaded assets from descriptors.
///
/// Implementations do the actual fetch/decode work; the returned future runs on
/// its own task, so it must not borrow from `self`.
pub trait AssetLoader: Send + Sync + 'static {
    fn fetch(&self, descriptor: &AssetDescriptor) -> BoxFuture<'static, Result<LoadedAsset, LoadError>>;
}

/// Start loading `descriptor` and return its handle immediately.
///
/// The handle is `Pending` until the spawned task settles it. A panicking
/// loader settles the handle as `Failed` instead of leaving it pending.
pub fn spawn_load(loader: &Arc<dyn AssetLoader>, descriptor: &AssetDescriptor) -> LoadHandle {
    let handle = LoadHandle::pending(descriptor.source.clone());
    let fetch = loader.fetch(descriptor);
    let task_handle = handle.clone();

    debug!(
        source = %descriptor.source,
        file = %descriptor.source.file_name(),
        path = ?descriptor.load_path(),
        "Scheduling asset load"
    );

    tokio::spawn(async move {
        let file = task_handle.location().file_name().to_string();
        let location = task_handle.location().key.clone();
        let result = match AssertUnwindSafe(fetch).catch_unwind().await {
            Ok(result) => result,
            Err(_) => Err(LoadError::Aborted {
                location: location.clone(),
                reason: "loader panicked".into(),
            }),
        };

        match &result {
            Ok(asset) => info!(
                file = %file,
                source = %location,
                renderable = %asset.renderable,
                clips = asset.clip_count,
                bytes = asset.byte_len,
                "Asset loaded"
            ),
            Err(e) => warn!(file = %file, error = %e, "Asset load failed"),
        }

        task_handle.settle(result);
    });

    handle
}

#[cfg(test)]
pub(crate) mod testing {
    //! Loader whose loads complete only when a test says so

    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    type Completion = oneshot::Sender<Result<LoadedAsset, LoadError>>;

    #[derive(Default)]
    pub struct ManualLoader {
        pending: Mutex<HashMap<String, Vec<(AssetDescriptor, Completion)>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ManualLoader {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Source keys fetched so far, in call order
        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        /// Complete every outstanding load of `key` with a ready asset
        pub fn complete(&self, key: &str, clip_count: usize) {
            for (descriptor, tx) in self.take(key) {
                let _ = tx.send(Ok(LoadedAsset::new(&descriptor.source, clip_count, 64)));
            }
        }

        /// Fail every outstanding load of `key`
        pub fn fail(&self, key: &str, reason: &str) {
            for (_, tx) in self.take(key) {
                let _ = tx.send(Err(LoadError::Fetch {
                    location: key.to_string(),
                    reason: reason.to_string(),
                }));
            }
        }

        fn take(&self, key: &str) -> Vec<(AssetDescriptor, Completion)> {
            self.pending.lock().unwrap().remove(key).unwrap_or_default()
        }
    }

    impl AssetLoader for ManualLoader {
        fn fetch(&self, descriptor: &AssetDescriptor) -> BoxFuture<'static, Result<LoadedAsset, LoadError>> {
            let key = descriptor.source.key.clone();
            let (tx, rx) = oneshot::channel();
            self.calls.lock().unwrap().push(key.clone());
            self.pending
                .lock()
                .unwrap()
                .entry(key.clone())
                .or_default()
                .push((descriptor.clone(), tx));

            async move {
                rx.await.unwrap_or_else(|_| {
                    Err(LoadError::Aborted {
                        location: key,
                        reason: "completion dropped".into(),
                    })
                })
            }
            .boxed()
        }
    }

    /// Wrap a manual loader as the trait object the registry expects
    pub fn as_loader(loader: &Arc<ManualLoader>) -> Arc<dyn AssetLoader> {
        loader.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{as_loader, ManualLoader};
    use super::*;
    use crate::handle::LoadState;

    struct PanickingLoader;

    impl AssetLoader for PanickingLoader {
        fn fetch(&self, _descriptor: &AssetDescriptor) -> BoxFuture<'static, Result<LoadedAsset, LoadError>> {
            futures_util::future::lazy(|_| -> Result<LoadedAsset, LoadError> {
                panic!("decoder exploded")
            })
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_load_returns_pending_then_ready() {
        let manual = ManualLoader::new();
        let loader = as_loader(&manual);
        let descriptor = AssetDescriptor::new("https://cdn.example.com/duck.gltf");

        let handle = spawn_load(&loader, &descriptor);
        assert!(handle.is_pending());
        assert_eq!(manual.calls(), vec!["https://cdn.example.com/duck.gltf"]);

        manual.complete("https://cdn.example.com/duck.gltf", 0);
        assert!(matches!(handle.settled().await, LoadState::Ready(_)));
    }

    #[tokio::test]
    async fn test_failure_does_not_block_siblings() {
        let manual = ManualLoader::new();
        let loader = as_loader(&manual);

        let a = spawn_load(&loader, &AssetDescriptor::new("a.glb"));
        let b = spawn_load(&loader, &AssetDescriptor::new("b.glb"));

        manual.fail("a.glb", "404");
        assert!(matches!(a.settled().await, LoadState::Failed(_)));
        assert!(b.is_pending());

        manual.complete("b.glb", 0);
        assert!(matches!(b.settled().await, LoadState::Ready(_)));
    }

    #[tokio::test]
    async fn test_panicking_loader_settles_failed() {
        let loader: Arc<dyn AssetLoader> = Arc::new(PanickingLoader);
        let handle = spawn_load(&loader, &AssetDescriptor::new("boom.sfb"));
        match handle.settled().await {
            LoadState::Failed(LoadError::Aborted { location, .. }) => assert_eq!(location, "boom.sfb"),
            other => panic!("expected Aborted, got {:?}", other),
        }
    }
}
