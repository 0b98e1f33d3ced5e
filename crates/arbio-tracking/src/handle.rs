//! Load handles: write-once cells tracking one asset load

use arbio_core::{LoadPath, SourceLocation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

/// Opaque id the scene graph uses to refer to a loaded renderable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RenderableId(pub Uuid);

impl RenderableId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RenderableId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RenderableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A loaded, placeable asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadedAsset {
    pub renderable: RenderableId,
    /// Normalized source location
    pub location: String,
    pub path: LoadPath,
    /// Number of animation clips the asset carries
    pub clip_count: usize,
    /// Size of the fetched payload
    pub byte_len: usize,
}

impl LoadedAsset {
    pub fn new(location: &SourceLocation, clip_count: usize, byte_len: usize) -> Self {
        Self {
            renderable: RenderableId::new(),
            location: location.key.clone(),
            path: location.load_path(),
            clip_count,
            byte_len,
        }
    }
}

/// Why an asset failed to load
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoadError {
    #[error("Failed to fetch {location}: {reason}")]
    Fetch { location: String, reason: String },
    #[error("Failed to decode {location}: {reason}")]
    Decode { location: String, reason: String },
    #[error("Load aborted for {location}: {reason}")]
    Aborted { location: String, reason: String },
}

/// State of one load
#[derive(Debug, Clone)]
pub enum LoadState {
    Pending,
    Ready(Arc<LoadedAsset>),
    Failed(LoadError),
}

impl LoadState {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

struct HandleInner {
    location: SourceLocation,
    state: watch::Sender<LoadState>,
}

/// Shared handle to a single asset load.
///
/// Clones refer to the same load. The state moves from `Pending` to `Ready`
/// or `Failed` once; later settle attempts are ignored.
#[derive(Clone)]
pub struct LoadHandle {
    inner: Arc<HandleInner>,
}

impl LoadHandle {
    /// New handle in the `Pending` state
    pub fn pending(location: SourceLocation) -> Self {
        let (state, _) = watch::channel(LoadState::Pending);
        Self {
            inner: Arc::new(HandleInner { location, state }),
        }
    }

    /// Move to a terminal state. Returns false if already settled.
    pub(crate) fn settle(&self, result: Result<LoadedAsset, LoadError>) -> bool {
        let mut next = Some(match result {
            Ok(asset) => LoadState::Ready(Arc::new(asset)),
            Err(e) => LoadState::Failed(e),
        });
        self.inner.state.send_if_modified(|state| {
            if !state.is_pending() {
                return false;
            }
            if let Some(next) = next.take() {
                *state = next;
            }
            true
        })
    }

    pub fn location(&self) -> &SourceLocation {
        &self.inner.location
    }

    /// Snapshot of the current state
    pub fn state(&self) -> LoadState {
        self.inner.state.borrow().clone()
    }

    pub fn is_pending(&self) -> bool {
        self.inner.state.borrow().is_pending()
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.inner.state.borrow(), LoadState::Ready(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(*self.inner.state.borrow(), LoadState::Failed(_))
    }

    /// The loaded asset, if ready
    pub fn asset(&self) -> Option<Arc<LoadedAsset>> {
        match &*self.inner.state.borrow() {
            LoadState::Ready(asset) => Some(asset.clone()),
            _ => None,
        }
    }

    /// Resolves with the terminal state once the load settles
    pub fn settled(&self) -> impl Future<Output = LoadState> + Send + 'static {
        let mut rx = self.inner.state.subscribe();
        async move {
            if let Ok(state) = rx.wait_for(|s| !s.is_pending()).await {
                return state.clone();
            }
            let state = rx.borrow().clone();
            state
        }
    }

    /// Whether two handles refer to the same load
    pub fn ptr_eq(a: &LoadHandle, b: &LoadHandle) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

impl fmt::Debug for LoadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadHandle")
            .field("location", &self.inner.location.key)
            .field("state", &*self.inner.state.borrow())
            .finish()
    }
}
