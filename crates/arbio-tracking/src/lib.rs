//! Arbio Tracking - Asset readiness coordination for recognized images
//!
//! This crate turns a manifest into running asset loads and decides when a
//! recognized image's content can be placed:
//! - Write-once load handles shared per source location
//! - A registry populated once from the manifest
//! - A coordinator that waits on loads and places content exactly once per pass
//! - A gate that allows a single animation session

pub mod coordinator;
pub mod gate;
pub mod handle;
pub mod loader;
pub mod registry;
pub mod scene;

pub use coordinator::{Outcome, Phase, ReadinessCoordinator};
pub use gate::{AnimationGate, GatePolicy, GateState};
pub use handle::{LoadError, LoadHandle, LoadState, LoadedAsset, RenderableId};
pub use loader::{spawn_load, AssetLoader};
pub use registry::{
    AssetFailure, AssetRegistry, AssetSlot, ManifestSource, Readiness, ReadinessError, ReadyAsset,
};
pub use scene::{AnchorId, AnimationRequest, PlacementInstruction, RecognizedEntity, SceneEvent};
