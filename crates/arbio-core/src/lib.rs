//! Arbio Core - Asset descriptors, manifest parsing, and pose math
//!
//! This crate provides the value types shared by the Arbio system:
//! - Asset descriptors with placement transforms and loader routing
//! - Strongly-typed parsing of the remote asset manifest
//! - Rigid poses for anchors and placements
//! - An on-disk cache of fetched manifests

pub mod cache;
pub mod descriptor;
pub mod manifest;
pub mod pose;

pub use cache::{sha256_hex, CacheError, ManifestCache};
pub use descriptor::{normalize_source, AssetDescriptor, AssetKind, LoadPath, SourceLocation};
pub use manifest::{Manifest, ManifestError, RejectedAsset};
pub use glam::{Quat, Vec3};
pub use pose::{axis_angle_rotation, Pose};
