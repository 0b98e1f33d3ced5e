//! Asset descriptors: what to load and where to place it

use serde::{Deserialize, Serialize};
use std::fmt;

use glam::{Quat, Vec3};

use crate::pose::{axis_angle_rotation, Pose};

/// File suffix of the binary renderable format that goes through the binary loader
pub const BINARY_SUFFIX: &str = ".sfb";

/// Kind of placeable content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    /// Static 3D model
    Model,
    /// 3D model carrying animation clips
    AnimatedModel,
    /// Flat 2D view rendered into the scene
    View,
}

impl AssetKind {
    /// Kind implied by the source suffix when the manifest does not name one
    pub fn infer(source: &SourceLocation) -> Self {
        match source.load_path() {
            LoadPath::Binary => Self::AnimatedModel,
            LoadPath::Interchange => Self::Model,
        }
    }

    /// Whether placing this kind may start an animation session
    pub fn is_animatable(&self) -> bool {
        matches!(self, Self::AnimatedModel)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "model" => Some(Self::Model),
            "animated_model" | "animated" => Some(Self::AnimatedModel),
            "view" => Some(Self::View),
            _ => None,
        }
    }
}

/// Loader routing derived from the source location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadPath {
    /// Pre-packaged binary renderable (`.sfb`)
    Binary,
    /// Generic model interchange (glTF / GLB)
    Interchange,
}

/// Asset source location with its deduplication key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceLocation {
    /// Source string as written in the manifest
    pub raw: String,
    /// Normalized form used to share one load between descriptors
    pub key: String,
}

impl SourceLocation {
    pub fn new(raw: &str) -> Self {
        Self {
            raw: raw.trim().to_string(),
            key: normalize_source(raw),
        }
    }

    /// Route by filename suffix, ignoring any query string
    pub fn load_path(&self) -> LoadPath {
        let path = self.key.split('?').next().unwrap_or(&self.key);
        if path.to_ascii_lowercase().ends_with(BINARY_SUFFIX) {
            LoadPath::Binary
        } else {
            LoadPath::Interchange
        }
    }

    /// Last path segment, without query or fragment
    pub fn file_name(&self) -> &str {
        let path = self.raw.split(['?', '#']).next().unwrap_or(&self.raw);
        path.rsplit('/').next().unwrap_or(path)
    }

    pub fn is_remote(&self) -> bool {
        self.key.starts_with("http://") || self.key.starts_with("https://")
    }
}

impl PartialEq for SourceLocation {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for SourceLocation {}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// Normalize a source location for load deduplication.
///
/// Trims whitespace, drops any `#fragment`, lowercases the scheme and host of
/// URLs, and strips leading `./` from relative paths.
pub fn normalize_source(raw: &str) -> String {
    let trimmed = raw.trim();
    let without_fragment = trimmed.split('#').next().unwrap_or(trimmed);

    if let Some((scheme, rest)) = without_fragment.split_once("://") {
        let (host, path) = match rest.find('/') {
            Some(idx) => rest.split_at(idx),
            None => (rest, ""),
        };
        format!(
            "{}://{}{}",
            scheme.to_ascii_lowercase(),
            host.to_ascii_lowercase(),
            path
        )
    } else {
        let mut path = without_fragment;
        while let Some(stripped) = path.strip_prefix("./") {
            path = stripped;
        }
        path.to_string()
    }
}

/// One placeable asset from the manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetDescriptor {
    pub source: SourceLocation,
    pub kind: AssetKind,
    /// Offset from the anchor, meters
    pub position: [f32; 3],
    /// Axis-angle `[ax, ay, az, degrees]`
    pub rotation: [f32; 4],
    /// Uniform scale factor
    pub scale: f32,
}

impl AssetDescriptor {
    /// Descriptor with default placement and suffix-inferred kind
    pub fn new(source: &str) -> Self {
        let source = SourceLocation::new(source);
        let kind = AssetKind::infer(&source);
        Self {
            source,
            kind,
            position: [0.0, 0.0, 0.0],
            rotation: [0.0, 0.0, 0.0, 0.0],
            scale: 1.0,
        }
    }

    pub fn load_path(&self) -> LoadPath {
        self.source.load_path()
    }

    pub fn is_animatable(&self) -> bool {
        self.kind.is_animatable()
    }

    pub fn local_rotation(&self) -> Quat {
        axis_angle_rotation(self.rotation)
    }

    /// Placement relative to the anchor, without scale
    pub fn local_pose(&self) -> Pose {
        Pose::new(Vec3::from(self.position), self.local_rotation())
    }

    pub fn local_scale(&self) -> Vec3 {
        Vec3::splat(self.scale)
    }
}
