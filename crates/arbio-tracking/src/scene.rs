//! Recognition input and scene-graph output types

use arbio_core::{AssetKind, Pose, Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::handle::RenderableId;

/// Recognized image reported by the tracking collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedEntity {
    /// Image name, matched against manifest entity ids
    pub id: String,
    /// Pose of the image center
    #[serde(default, alias = "anchor_pose")]
    pub pose: Pose,
    /// Physical size of the image (x, z), meters. Not used for placement;
    /// copied into each [`PlacementInstruction`] for the scene graph.
    #[serde(default)]
    pub extent: [f32; 2],
}

impl RecognizedEntity {
    pub fn new(id: &str, pose: Pose) -> Self {
        Self {
            id: id.to_string(),
            pose,
            extent: [0.0, 0.0],
        }
    }
}

/// Anchor created for one placement pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnchorId(pub Uuid);

impl AnchorId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AnchorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AnchorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Attach a renderable under an anchor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementInstruction {
    pub anchor: AnchorId,
    pub anchor_pose: Pose,
    /// Size of the recognized image, as reported with the recognition
    pub anchor_extent: [f32; 2],
    pub entity_id: String,
    pub asset_key: String,
    pub kind: AssetKind,
    pub local_position: Vec3,
    pub local_rotation: Quat,
    pub local_scale: Vec3,
    /// Pose of the placed node in the anchor's parent frame
    pub world_pose: Pose,
    pub renderable: RenderableId,
}

/// Start playback of an animation clip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimationRequest {
    pub anchor: AnchorId,
    pub entity_id: String,
    pub asset_key: String,
    pub renderable: RenderableId,
    pub clip_index: usize,
}

/// Output consumed by the scene graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SceneEvent {
    Placed(PlacementInstruction),
    AnimationStarted(AnimationRequest),
    /// Entity cannot be placed because some assets failed to load
    PlacementFailed {
        entity_id: String,
        reasons: Vec<String>,
    },
}
