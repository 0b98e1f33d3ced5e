//! Rigid transforms for anchors and asset placement
//!
//! Manifest rotations arrive as axis-angle quadruples `[ax, ay, az, degrees]`.

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Rotation of `degrees` around `axis`; a zero-length axis yields the
/// identity, so the manifest default `[0, 0, 0, 0]` places assets unrotated
pub fn axis_angle_rotation(axis_angle: [f32; 4]) -> Quat {
    let axis = Vec3::new(axis_angle[0], axis_angle[1], axis_angle[2]);
    if axis.length_squared() <= f32::EPSILON {
        return Quat::IDENTITY;
    }
    Quat::from_axis_angle(axis.normalize(), axis_angle[3].to_radians())
}

/// Position and orientation in 3D space
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    #[serde(default)]
    pub translation: Vec3,
    #[serde(default)]
    pub rotation: Quat,
}

impl Pose {
    pub const IDENTITY: Pose = Pose {
        translation: Vec3::ZERO,
        rotation: Quat::IDENTITY,
    };

    pub fn new(translation: Vec3, rotation: Quat) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    /// Express a child-local pose in this pose's frame
    pub fn compose(&self, child: &Pose) -> Pose {
        Pose {
            translation: self.translation + self.rotation * child.translation,
            rotation: self.rotation * child.rotation,
        }
    }
}
