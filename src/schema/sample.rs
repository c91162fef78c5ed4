//! Per-frame face capture sample types.

use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Number of floats in an encoded pose (position xyz + rotation xyzw).
pub const POSE_FLOATS: usize = 7;

/// Rigid pose: position plus rotation quaternion stored as `[x, y, z, w]`.
#[repr(C)]
#[derive(
    Debug, Clone, Copy, PartialEq, Serialize, Deserialize, bytemuck::Pod, bytemuck::Zeroable,
)]
pub struct Pose {
    pub position: [f32; 3],
    pub rotation: [f32; 4],
}

impl Pose {
    /// Origin with identity rotation.
    pub const IDENTITY: Pose = Pose {
        position: [0.0; 3],
        rotation: [0.0, 0.0, 0.0, 1.0],
    };

    pub fn new(position: [f32; 3], rotation: [f32; 4]) -> Self {
        Self { position, rotation }
    }

    /// Flatten to wire order `x, y, z, qx, qy, qz, qw`.
    #[inline]
    pub fn to_floats(self) -> [f32; POSE_FLOATS] {
        bytemuck::cast(self)
    }

    /// Rebuild from wire order `x, y, z, qx, qy, qz, qw`.
    #[inline]
    pub fn from_floats(floats: [f32; POSE_FLOATS]) -> Self {
        bytemuck::cast(floats)
    }

    pub fn translation(&self) -> Vector3<f32> {
        Vector3::from(self.position)
    }

    /// Rotation as a unit quaternion. Degenerate (zero) rotations map to identity.
    pub fn orientation(&self) -> UnitQuaternion<f32> {
        let [x, y, z, w] = self.rotation;
        let q = Quaternion::new(w, x, y, z);
        if q.norm_squared() <= f32::EPSILON {
            UnitQuaternion::identity()
        } else {
            UnitQuaternion::new_normalize(q)
        }
    }

    pub fn from_parts(translation: Vector3<f32>, orientation: UnitQuaternion<f32>) -> Self {
        let q = orientation.into_inner();
        Self {
            position: [translation.x, translation.y, translation.z],
            rotation: [q.i, q.j, q.k, q.w],
        }
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// One face tracking sample: blend-shape weights, head and camera pose and
/// per-frame metadata.
///
/// Which metadata fields travel on the wire depends on the
/// [`StreamLayout`](super::StreamLayout); absent fields are left untouched by
/// the decoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceSample {
    /// Blend-shape weights, nominally in `[0, 1]`.
    pub blend_shapes: Vec<f32>,
    /// Head pose in capture space.
    pub head: Pose,
    /// Camera (device) pose in capture space.
    pub camera: Pose,
    /// Monotonic frame counter stamped by the sender.
    pub frame_number: i32,
    /// Seconds since the sender started streaming.
    pub frame_time: f32,
    /// Whether the tracker currently sees a face.
    pub tracking_active: bool,
}

impl FaceSample {
    /// Create a neutral sample with `blend_shape_count` zero weights.
    pub fn new(blend_shape_count: usize) -> Self {
        Self {
            blend_shapes: vec![0.0; blend_shape_count],
            head: Pose::IDENTITY,
            camera: Pose::IDENTITY,
            frame_number: 0,
            frame_time: 0.0,
            tracking_active: false,
        }
    }

    /// Copy `other` into `self`, reusing the blend-shape allocation.
    pub fn copy_from(&mut self, other: &FaceSample) {
        self.blend_shapes.clear();
        self.blend_shapes.extend_from_slice(&other.blend_shapes);
        self.head = other.head;
        self.camera = other.camera;
        self.frame_number = other.frame_number;
        self.frame_time = other.frame_time;
        self.tracking_active = other.tracking_active;
    }
}

impl Default for FaceSample {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pose_float_order() {
        let pose = Pose::new([1.0, 2.0, 3.0], [0.1, 0.2, 0.3, 0.9]);
        assert_eq!(pose.to_floats(), [1.0, 2.0, 3.0, 0.1, 0.2, 0.3, 0.9]);
        assert_eq!(Pose::from_floats(pose.to_floats()), pose);
    }

    #[test]
    fn test_zero_rotation_is_identity() {
        let pose = Pose::new([0.0; 3], [0.0; 4]);
        assert_eq!(pose.orientation(), UnitQuaternion::identity());
    }

    #[test]
    fn test_copy_from_reuses_buffer() {
        let mut src = FaceSample::new(4);
        src.blend_shapes = vec![0.1, 0.2, 0.3, 0.4];
        src.frame_number = 7;
        src.tracking_active = true;

        let mut dst = FaceSample::new(2);
        dst.copy_from(&src);
        assert_eq!(dst, src);
    }
}
