use glam::Mat4;

pub mod object3d;
pub mod scene;
pub mod transform;

use object3d::ObjectId;

/// Source of world transforms for the objects tokens are attached to.
pub trait TransformProvider {
    fn local_to_world(&self, object: ObjectId) -> Option<Mat4>;
}
