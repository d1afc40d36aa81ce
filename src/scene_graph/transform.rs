use std::cell::Cell;

use glam::{Mat4, Quat, Vec3};

/// TRS of one scene object. The composed local matrix is rebuilt on demand;
/// the world matrix is filled in by the scene and stays `None` while stale.
#[derive(Debug, Clone)]
pub struct Transform {
    translation: Vec3,
    rotation: Quat,
    scale: Vec3,

    local: Cell<Option<Mat4>>,
    world: Cell<Option<Mat4>>,
    moved: Cell<bool>,
}

impl Default for Transform {
    fn default() -> Self {
        Self::from_trs(Vec3::ZERO, Quat::IDENTITY, Vec3::ONE)
    }
}

impl Transform {
    pub fn from_trs(translation: Vec3, rotation: Quat, scale: Vec3) -> Self {
        Self {
            translation,
            rotation,
            scale,
            local: Cell::new(None),
            world: Cell::new(None),
            moved: Cell::new(true),
        }
    }

    pub fn from_translation(translation: Vec3) -> Self {
        Self::from_trs(translation, Quat::IDENTITY, Vec3::ONE)
    }

    pub fn local_matrix(&self) -> Mat4 {
        if let Some(local) = self.local.get() {
            return local;
        }
        let local = Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation);
        self.local.set(Some(local));
        local
    }

    /// Cached world matrix, `None` until the scene recomputes it.
    pub fn world_matrix(&self) -> Option<Mat4> {
        self.world.get()
    }

    pub fn set_world_matrix(&self, world: Mat4) {
        self.world.set(Some(world));
        self.moved.set(true);
    }

    pub fn invalidate_world(&self) {
        self.world.set(None);
    }

    pub fn is_world_dirty(&self) -> bool {
        self.world.get().is_none()
    }

    fn invalidate_local(&mut self) {
        self.local.set(None);
        self.world.set(None);
        self.moved.set(true);
    }

    pub fn set_translation(&mut self, translation: Vec3) {
        self.translation = translation;
        self.invalidate_local();
    }

    pub fn set_rotation(&mut self, rotation: Quat) {
        self.rotation = rotation;
        self.invalidate_local();
    }

    pub fn set_scale(&mut self, scale: Vec3) {
        self.scale = scale;
        self.invalidate_local();
    }

    pub fn set_trs(&mut self, translation: Vec3, rotation: Quat, scale: Vec3) {
        self.translation = translation;
        self.rotation = rotation;
        self.scale = scale;
        self.invalidate_local();
    }

    pub fn translation(&self) -> Vec3 {
        self.translation
    }

    pub fn rotation(&self) -> Quat {
        self.rotation
    }

    pub fn scale(&self) -> Vec3 {
        self.scale
    }

    /// Whether the transform was edited or given a new world matrix since
    /// the last `clear_moved`.
    pub fn moved(&self) -> bool {
        self.moved.get()
    }

    pub fn clear_moved(&self) {
        self.moved.set(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_matrix_is_rebuilt_after_edits() {
        let mut transform = Transform::from_translation(Vec3::X);
        assert_eq!(transform.local_matrix(), Mat4::from_translation(Vec3::X));

        transform.set_scale(Vec3::splat(2.0));
        assert_eq!(
            transform.local_matrix(),
            Mat4::from_scale_rotation_translation(Vec3::splat(2.0), Quat::IDENTITY, Vec3::X)
        );
        assert!(transform.is_world_dirty());

        transform.set_world_matrix(Mat4::IDENTITY);
        assert!(!transform.is_world_dirty());
        transform.clear_moved();
        assert!(!transform.moved());

        transform.set_rotation(Quat::from_rotation_z(1.0));
        assert!(transform.moved());
        assert_eq!(transform.world_matrix(), None);
    }
}
