use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

use crate::math::compare::vec3_approx_eq;

/// Axis-aligned box stored as center + half extents, matching the layout the
/// per-batch bounds buffer expects.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct Bounds {
    pub center: Vec3,
    pub extents: Vec3,
}

impl Bounds {
    pub const ZERO: Bounds = Bounds {
        center: Vec3::ZERO,
        extents: Vec3::ZERO,
    };

    pub fn new(center: Vec3, extents: Vec3) -> Self {
        Self { center, extents }
    }

    pub fn from_center_size(center: Vec3, size: Vec3) -> Self {
        Self {
            center,
            extents: size * 0.5,
        }
    }

    pub fn from_min_max(min: Vec3, max: Vec3) -> Self {
        let extents = (max - min) * 0.5;
        Self {
            center: min + extents,
            extents,
        }
    }

    pub fn min(&self) -> Vec3 {
        self.center - self.extents
    }

    pub fn max(&self) -> Vec3 {
        self.center + self.extents
    }

    pub fn size(&self) -> Vec3 {
        self.extents * 2.0
    }

    pub fn is_empty(&self) -> bool {
        self.extents.x == 0.0 || self.extents.y == 0.0 || self.extents.z == 0.0
    }

    pub fn corners(&self) -> [Vec3; 8] {
        let (min, max) = (self.min(), self.max());
        [
            Vec3::new(min.x, min.y, min.z),
            Vec3::new(min.x, min.y, max.z),
            Vec3::new(min.x, max.y, min.z),
            Vec3::new(min.x, max.y, max.z),
            Vec3::new(max.x, min.y, min.z),
            Vec3::new(max.x, min.y, max.z),
            Vec3::new(max.x, max.y, min.z),
            Vec3::new(max.x, max.y, max.z),
        ]
    }

    /// World-space min/max of the eight corners after `transform`.
    pub fn transform(&self, transform: &Mat4) -> MinMax {
        self.corners()
            .into_iter()
            .fold(MinMax::EMPTY, |acc, corner| {
                acc.include_point(transform.transform_point3(corner))
            })
    }

    pub fn approx_eq(&self, other: &Bounds) -> bool {
        vec3_approx_eq(self.center, other.center) && vec3_approx_eq(self.extents, other.extents)
    }
}

/// Running min/max accumulator used when reducing many boxes into one.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct MinMax {
    pub min: Vec3,
    pub max: Vec3,
}

impl MinMax {
    pub const EMPTY: MinMax = MinMax {
        min: Vec3::splat(f32::MAX),
        max: Vec3::splat(f32::MIN),
    };

    pub fn include_point(self, point: Vec3) -> Self {
        Self {
            min: self.min.min(point),
            max: self.max.max(point),
        }
    }

    pub fn merge(self, other: MinMax) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min.cmpgt(self.max).any()
    }

    pub fn to_bounds(self) -> Bounds {
        Bounds::from_min_max(self.min, self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;

    #[test]
    fn min_max_round_trip() {
        let bounds = Bounds::from_min_max(Vec3::new(-1.0, 0.0, 2.0), Vec3::new(3.0, 4.0, 6.0));
        assert_eq!(bounds.center, Vec3::new(1.0, 2.0, 4.0));
        assert_eq!(bounds.extents, Vec3::splat(2.0));
        assert_eq!(bounds.min(), Vec3::new(-1.0, 0.0, 2.0));
        assert_eq!(bounds.max(), Vec3::new(3.0, 4.0, 6.0));
    }

    #[test]
    fn identity_transform_keeps_box() {
        let bounds = Bounds::from_center_size(Vec3::ZERO, Vec3::ONE);
        let world = bounds.transform(&Mat4::IDENTITY).to_bounds();
        assert!(world.approx_eq(&bounds));
    }

    #[test]
    fn rotated_box_grows_to_enclose_corners() {
        let bounds = Bounds::from_center_size(Vec3::ZERO, Vec3::new(2.0, 2.0, 2.0));
        let rotation = Mat4::from_quat(Quat::from_rotation_y(std::f32::consts::FRAC_PI_4));
        let world = bounds.transform(&rotation).to_bounds();

        let diagonal = 2.0f32.sqrt();
        assert!((world.extents.x - diagonal).abs() < 1e-5);
        assert!((world.extents.z - diagonal).abs() < 1e-5);
        assert!((world.extents.y - 1.0).abs() < 1e-5);
    }

    #[test]
    fn translated_box_moves_center() {
        let bounds = Bounds::from_center_size(Vec3::ZERO, Vec3::ONE);
        let world = bounds
            .transform(&Mat4::from_translation(Vec3::new(10.0, 0.0, -5.0)))
            .to_bounds();
        assert!(world.approx_eq(&Bounds::from_center_size(
            Vec3::new(10.0, 0.0, -5.0),
            Vec3::ONE
        )));
    }

    #[test]
    fn merge_covers_both() {
        let a = Bounds::from_min_max(Vec3::ZERO, Vec3::ONE).transform(&Mat4::IDENTITY);
        let b = Bounds::from_min_max(Vec3::splat(-2.0), Vec3::splat(-1.0)).transform(&Mat4::IDENTITY);
        let merged = a.merge(b).to_bounds();
        assert_eq!(merged.min(), Vec3::splat(-2.0));
        assert_eq!(merged.max(), Vec3::ONE);
        assert!(MinMax::EMPTY.is_empty());
        assert!(!a.is_empty());
    }
}
