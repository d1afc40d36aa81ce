//! Regular arrangements of instance offsets: a 3D grid, a grid on one of the
//! axis planes, or a line along one axis.

use glam::{EulerRot, Mat4, Quat, UVec3, Vec3};
use itertools::iproduct;
use rayon::prelude::*;

use crate::{
    math::bounds::{Bounds, MinMax},
    rendering::{
        gpu::GpuBackend,
        instancing::{error::InstancingError, registry::InstancingWorld, token::TokenId},
    },
    scene_graph::TransformProvider,
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum GridPlane {
    #[default]
    XY,
    YZ,
    XZ,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum LineAxis {
    #[default]
    X,
    Y,
    Z,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridShape {
    /// 32 * 32 * 32
    Grid,
    /// 64 * 64
    Grid2D(GridPlane),
    Line(LineAxis),
}

impl GridShape {
    pub fn max_number(self) -> u32 {
        match self {
            GridShape::Grid => 32,
            GridShape::Grid2D(_) => 64,
            GridShape::Line(_) => 16384,
        }
    }

    /// Which of x, y, z this shape spreads along.
    fn axes(self) -> [bool; 3] {
        match self {
            GridShape::Grid => [true, true, true],
            GridShape::Grid2D(GridPlane::XY) => [true, true, false],
            GridShape::Grid2D(GridPlane::YZ) => [false, true, true],
            GridShape::Grid2D(GridPlane::XZ) => [true, false, true],
            GridShape::Line(LineAxis::X) => [true, false, false],
            GridShape::Line(LineAxis::Y) => [false, true, false],
            GridShape::Line(LineAxis::Z) => [false, false, true],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GridInstances {
    pub shape: GridShape,
    pub base_point: Vec3,
    /// Spacing between neighbours along each axis.
    pub distances: Vec3,
    /// Instance rotation in degrees.
    pub euler: Vec3,
    pub scale: Vec3,
    numbers: UVec3,
}

impl GridInstances {
    pub fn new(shape: GridShape) -> Self {
        Self {
            shape,
            base_point: Vec3::ZERO,
            distances: Vec3::ONE,
            euler: Vec3::ZERO,
            scale: Vec3::ONE,
            numbers: UVec3::ONE,
        }
    }

    /// Per-axis instance counts, each clamped to `1..=max_number`.
    pub fn set_numbers(&mut self, x: u32, y: u32, z: u32) {
        let max = self.shape.max_number();
        self.numbers = UVec3::new(x, y, z).clamp(UVec3::ONE, UVec3::splat(max));
    }

    /// Counts actually used; axes the shape does not spread along count 1.
    pub fn numbers(&self) -> UVec3 {
        let [x, y, z] = self.shape.axes();
        UVec3::new(
            if x { self.numbers.x } else { 1 },
            if y { self.numbers.y } else { 1 },
            if z { self.numbers.z } else { 1 },
        )
    }

    pub fn instance_count(&self) -> usize {
        let numbers = self.numbers();
        (numbers.x * numbers.y * numbers.z) as usize
    }

    /// Offsets in x-major, z-minor order.
    pub fn matrices(&self) -> Vec<Mat4> {
        let numbers = self.numbers();
        let rotation = Quat::from_euler(
            EulerRot::YXZ,
            self.euler.y.to_radians(),
            self.euler.x.to_radians(),
            self.euler.z.to_radians(),
        );

        iproduct!(0..numbers.x, 0..numbers.y, 0..numbers.z)
            .map(|(x, y, z)| {
                let translation =
                    self.base_point + self.distances * Vec3::new(x as f32, y as f32, z as f32);
                Mat4::from_scale_rotation_translation(self.scale, rotation, translation)
            })
            .collect()
    }

    /// Writes the offsets and matching bounds into the token and dispatches
    /// it.
    pub fn apply<B: GpuBackend, S: TransformProvider>(
        &self,
        world: &mut InstancingWorld<B, S>,
        token: TokenId,
        mesh_bounds: Bounds,
    ) -> Result<(), InstancingError> {
        let matrices = self.matrices();
        let bounds = local_bounds(&matrices, mesh_bounds);
        world.edit_token(token, |token| {
            token.set_instance_offsets(&matrices);
            token.set_local_bounds(bounds);
        })
    }
}

/// Bounds enclosing `mesh_bounds` placed at every offset.
pub fn local_bounds(offsets: &[Mat4], mesh_bounds: Bounds) -> Bounds {
    offsets
        .par_iter()
        .map(|offset| mesh_bounds.transform(offset))
        .reduce(|| MinMax::EMPTY, MinMax::merge)
        .to_bounds()
}
