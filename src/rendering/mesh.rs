use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::math::bounds::{Bounds, MinMax};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
}

/// One submesh: an indexed triangle list.
#[derive(Debug, Clone, Default)]
pub struct MeshPrimitive {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct MeshData {
    pub name: String,
    pub primitives: Vec<MeshPrimitive>,
}

impl MeshData {
    pub fn submesh_count(&self) -> u32 {
        self.primitives.len() as u32
    }

    /// Local bounds over every vertex; zero for an empty mesh.
    pub fn bounds(&self) -> Bounds {
        let min_max = self
            .primitives
            .iter()
            .flat_map(|primitive| primitive.vertices.iter())
            .fold(MinMax::EMPTY, |min_max, vertex| {
                min_max.include_point(vertex.position)
            });

        if min_max.is_empty() {
            Bounds::ZERO
        } else {
            min_max.to_bounds()
        }
    }

    /// Axis-aligned box with flat normals, 24 vertices.
    pub fn cuboid(name: impl Into<String>, size: Vec3) -> Self {
        let half = size * 0.5;
        let faces = [
            (Vec3::X, Vec3::Y, Vec3::Z),
            (Vec3::NEG_X, Vec3::Y, Vec3::NEG_Z),
            (Vec3::Y, Vec3::Z, Vec3::X),
            (Vec3::NEG_Y, Vec3::NEG_Z, Vec3::X),
            (Vec3::Z, Vec3::X, Vec3::Y),
            (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
        ];

        let mut primitive = MeshPrimitive::default();
        for (normal, u, v) in faces {
            let base = primitive.vertices.len() as u32;
            for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
                let position = (normal + u * su + v * sv) * half;
                primitive.vertices.push(Vertex { position, normal });
            }
            primitive
                .indices
                .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }

        Self {
            name: name.into(),
            primitives: vec![primitive],
        }
    }
}
