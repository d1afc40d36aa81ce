use std::mem::offset_of;

use wgpu::util::DeviceExt;

use crate::rendering::mesh::{MeshData, MeshPrimitive, Vertex};

/// Vertex and index buffers of one submesh.
pub struct RenderPrimitive {
    pub vertex_buffer: wgpu::Buffer,
    pub index_buffer: wgpu::Buffer,
    pub num_indices: u32,
}

impl RenderPrimitive {
    fn upload(device: &wgpu::Device, label: &str, primitive: &MeshPrimitive) -> Self {
        let create = |kind: &str, contents: &[u8], usage| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("{kind} buffer ({label})")),
                contents,
                usage,
            })
        };

        Self {
            vertex_buffer: create(
                "Vertex",
                bytemuck::cast_slice(&primitive.vertices),
                wgpu::BufferUsages::VERTEX,
            ),
            index_buffer: create(
                "Index",
                bytemuck::cast_slice(&primitive.indices),
                wgpu::BufferUsages::INDEX,
            ),
            num_indices: primitive.indices.len() as u32,
        }
    }
}

/// GPU copy of a `MeshData`, indexed by submesh.
pub struct RenderModel {
    pub name: String,
    pub primitives: Vec<RenderPrimitive>,
}

impl RenderModel {
    pub fn from_mesh(device: &wgpu::Device, mesh: &MeshData) -> Self {
        let primitives = mesh
            .primitives
            .iter()
            .enumerate()
            .map(|(submesh, primitive)| {
                RenderPrimitive::upload(device, &format!("{}, submesh {}", mesh.name, submesh), primitive)
            })
            .collect();

        Self {
            name: mesh.name.clone(),
            primitives,
        }
    }
}

pub const RENDER_MODEL_VBL: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
    array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
    step_mode: wgpu::VertexStepMode::Vertex,
    attributes: &[
        wgpu::VertexAttribute {
            offset: offset_of!(Vertex, position) as wgpu::BufferAddress,
            shader_location: 0,
            format: wgpu::VertexFormat::Float32x3,
        },
        wgpu::VertexAttribute {
            offset: offset_of!(Vertex, normal) as wgpu::BufferAddress,
            shader_location: 1,
            format: wgpu::VertexFormat::Float32x3,
        },
    ],
};
