use glam::Mat4;
use wgpu::{
    util::DeviceExt, LoadOp, PipelineCompilationOptions, RenderPassColorAttachment,
    RenderPassDepthStencilAttachment, RenderPassDescriptor, RenderPipelineDescriptor, StoreOp,
    TextureFormat, TextureView, VertexState,
};

use crate::rendering::{
    render_model::RENDER_MODEL_VBL,
    wgpu_backend::WgpuBackend,
};

const SHADER_SOURCE: &str = include_str!("shaders/instanced.wgsl");

/// Forward pass that draws every instanced batch recorded during the frame
/// into an offscreen color and depth target.
pub struct InstancedPass {
    pipeline: wgpu::RenderPipeline,
    camera_buffer: wgpu::Buffer,
    camera_bind_group: wgpu::BindGroup,
    color: TextureView,
    depth: TextureView,
}

impl InstancedPass {
    pub const COLOR_FORMAT: TextureFormat = TextureFormat::Rgba8UnormSrgb;
    pub const DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;

    pub fn new(backend: &WgpuBackend, width: u32, height: u32) -> Self {
        let device = backend.device();

        let camera_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Camera uniform buffer"),
            contents: bytemuck::cast_slice(&[Mat4::IDENTITY]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let camera_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Camera bind group layout"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                }],
            });

        let camera_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Camera bind group"),
            layout: &camera_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: camera_buffer.as_entire_binding(),
            }],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Instanced pipeline layout"),
            bind_group_layouts: &[&camera_bind_group_layout, backend.bind_group_layout()],
            push_constant_ranges: &[],
        });

        let shader_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Instanced shader"),
            source: wgpu::ShaderSource::Wgsl(SHADER_SOURCE.into()),
        });

        let pipeline = device.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("Instanced render pipeline"),
            layout: Some(&pipeline_layout),
            vertex: VertexState {
                module: &shader_module,
                entry_point: Some("vs_main"),
                buffers: &[RENDER_MODEL_VBL],
                compilation_options: PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader_module,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: Self::COLOR_FORMAT,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: Self::DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let color = Self::create_attachment(device, "Instanced color target", Self::COLOR_FORMAT, width, height);
        let depth = Self::create_attachment(device, "Instanced depth target", Self::DEPTH_FORMAT, width, height);

        Self {
            pipeline,
            camera_buffer,
            camera_bind_group,
            color,
            depth,
        }
    }

    fn create_attachment(
        device: &wgpu::Device,
        label: &'static str,
        format: TextureFormat,
        width: u32,
        height: u32,
    ) -> TextureView {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        texture.create_view(&wgpu::TextureViewDescriptor::default())
    }

    pub fn set_view_projection(&self, queue: &wgpu::Queue, view_projection: Mat4) {
        queue.write_buffer(&self.camera_buffer, 0, bytemuck::cast_slice(&[view_projection]));
    }

    /// Draws what the backend recorded since the last call and submits the
    /// pass. Returns the number of draws encoded.
    pub fn render(&self, backend: &mut WgpuBackend) -> usize {
        let prepared = backend.prepare();

        let mut encoder = backend
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Instanced pass encoder"),
            });

        {
            let mut render_pass = encoder.begin_render_pass(&RenderPassDescriptor {
                label: Some("Instanced pass"),
                color_attachments: &[Some(RenderPassColorAttachment {
                    view: &self.color,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: LoadOp::Clear(wgpu::Color::BLACK),
                        store: StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(RenderPassDepthStencilAttachment {
                    view: &self.depth,
                    depth_ops: Some(wgpu::Operations {
                        load: LoadOp::Clear(1.0),
                        store: StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
            });

            render_pass.set_pipeline(&self.pipeline);
            render_pass.set_bind_group(0, &self.camera_bind_group, &[]);
            backend.encode(&mut render_pass, &prepared);
        }

        backend.queue().submit(std::iter::once(encoder.finish()));
        prepared.len()
    }
}

#[cfg(test)]
mod tests {
    use glam::{Vec3, Vec4};

    use super::*;
    use crate::{
        rendering::{
            config::DispatcherConfig,
            gpu::MaterialHandle,
            instancing::{InstanceToken, InstancingWorld},
            mesh::MeshData,
        },
        scene_graph::{object3d::Object3D, scene::Scene},
    };

    #[test]
    fn recorded_batches_are_encoded() {
        // Machines without an adapter have nothing to draw to
        let Ok(mut backend) = pollster::block_on(WgpuBackend::new_headless()) else {
            return;
        };
        let mesh = MeshData::cuboid("Crate", Vec3::ONE);
        let handle = backend.register_mesh(&mesh);
        let pass = InstancedPass::new(&backend, 64, 64);
        pass.set_view_projection(
            backend.queue(),
            Mat4::perspective_rh(60f32.to_radians(), 1.0, 0.1, 100.0)
                * Mat4::look_at_rh(Vec3::new(0.0, 2.0, 5.0), Vec3::ZERO, Vec3::Y),
        );

        let mut world = InstancingWorld::new(backend, Scene::new());
        world
            .add_dispatcher(DispatcherConfig::new("Crate", handle, MaterialHandle(0)))
            .unwrap();
        let object = world.scene_mut().add_object(Object3D::new("crate"));
        let mut token = InstanceToken::new(object, "Crate");
        token.set_count(3);
        token.set_local_bounds(mesh.bounds());
        token.set_instance_colors(&[Vec4::new(1.0, 0.0, 0.0, 1.0)]);
        world.spawn_token(token);

        world.update();
        assert_eq!(pass.render(world.backend_mut()), 1);

        // Everything recorded was consumed by the first pass
        assert_eq!(pass.render(world.backend_mut()), 0);
    }
}
