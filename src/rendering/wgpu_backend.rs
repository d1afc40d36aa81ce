use anyhow::Context;
use slotmap::SlotMap;
use wgpu::{BindingType, BufferBindingType, BufferUsages, ShaderStages};

use crate::rendering::{
    gpu::{DrawCall, GpuBackend, GpuBufferId, MeshHandle},
    mesh::MeshData,
    render_model::RenderModel,
};

/// Bind group slot the instanced shader reads its per-instance streams from.
pub const INSTANCE_BIND_GROUP: u32 = 1;

/// A recorded draw with its instance streams bound.
pub struct PreparedDraw {
    pub call: DrawCall,
    bind_group: wgpu::BindGroup,
}

/// `GpuBackend` on a wgpu device. Instance streams are storage buffers; draw
/// calls are recorded during the frame and turned into render pass commands
/// by `prepare` and `encode`.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    buffers: SlotMap<GpuBufferId, wgpu::Buffer>,
    bind_group_layout: wgpu::BindGroupLayout,
    render_models: Vec<RenderModel>,
    draws: Vec<DrawCall>,
}

impl WgpuBackend {
    /// Opens the default adapter without a surface.
    pub async fn new_headless() -> anyhow::Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .context("No suitable GPU adapter")?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                label: Some("Instancing device"),
                memory_hints: Default::default(),
                trace: wgpu::Trace::Off,
            })
            .await
            .context("Failed to open GPU device")?;

        log::info!("Using adapter {:?}", adapter.get_info().name);

        Ok(Self::from_device(device, queue))
    }

    pub fn from_device(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let bind_group_layout = Self::create_bind_group_layout(&device);
        Self {
            device,
            queue,
            buffers: SlotMap::with_key(),
            bind_group_layout,
            render_models: Vec::new(),
            draws: Vec::new(),
        }
    }

    fn create_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
        let entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: ShaderStages::VERTEX | ShaderStages::FRAGMENT,
            ty: BindingType::Buffer {
                ty: BufferBindingType::Storage { read_only: true },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Instance streams bind group layout"),
            entries: &[entry(0), entry(1), entry(2)],
        })
    }

    /// Uploads a mesh and returns the handle a dispatcher draws it with.
    pub fn register_mesh(&mut self, mesh: &MeshData) -> MeshHandle {
        let index = self.render_models.len() as u32;
        let model = RenderModel::from_mesh(&self.device, mesh);
        log::debug!(
            "Mesh \"{}\" registered as {} ({} submeshes)",
            model.name,
            index,
            model.primitives.len()
        );
        self.render_models.push(model);
        MeshHandle::new(index, mesh.submesh_count())
    }

    /// For pipelines that read the instance streams.
    pub fn bind_group_layout(&self) -> &wgpu::BindGroupLayout {
        &self.bind_group_layout
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Takes the draws recorded since the last call and binds their streams.
    pub fn prepare(&mut self) -> Vec<PreparedDraw> {
        let draws = std::mem::take(&mut self.draws);
        draws
            .into_iter()
            .filter_map(|call| {
                let buffers = call.buffers;
                let (Some(local_to_world), Some(world_to_local), Some(colors)) = (
                    self.buffers.get(buffers.local_to_world),
                    self.buffers.get(buffers.world_to_local),
                    self.buffers.get(buffers.colors),
                ) else {
                    log::warn!("Draw with released instance buffers skipped");
                    return None;
                };

                let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("Instance streams bind group"),
                    layout: &self.bind_group_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: local_to_world.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: world_to_local.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: colors.as_entire_binding(),
                        },
                    ],
                });

                Some(PreparedDraw { call, bind_group })
            })
            .collect()
    }

    /// Records the prepared draws. The caller sets the material pipeline.
    pub fn encode(&self, render_pass: &mut wgpu::RenderPass<'_>, prepared: &[PreparedDraw]) {
        for draw in prepared {
            let Some(primitive) = self
                .render_models
                .get(draw.call.mesh.index as usize)
                .and_then(|model| model.primitives.get(draw.call.submesh as usize))
            else {
                log::error!("Draw references unknown mesh {:?}", draw.call.mesh);
                continue;
            };

            render_pass.set_bind_group(INSTANCE_BIND_GROUP, &draw.bind_group, &[]);
            render_pass.set_vertex_buffer(0, primitive.vertex_buffer.slice(..));
            render_pass.set_index_buffer(primitive.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
            render_pass.draw_indexed(0..primitive.num_indices, 0, 0..draw.call.instance_count);
        }
    }
}

impl GpuBackend for WgpuBackend {
    fn create_buffer(&mut self, label: &str, len: usize, stride: usize) -> GpuBufferId {
        // Storage bindings cannot be empty
        let size = (len * stride).max(stride) as u64;
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: BufferUsages::STORAGE | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.buffers.insert(buffer)
    }

    fn release_buffer(&mut self, id: GpuBufferId) {
        if let Some(buffer) = self.buffers.remove(id) {
            buffer.destroy();
        }
    }

    fn write_buffer(&mut self, id: GpuBufferId, data: &[u8]) {
        let Some(buffer) = self.buffers.get(id) else {
            log::warn!("Upload to released buffer {:?} ignored", id);
            return;
        };
        self.queue.write_buffer(buffer, 0, data);
    }

    fn draw(&mut self, call: &DrawCall) {
        self.draws.push(call.clone());
    }
}
