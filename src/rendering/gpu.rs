use slotmap::{new_key_type, SlotMap};

use crate::math::bounds::Bounds;
use crate::rendering::config::RenderOptions;

new_key_type! {
    pub struct GpuBufferId;
}

/// Opaque handle to a host mesh. Only the submesh count matters here: one
/// draw is issued per submesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshHandle {
    pub index: u32,
    pub submesh_count: u32,
}

impl MeshHandle {
    pub fn new(index: u32, submesh_count: u32) -> Self {
        Self {
            index,
            submesh_count,
        }
    }
}

impl Default for MeshHandle {
    fn default() -> Self {
        Self {
            index: 0,
            submesh_count: 1,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MaterialHandle(pub u32);

/// A structured buffer living on the GPU side of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuBuffer {
    pub id: GpuBufferId,
    pub len: usize,
    pub stride: usize,
}

impl GpuBuffer {
    pub fn byte_size(&self) -> usize {
        self.len * self.stride
    }
}

/// The three per-instance streams the instanced shader reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceBuffers {
    pub local_to_world: GpuBufferId,
    pub world_to_local: GpuBufferId,
    pub colors: GpuBufferId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DrawCall {
    pub mesh: MeshHandle,
    pub material: MaterialHandle,
    pub submesh: u32,
    pub instance_count: u32,
    pub world_bounds: Bounds,
    pub options: RenderOptions,
    pub buffers: InstanceBuffers,
}

/// The slice of a graphics API the render systems need.
pub trait GpuBackend {
    fn create_buffer(&mut self, label: &str, len: usize, stride: usize) -> GpuBufferId;

    fn release_buffer(&mut self, id: GpuBufferId);

    fn write_buffer(&mut self, id: GpuBufferId, data: &[u8]);

    fn draw(&mut self, call: &DrawCall);
}

#[derive(Debug)]
struct HeadlessBuffer {
    label: String,
    stride: usize,
    data: Vec<u8>,
}

/// Keeps buffers in host memory and records draw calls instead of submitting
/// them. Used when no adapter is around, and by the tests.
#[derive(Debug, Default)]
pub struct HeadlessBackend {
    buffers: SlotMap<GpuBufferId, HeadlessBuffer>,
    draws: Vec<DrawCall>,
    upload_count: usize,
    uploaded_bytes: usize,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn buffer_label(&self, id: GpuBufferId) -> Option<&str> {
        self.buffers.get(id).map(|buffer| buffer.label.as_str())
    }

    pub fn buffer_bytes(&self, id: GpuBufferId) -> Option<&[u8]> {
        self.buffers.get(id).map(|buffer| buffer.data.as_slice())
    }

    /// Reads back `count` elements of a buffer as `T`.
    pub fn read_buffer<T: bytemuck::Pod>(&self, id: GpuBufferId, count: usize) -> Vec<T> {
        let Some(buffer) = self.buffers.get(id) else {
            return Vec::new();
        };
        let stride = std::mem::size_of::<T>();
        let bytes = (count * stride).min(buffer.data.len());
        buffer.data[..bytes]
            .chunks_exact(stride)
            .map(bytemuck::pod_read_unaligned)
            .collect()
    }

    pub fn draws(&self) -> &[DrawCall] {
        &self.draws
    }

    pub fn take_draws(&mut self) -> Vec<DrawCall> {
        std::mem::take(&mut self.draws)
    }

    pub fn upload_count(&self) -> usize {
        self.upload_count
    }

    pub fn uploaded_bytes(&self) -> usize {
        self.uploaded_bytes
    }
}

impl GpuBackend for HeadlessBackend {
    fn create_buffer(&mut self, label: &str, len: usize, stride: usize) -> GpuBufferId {
        self.buffers.insert(HeadlessBuffer {
            label: label.to_string(),
            stride,
            data: vec![0; len * stride],
        })
    }

    fn release_buffer(&mut self, id: GpuBufferId) {
        self.buffers.remove(id);
    }

    fn write_buffer(&mut self, id: GpuBufferId, data: &[u8]) {
        let Some(buffer) = self.buffers.get_mut(id) else {
            log::warn!("Upload to released buffer {:?} ignored", id);
            return;
        };
        assert!(
            data.len() <= buffer.data.len(),
            "upload of {} bytes overflows buffer \"{}\" ({} bytes, stride {})",
            data.len(),
            buffer.label,
            buffer.data.len(),
            buffer.stride
        );
        buffer.data[..data.len()].copy_from_slice(data);
        self.upload_count += 1;
        self.uploaded_bytes += data.len();
    }

    fn draw(&mut self, call: &DrawCall) {
        self.draws.push(call.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headless_buffers_store_uploads() {
        let mut backend = HeadlessBackend::new();
        let id = backend.create_buffer("colors", 4, 16);
        assert_eq!(backend.buffer_bytes(id).map(|b| b.len()), Some(64));

        let values = [1.0f32, 2.0, 3.0, 4.0];
        backend.write_buffer(id, bytemuck::cast_slice(&values));
        assert_eq!(backend.read_buffer::<f32>(id, 4), values.to_vec());
        assert_eq!(backend.upload_count(), 1);
        assert_eq!(backend.uploaded_bytes(), 16);

        backend.release_buffer(id);
        assert_eq!(backend.buffer_count(), 0);
        assert!(backend.read_buffer::<f32>(id, 4).is_empty());
    }
}
