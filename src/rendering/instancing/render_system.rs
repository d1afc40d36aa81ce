use std::mem::size_of;

use glam::{Mat4, Vec4};

use crate::{
    math::{
        bounds::{Bounds, MinMax},
        is_pow2,
    },
    rendering::{
        config::RenderOptions,
        gpu::{DrawCall, GpuBackend, GpuBuffer, InstanceBuffers, MaterialHandle, MeshHandle},
        instancing::jobs,
    },
};

#[derive(Debug, Clone, Copy)]
struct GpuMirror {
    local_to_world: GpuBuffer,
    world_to_local: GpuBuffer,
    colors: GpuBuffer,
}

impl GpuMirror {
    fn create(backend: &mut dyn GpuBackend, instance_capacity: usize) -> Self {
        let matrix_stride = size_of::<Mat4>();
        let color_stride = size_of::<Vec4>();
        Self {
            local_to_world: GpuBuffer {
                id: backend.create_buffer("Instance local-to-world", instance_capacity, matrix_stride),
                len: instance_capacity,
                stride: matrix_stride,
            },
            world_to_local: GpuBuffer {
                id: backend.create_buffer("Instance world-to-local", instance_capacity, matrix_stride),
                len: instance_capacity,
                stride: matrix_stride,
            },
            colors: GpuBuffer {
                id: backend.create_buffer("Instance colors", instance_capacity, color_stride),
                len: instance_capacity,
                stride: color_stride,
            },
        }
    }

    fn release(self, backend: &mut dyn GpuBackend) {
        backend.release_buffer(self.local_to_world.id);
        backend.release_buffer(self.world_to_local.id);
        backend.release_buffer(self.colors.id);
    }

    fn byte_size(&self) -> usize {
        self.local_to_world.byte_size() + self.world_to_local.byte_size() + self.colors.byte_size()
    }

    fn ids(&self) -> InstanceBuffers {
        InstanceBuffers {
            local_to_world: self.local_to_world.id,
            world_to_local: self.world_to_local.id,
            colors: self.colors.id,
        }
    }
}

/// Resizes `buffer` to exactly `len` elements, keeping the common prefix.
fn realloc<T: Clone>(buffer: &mut Vec<T>, len: usize, fill: T) {
    if len < buffer.len() {
        buffer.truncate(len);
        buffer.shrink_to_fit();
    } else {
        buffer.reserve_exact(len - buffer.len());
        buffer.resize(len, fill);
    }
}

fn used_memory<T>(buffer: &[T]) -> usize {
    buffer.len() * size_of::<T>()
}

fn upload<T: bytemuck::Pod>(backend: &mut dyn GpuBackend, buffer: &GpuBuffer, data: &[T]) {
    if data.is_empty() {
        return;
    }
    backend.write_buffer(buffer.id, bytemuck::cast_slice(data));
}

/// Draws every instance of one mesh/material pair in fixed-size batches.
///
/// Buffers are sliced into `batch_size` instances per batch slot. A slot has
/// one base transform, one count and one local bounds; the instances inside
/// it are placed by per-instance local offsets relative to the base.
pub struct InstancedRenderSystem {
    batch_size: usize,
    mesh: MeshHandle,
    material: MaterialHandle,
    options: RenderOptions,
    default_capacity: usize,

    batch_capacity: usize,
    /// Instances in use = `batch_number * batch_size`.
    batch_number: usize,
    visible_number: usize,

    batch_local_to_world: Vec<Mat4>,
    batch_dirty_mask: Vec<bool>,
    batch_count: Vec<u32>,
    batch_local_bounds: Vec<Bounds>,

    instance_local_offset: Vec<Mat4>,
    instance_local_to_world: Vec<Mat4>,
    instance_world_to_local: Vec<Mat4>,
    instance_color: Vec<Vec4>,
    /// Compacted position -> instance slot.
    indirect_index_map: Vec<u32>,

    gpu: Option<GpuMirror>,

    local_offset_dirty: bool,
    transform_dirty: bool,
    bounds_dirty: bool,
    visible_dirty: bool,
    color_dirty: bool,

    cached_world_bounds: Bounds,

    batch_min_max: Vec<MinMax>,
    upload_matrices: Vec<Mat4>,
    upload_colors: Vec<Vec4>,

    disposed: bool,
}

impl InstancedRenderSystem {
    pub fn new(
        backend: &mut dyn GpuBackend,
        mesh: MeshHandle,
        material: MaterialHandle,
        batch_size: usize,
        default_capacity: usize,
        options: RenderOptions,
    ) -> Self {
        assert!(
            is_pow2(batch_size),
            "batch size {batch_size} is not a power of two"
        );

        let mut system = Self {
            batch_size,
            mesh,
            material,
            options,
            default_capacity: default_capacity.max(1),
            batch_capacity: 0,
            batch_number: 0,
            visible_number: 0,
            batch_local_to_world: Vec::new(),
            batch_dirty_mask: Vec::new(),
            batch_count: Vec::new(),
            batch_local_bounds: Vec::new(),
            instance_local_offset: Vec::new(),
            instance_local_to_world: Vec::new(),
            instance_world_to_local: Vec::new(),
            instance_color: Vec::new(),
            indirect_index_map: Vec::new(),
            gpu: None,
            local_offset_dirty: false,
            transform_dirty: false,
            bounds_dirty: false,
            visible_dirty: false,
            color_dirty: false,
            cached_world_bounds: Bounds::ZERO,
            batch_min_max: Vec::new(),
            upload_matrices: Vec::new(),
            upload_colors: Vec::new(),
            disposed: false,
        };
        system.setup(backend, system.default_capacity);
        system
    }

    /// Resizes every buffer to hold `capacity` batch slots. Existing content is
    /// kept up to the smaller of the old and new size; GPU buffers are
    /// recreated and fully re-uploaded on the next update.
    pub fn setup(&mut self, backend: &mut dyn GpuBackend, capacity: usize) {
        if self.disposed {
            return;
        }

        let instance_capacity = capacity * self.batch_size;
        if capacity != self.batch_capacity || self.gpu.is_none() {
            realloc(&mut self.instance_local_offset, instance_capacity, Mat4::IDENTITY);
            realloc(&mut self.instance_local_to_world, instance_capacity, Mat4::ZERO);
            realloc(&mut self.instance_world_to_local, instance_capacity, Mat4::ZERO);
            realloc(&mut self.instance_color, instance_capacity, Vec4::ONE);
            realloc(&mut self.indirect_index_map, instance_capacity, 0);

            realloc(&mut self.batch_local_to_world, capacity, Mat4::IDENTITY);
            realloc(&mut self.batch_dirty_mask, capacity, false);
            realloc(&mut self.batch_count, capacity, 0);
            realloc(&mut self.batch_local_bounds, capacity, Bounds::ZERO);

            if let Some(gpu) = self.gpu.take() {
                gpu.release(backend);
            }
            self.gpu = Some(GpuMirror::create(backend, instance_capacity));
        }

        self.batch_capacity = capacity;
        self.batch_number = self.batch_number.min(capacity);
        self.visible_number = self.visible_number.min(self.instance_number());
        self.visible_dirty = true;
    }

    /// Gives memory back once the system has been emptied.
    pub fn trim_excess(&mut self, backend: &mut dyn GpuBackend) {
        if self.batch_number == 0 && self.batch_capacity > self.default_capacity {
            log::debug!(
                "Trimming batch size {} system from {} to {} slots",
                self.batch_size,
                self.batch_capacity,
                self.default_capacity
            );
            self.setup(backend, self.default_capacity);
        }
    }

    pub fn write_local_offset_at(&mut self, slot: usize, offsets: &[Mat4]) {
        assert!(
            offsets.len() <= self.batch_size,
            "{} offsets do not fit batch size {}",
            offsets.len(),
            self.batch_size
        );
        let start = slot * self.batch_size;
        self.instance_local_offset[start..start + offsets.len()].copy_from_slice(offsets);
        self.batch_dirty_mask[slot] = true;
        self.local_offset_dirty = true;
    }

    pub fn write_local_bounds_at(&mut self, slot: usize, local_bounds: Bounds) {
        self.batch_local_bounds[slot] = local_bounds;
        self.bounds_dirty = true;
    }

    pub fn write_batch_local_to_world_at(&mut self, slot: usize, local_to_world: Mat4) {
        self.batch_local_to_world[slot] = local_to_world;
        self.batch_dirty_mask[slot] = true;
        self.transform_dirty = true;
    }

    /// Instances at offset `>= count` inside the slot are not drawn.
    pub fn write_batch_count_at(&mut self, slot: usize, count: usize) {
        assert!(
            count <= self.batch_size,
            "count {count} exceeds batch size {}",
            self.batch_size
        );
        self.batch_count[slot] = count as u32;
        self.batch_dirty_mask[slot] = true;
        self.transform_dirty = true;
    }

    pub fn write_batch_color_at(&mut self, slot: usize, color: Vec4) {
        let start = slot * self.batch_size;
        self.instance_color[start..start + self.batch_size].fill(color);
        self.color_dirty = true;
    }

    pub fn write_instance_color_at(&mut self, slot: usize, offset: usize, color: Vec4) {
        assert!(offset < self.batch_size);
        self.instance_color[slot * self.batch_size + offset] = color;
        self.color_dirty = true;
    }

    /// Swap-remove: the last active slot moves into `slot`, together with its
    /// whole instance block.
    pub fn erase_at(&mut self, slot: usize) {
        assert!(
            slot < self.batch_number,
            "erase of slot {slot} out of {} active slots",
            self.batch_number
        );

        self.batch_number -= 1;
        let last = self.batch_number;

        self.batch_local_to_world[slot] = self.batch_local_to_world[last];
        self.batch_dirty_mask[slot] = self.batch_dirty_mask[last];
        self.batch_count[slot] = self.batch_count[last];
        self.batch_local_bounds[slot] = self.batch_local_bounds[last];
        self.bounds_dirty = true;

        let batch_size = self.batch_size;
        let last_block = last * batch_size..(last + 1) * batch_size;
        let dst = slot * batch_size;
        self.instance_local_offset.copy_within(last_block.clone(), dst);
        self.instance_local_to_world.copy_within(last_block.clone(), dst);
        self.instance_world_to_local.copy_within(last_block.clone(), dst);
        self.instance_color.copy_within(last_block, dst);

        if self.batch_number == 0 {
            self.clear_visible();
        }
        self.visible_dirty = true;
    }

    fn clear_visible(&mut self) {
        self.visible_number = 0;
        self.cached_world_bounds = Bounds::ZERO;
    }

    /// Per-frame work: recompute what was dirtied, compact the visible
    /// instances, upload and draw.
    pub fn update(&mut self, backend: &mut dyn GpuBackend) {
        if self.disposed {
            return;
        }
        if self.batch_number < 1 {
            self.clear_visible();
            return;
        }
        let Some(gpu) = self.gpu else {
            return;
        };

        let batch_size = self.batch_size;
        let batch_number = self.batch_number;
        let instance_number = self.instance_number();

        if self.local_offset_dirty || self.transform_dirty || self.bounds_dirty {
            // Something moved or changed shape
            if self.transform_dirty || self.local_offset_dirty {
                jobs::mul_trs(
                    batch_size,
                    &self.batch_local_to_world[..batch_number],
                    &self.batch_dirty_mask[..batch_number],
                    &self.batch_count[..batch_number],
                    &self.instance_local_offset[..instance_number],
                    &mut self.instance_local_to_world[..instance_number],
                    &mut self.instance_world_to_local[..instance_number],
                );
                self.visible_dirty = true;
            }

            if self.transform_dirty || self.bounds_dirty {
                jobs::transform_bounds(
                    &self.batch_local_bounds[..batch_number],
                    &self.batch_local_to_world[..batch_number],
                    &mut self.batch_min_max,
                );
                self.cached_world_bounds = jobs::reduce_min_max(&self.batch_min_max).to_bounds();
            }

            self.local_offset_dirty = false;
            self.transform_dirty = false;
            self.bounds_dirty = false;
            self.batch_dirty_mask[..batch_number].fill(false);
        }

        if self.visible_dirty {
            self.visible_number = jobs::make_indirect_index_map(
                instance_number,
                batch_size,
                &self.batch_count[..batch_number],
                &mut self.indirect_index_map,
            );
            let indirect_index_map = &self.indirect_index_map[..self.visible_number];

            jobs::gather(
                indirect_index_map,
                &self.instance_local_to_world,
                &mut self.upload_matrices,
            );
            upload(backend, &gpu.local_to_world, &self.upload_matrices);

            jobs::gather(
                indirect_index_map,
                &self.instance_world_to_local,
                &mut self.upload_matrices,
            );
            upload(backend, &gpu.world_to_local, &self.upload_matrices);

            self.visible_dirty = false;
            // Order changed, colors have to follow
            self.color_dirty = true;
        }

        if self.color_dirty {
            jobs::gather(
                &self.indirect_index_map[..self.visible_number],
                &self.instance_color,
                &mut self.upload_colors,
            );
            upload(backend, &gpu.colors, &self.upload_colors);
            self.color_dirty = false;
        }

        self.draw(backend, &gpu);
    }

    fn draw(&self, backend: &mut dyn GpuBackend, gpu: &GpuMirror) {
        if self.visible_number < 1 {
            return;
        }

        for submesh in 0..self.mesh.submesh_count.max(1) {
            backend.draw(&DrawCall {
                mesh: self.mesh,
                material: self.material,
                submesh,
                instance_count: self.visible_number as u32,
                world_bounds: self.cached_world_bounds,
                options: self.options,
                buffers: gpu.ids(),
            });
        }
    }

    /// Releases GPU buffers first, then the host-side arrays. Safe to call
    /// twice.
    pub fn dispose(&mut self, backend: &mut dyn GpuBackend) {
        if self.disposed {
            return;
        }

        if let Some(gpu) = self.gpu.take() {
            gpu.release(backend);
        }

        self.instance_local_offset = Vec::new();
        self.instance_local_to_world = Vec::new();
        self.instance_world_to_local = Vec::new();
        self.instance_color = Vec::new();
        self.indirect_index_map = Vec::new();

        self.batch_local_to_world = Vec::new();
        self.batch_dirty_mask = Vec::new();
        self.batch_count = Vec::new();
        self.batch_local_bounds = Vec::new();

        self.batch_min_max = Vec::new();
        self.upload_matrices = Vec::new();
        self.upload_colors = Vec::new();

        self.batch_capacity = 0;
        self.batch_number = 0;
        self.visible_number = 0;
        self.disposed = true;
    }

    pub fn used_buffer_memory(&self) -> usize {
        used_memory(&self.batch_local_to_world)
            + used_memory(&self.batch_dirty_mask)
            + used_memory(&self.batch_count)
            + used_memory(&self.batch_local_bounds)
            + used_memory(&self.instance_local_offset)
            + used_memory(&self.instance_local_to_world)
            + used_memory(&self.instance_world_to_local)
            + used_memory(&self.instance_color)
            + used_memory(&self.indirect_index_map)
            + self.gpu.map_or(0, |gpu| gpu.byte_size())
    }

    pub fn set_batch_number(&mut self, batch_number: usize) {
        assert!(
            batch_number <= self.batch_capacity,
            "batch number {batch_number} exceeds capacity {}",
            self.batch_capacity
        );
        self.batch_number = batch_number;
    }

    pub fn is_valid(&self) -> bool {
        !self.disposed && self.batch_number <= self.batch_capacity
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn batch_capacity(&self) -> usize {
        self.batch_capacity
    }

    pub fn batch_number(&self) -> usize {
        self.batch_number
    }

    pub fn instance_number(&self) -> usize {
        self.batch_number * self.batch_size
    }

    pub fn visible_number(&self) -> usize {
        self.visible_number
    }

    pub fn default_capacity(&self) -> usize {
        self.default_capacity
    }

    pub fn world_bounds(&self) -> Bounds {
        self.cached_world_bounds
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    pub fn set_options(&mut self, options: RenderOptions) {
        self.options = options;
    }

    pub fn mesh(&self) -> MeshHandle {
        self.mesh
    }

    pub fn material(&self) -> MaterialHandle {
        self.material
    }

    pub fn gpu_buffers(&self) -> Option<InstanceBuffers> {
        self.gpu.map(|gpu| gpu.ids())
    }

    /// The compacted index list produced by the last update.
    pub fn indirect_index_map(&self) -> &[u32] {
        &self.indirect_index_map[..self.visible_number]
    }

    pub fn batch_local_to_world(&self, slot: usize) -> Mat4 {
        self.batch_local_to_world[slot]
    }

    pub fn batch_count(&self, slot: usize) -> usize {
        self.batch_count[slot] as usize
    }

    pub fn batch_local_bounds(&self, slot: usize) -> Bounds {
        self.batch_local_bounds[slot]
    }

    pub fn instance_local_offset(&self, instance: usize) -> Mat4 {
        self.instance_local_offset[instance]
    }

    pub fn instance_local_to_world(&self, instance: usize) -> Mat4 {
        self.instance_local_to_world[instance]
    }

    pub fn instance_world_to_local(&self, instance: usize) -> Mat4 {
        self.instance_world_to_local[instance]
    }

    pub fn instance_color(&self, instance: usize) -> Vec4 {
        self.instance_color[instance]
    }
}

#[cfg(test)]
mod tests {
    use glam::{Quat, Vec3};

    use super::*;
    use crate::rendering::gpu::HeadlessBackend;

    fn system(backend: &mut HeadlessBackend, batch_size: usize, capacity: usize) -> InstancedRenderSystem {
        InstancedRenderSystem::new(
            backend,
            MeshHandle::default(),
            MaterialHandle(7),
            batch_size,
            capacity,
            RenderOptions::default(),
        )
    }

    fn fill_slot(
        system: &mut InstancedRenderSystem,
        slot: usize,
        base: Mat4,
        offsets: &[Mat4],
        count: usize,
        color: Vec4,
    ) {
        system.write_local_offset_at(slot, offsets);
        system.write_batch_local_to_world_at(slot, base);
        system.write_batch_count_at(slot, count);
        system.write_local_bounds_at(slot, Bounds::from_center_size(Vec3::ZERO, Vec3::ONE));
        system.write_batch_color_at(slot, color);
    }

    #[test]
    fn basic_single_batch() {
        let mut backend = HeadlessBackend::new();
        let mut system = system(&mut backend, 4, 1);
        system.set_batch_number(1);

        fill_slot(&mut system, 0, Mat4::IDENTITY, &[Mat4::IDENTITY; 4], 4, Vec4::ONE);
        system.update(&mut backend);

        assert_eq!(system.visible_number(), 4);
        for i in 0..4 {
            assert_eq!(system.instance_local_to_world(i), Mat4::IDENTITY);
        }
        assert!(system
            .world_bounds()
            .approx_eq(&Bounds::from_center_size(Vec3::ZERO, Vec3::ONE)));

        let draws = backend.draws();
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].instance_count, 4);
        assert_eq!(draws[0].material, MaterialHandle(7));

        let buffers = system.gpu_buffers().unwrap();
        let uploaded: Vec<Mat4> = backend.read_buffer(buffers.local_to_world, 4);
        assert_eq!(uploaded, vec![Mat4::IDENTITY; 4]);
        let colors: Vec<Vec4> = backend.read_buffer(buffers.colors, 4);
        assert_eq!(colors, vec![Vec4::ONE; 4]);
    }

    #[test]
    fn world_transform_is_batch_times_offset() {
        let mut backend = HeadlessBackend::new();
        let mut system = system(&mut backend, 4, 2);
        system.set_batch_number(2);

        let base = Mat4::from_scale_rotation_translation(
            Vec3::splat(2.0),
            Quat::from_rotation_y(0.5),
            Vec3::new(3.0, 0.0, -1.0),
        );
        let offsets: Vec<Mat4> = (0..4)
            .map(|i| Mat4::from_translation(Vec3::new(i as f32, 0.0, 0.0)))
            .collect();

        fill_slot(&mut system, 0, Mat4::IDENTITY, &offsets, 4, Vec4::ONE);
        fill_slot(&mut system, 1, base, &offsets, 3, Vec4::ONE);
        system.update(&mut backend);

        for k in 0..3 {
            let expected = base * offsets[k];
            let actual = system.instance_local_to_world(4 + k);
            assert!(actual.abs_diff_eq(expected, 1e-5));
            let inverse = system.instance_world_to_local(4 + k);
            assert!((inverse * actual).abs_diff_eq(Mat4::IDENTITY, 1e-4));
        }
        // instance past the count is excluded
        assert!(!system.indirect_index_map().contains(&7));
        assert_eq!(system.visible_number(), 7);
    }

    #[test]
    fn compaction_keeps_first_count_slots_in_order() {
        let mut backend = HeadlessBackend::new();
        let mut system = system(&mut backend, 4, 3);
        system.set_batch_number(3);

        let offsets = [Mat4::IDENTITY; 4];
        fill_slot(&mut system, 0, Mat4::IDENTITY, &offsets, 1, Vec4::ONE);
        fill_slot(&mut system, 1, Mat4::IDENTITY, &offsets, 4, Vec4::ONE);
        fill_slot(&mut system, 2, Mat4::IDENTITY, &offsets, 2, Vec4::ONE);
        system.update(&mut backend);

        assert_eq!(system.visible_number(), 1 + 4 + 2);
        assert_eq!(system.indirect_index_map(), &[0, 4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn colors_follow_the_compacted_order() {
        let mut backend = HeadlessBackend::new();
        let mut system = system(&mut backend, 2, 2);
        system.set_batch_number(2);

        let red = Vec4::new(1.0, 0.0, 0.0, 1.0);
        let blue = Vec4::new(0.0, 0.0, 1.0, 1.0);
        fill_slot(&mut system, 0, Mat4::IDENTITY, &[Mat4::IDENTITY; 2], 1, red);
        fill_slot(&mut system, 1, Mat4::IDENTITY, &[Mat4::IDENTITY; 2], 2, blue);
        system.write_instance_color_at(1, 1, Vec4::ZERO);
        system.update(&mut backend);

        let buffers = system.gpu_buffers().unwrap();
        let colors: Vec<Vec4> = backend.read_buffer(buffers.colors, 3);
        assert_eq!(colors, vec![red, blue, Vec4::ZERO]);
    }

    #[test]
    fn unchanged_frames_do_not_upload() {
        let mut backend = HeadlessBackend::new();
        let mut system = system(&mut backend, 2, 1);
        system.set_batch_number(1);
        fill_slot(&mut system, 0, Mat4::IDENTITY, &[Mat4::IDENTITY; 2], 2, Vec4::ONE);

        system.update(&mut backend);
        let uploads = backend.upload_count();
        system.update(&mut backend);
        assert_eq!(backend.upload_count(), uploads);
        assert_eq!(backend.draws().len(), 2);

        system.write_batch_color_at(0, Vec4::ZERO);
        system.update(&mut backend);
        assert_eq!(backend.upload_count(), uploads + 1);
    }

    #[test]
    fn erase_moves_last_slot_into_hole() {
        let mut backend = HeadlessBackend::new();
        let mut system = system(&mut backend, 2, 4);
        system.set_batch_number(3);

        for slot in 0..3 {
            let offsets = [Mat4::from_translation(Vec3::splat(slot as f32)); 2];
            fill_slot(
                &mut system,
                slot,
                Mat4::from_translation(Vec3::X * slot as f32),
                &offsets,
                slot.min(2),
                Vec4::splat(slot as f32),
            );
        }
        system.update(&mut backend);

        system.erase_at(0);
        assert_eq!(system.batch_number(), 2);
        assert_eq!(system.instance_number(), 4);
        assert_eq!(system.batch_local_to_world(0), Mat4::from_translation(Vec3::X * 2.0));
        assert_eq!(system.batch_count(0), 2);
        assert_eq!(system.instance_local_offset(0), Mat4::from_translation(Vec3::splat(2.0)));
        assert_eq!(system.instance_color(1), Vec4::splat(2.0));

        system.update(&mut backend);
        assert_eq!(system.visible_number(), 2 + 1);
    }

    #[test]
    fn growth_preserves_existing_slots() {
        let mut backend = HeadlessBackend::new();
        let mut system = system(&mut backend, 2, 1);
        system.set_batch_number(1);
        let base = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        fill_slot(&mut system, 0, base, &[Mat4::IDENTITY; 2], 2, Vec4::ONE);

        system.setup(&mut backend, 2);
        assert_eq!(system.batch_capacity(), 2);
        assert_eq!(system.batch_number(), 1);
        assert_eq!(system.batch_local_to_world(0), base);
        assert_eq!(system.batch_count(0), 2);

        system.update(&mut backend);
        assert_eq!(system.visible_number(), 2);
        assert!(system.instance_local_to_world(1).abs_diff_eq(base, 1e-6));
    }

    #[test]
    fn trim_only_when_empty() {
        let mut backend = HeadlessBackend::new();
        let mut system = system(&mut backend, 2, 2);
        system.setup(&mut backend, 16);
        system.set_batch_number(1);

        system.trim_excess(&mut backend);
        assert_eq!(system.batch_capacity(), 16);

        system.erase_at(0);
        system.trim_excess(&mut backend);
        assert_eq!(system.batch_capacity(), 2);
        // old GPU buffers were released
        assert_eq!(backend.buffer_count(), 3);
    }

    #[test]
    fn emptied_system_draws_nothing_and_trims() {
        let mut backend = HeadlessBackend::new();
        let mut system = system(&mut backend, 1, 2);
        system.setup(&mut backend, 8);
        system.set_batch_number(3);
        for slot in 0..3 {
            fill_slot(
                &mut system,
                slot,
                Mat4::from_translation(Vec3::X * slot as f32),
                &[Mat4::IDENTITY],
                1,
                Vec4::ONE,
            );
        }
        system.update(&mut backend);
        assert_eq!(system.visible_number(), 3);
        let draws = backend.take_draws().len();
        assert_eq!(draws, 1);

        system.erase_at(2);
        system.erase_at(1);
        system.erase_at(0);
        assert_eq!(system.visible_number(), 0);
        assert_eq!(system.world_bounds(), Bounds::ZERO);

        system.update(&mut backend);
        assert_eq!(system.visible_number(), 0);
        assert!(system.visible_number() <= system.instance_number());
        assert!(backend.draws().is_empty());

        system.trim_excess(&mut backend);
        assert_eq!(system.batch_capacity(), 2);
        assert!(system.indirect_index_map().is_empty());

        system.update(&mut backend);
        assert_eq!(system.visible_number(), 0);
        assert_eq!(system.world_bounds(), Bounds::ZERO);
    }

    #[test]
    fn shrinking_setup_keeps_visible_within_instances() {
        let mut backend = HeadlessBackend::new();
        let mut system = system(&mut backend, 2, 4);
        system.set_batch_number(4);
        for slot in 0..4 {
            fill_slot(&mut system, slot, Mat4::IDENTITY, &[Mat4::IDENTITY; 2], 2, Vec4::ONE);
        }
        system.update(&mut backend);
        assert_eq!(system.visible_number(), 8);

        system.setup(&mut backend, 1);
        assert_eq!(system.batch_number(), 1);
        assert!(system.visible_number() <= system.instance_number());
        assert!(system.indirect_index_map().len() <= 2);

        system.update(&mut backend);
        assert_eq!(system.visible_number(), 2);
    }

    #[test]
    fn memory_accounting_and_dispose() {
        let mut backend = HeadlessBackend::new();
        let mut system = system(&mut backend, 4, 2);

        let batch_bytes = 2 * (64 + 1 + 4 + 24);
        let instance_bytes = 8 * (64 * 3 + 16 + 4);
        let gpu_bytes = 8 * (64 * 2 + 16);
        assert_eq!(system.used_buffer_memory(), batch_bytes + instance_bytes + gpu_bytes);

        system.dispose(&mut backend);
        system.dispose(&mut backend);
        assert!(system.is_disposed());
        assert_eq!(system.used_buffer_memory(), 0);
        assert_eq!(backend.buffer_count(), 0);

        system.update(&mut backend);
        assert!(backend.draws().is_empty());
    }
}
