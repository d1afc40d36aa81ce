//! Data-parallel stages run by `InstancedRenderSystem::update`. Every stage is
//! a map over a known index range and returns only after all its work is
//! done, so the caller chains them in dependency order.

use glam::Mat4;
use rayon::prelude::*;

use crate::math::bounds::{Bounds, MinMax};

/// Work items handed to one rayon task at minimum.
const INSTANCES_PER_TASK: usize = 64;
const GATHER_PER_TASK: usize = 128;

/// `local_to_world = batch ⊗ offset` plus its inverse, for every instance of a
/// batch whose dirty bit is set. Instances past the batch count are zeroed.
#[allow(clippy::too_many_arguments)]
pub fn mul_trs(
    batch_size: usize,
    batch_local_to_world: &[Mat4],
    batch_dirty_mask: &[bool],
    batch_count: &[u32],
    local_offsets: &[Mat4],
    local_to_world: &mut [Mat4],
    world_to_local: &mut [Mat4],
) {
    local_to_world
        .par_chunks_mut(batch_size)
        .zip(world_to_local.par_chunks_mut(batch_size))
        .zip(local_offsets.par_chunks(batch_size))
        .enumerate()
        .with_min_len((INSTANCES_PER_TASK / batch_size).max(1))
        .for_each(|(batch, ((local_to_world, world_to_local), offsets))| {
            let count = batch_count[batch] as usize;
            let dirty = batch_dirty_mask[batch];
            let base = batch_local_to_world[batch];

            let instances = local_to_world
                .iter_mut()
                .zip(world_to_local.iter_mut())
                .zip(offsets);
            for (k, ((local_to_world, world_to_local), offset)) in instances.enumerate() {
                if k >= count {
                    *local_to_world = Mat4::ZERO;
                    *world_to_local = Mat4::ZERO;
                } else if dirty {
                    let matrix = base * *offset;
                    *local_to_world = matrix;
                    *world_to_local = matrix.inverse();
                }
            }
        });
}

/// World-space min/max of each batch's local bounds.
pub fn transform_bounds(
    local_bounds: &[Bounds],
    batch_local_to_world: &[Mat4],
    output: &mut Vec<MinMax>,
) {
    local_bounds
        .par_iter()
        .zip(batch_local_to_world)
        .with_min_len(INSTANCES_PER_TASK)
        .map(|(bounds, local_to_world)| bounds.transform(local_to_world))
        .collect_into_vec(output);
}

pub fn reduce_min_max(min_max: &[MinMax]) -> MinMax {
    min_max
        .par_iter()
        .with_min_len(INSTANCES_PER_TASK)
        .copied()
        .reduce(|| MinMax::EMPTY, MinMax::merge)
}

/// Stream compaction: writes the index of every live instance slot into
/// `indirect_index_map` in slot order and returns how many were written.
pub fn make_indirect_index_map(
    instance_number: usize,
    batch_size: usize,
    batch_count: &[u32],
    indirect_index_map: &mut [u32],
) -> usize {
    let mut visible = 0;
    for i in 0..instance_number {
        if (i % batch_size) < batch_count[i / batch_size] as usize {
            indirect_index_map[visible] = i as u32;
            visible += 1;
        }
    }
    visible
}

/// Gathers `src` through the compacted index map into a contiguous buffer.
pub fn gather<T: Copy + Send + Sync>(indirect_index_map: &[u32], src: &[T], dst: &mut Vec<T>) {
    indirect_index_map
        .par_iter()
        .with_min_len(GATHER_PER_TASK)
        .map(|&index| src[index as usize])
        .collect_into_vec(dst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn mul_trs_only_touches_dirty_batches() {
        let batch_size = 2;
        let bases = [
            Mat4::from_translation(Vec3::X),
            Mat4::from_translation(Vec3::Y),
        ];
        let offsets = [Mat4::from_translation(Vec3::Z); 4];
        let mut local_to_world = [Mat4::IDENTITY; 4];
        let mut world_to_local = [Mat4::IDENTITY; 4];

        mul_trs(
            batch_size,
            &bases,
            &[true, false],
            &[1, 2],
            &offsets,
            &mut local_to_world,
            &mut world_to_local,
        );

        assert_eq!(local_to_world[0], Mat4::from_translation(Vec3::X + Vec3::Z));
        assert!(world_to_local[0]
            .abs_diff_eq(Mat4::from_translation(-(Vec3::X + Vec3::Z)), 1e-6));
        // past the count of batch 0
        assert_eq!(local_to_world[1], Mat4::ZERO);
        // batch 1 was not dirty
        assert_eq!(local_to_world[2], Mat4::IDENTITY);
        assert_eq!(local_to_world[3], Mat4::IDENTITY);
    }

    #[test]
    fn indirect_map_keeps_first_count_slots_of_each_batch() {
        let mut map = [u32::MAX; 12];
        let visible = make_indirect_index_map(12, 4, &[2, 0, 3], &mut map);
        assert_eq!(visible, 5);
        assert_eq!(&map[..visible], &[0, 1, 8, 9, 10]);
    }

    #[test]
    fn bounds_reduce_to_global_box() {
        let local = [Bounds::from_center_size(Vec3::ZERO, Vec3::ONE); 2];
        let transforms = [
            Mat4::from_translation(Vec3::new(-5.0, 0.0, 0.0)),
            Mat4::from_translation(Vec3::new(5.0, 0.0, 0.0)),
        ];
        let mut per_batch = Vec::new();
        transform_bounds(&local, &transforms, &mut per_batch);
        assert_eq!(per_batch.len(), 2);

        let world = reduce_min_max(&per_batch).to_bounds();
        assert_eq!(world.min(), Vec3::new(-5.5, -0.5, -0.5));
        assert_eq!(world.max(), Vec3::new(5.5, 0.5, 0.5));
    }

    #[test]
    fn gather_follows_map() {
        let src = [10, 11, 12, 13];
        let mut dst = Vec::new();
        gather(&[3, 0], &src, &mut dst);
        assert_eq!(dst, vec![13, 10]);
    }
}
