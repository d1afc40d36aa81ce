use glam::{Mat4, Vec4};
use slotmap::new_key_type;

use crate::{
    math::{
        bounds::Bounds,
        ceil_pow2,
        compare::{color_approx_eq, matrix_approx_eq},
    },
    rendering::instancing::MAX_BATCH_SIZE,
    scene_graph::object3d::ObjectId,
};

new_key_type! {
    pub struct TokenId;
}

/// Offsets allocated for a fresh token.
pub const DEFAULT_BUFFER_SIZE: usize = 64;
const MIN_BATCH_SIZE: usize = 1;
/// A token only shrinks its offset buffer when the new size is below this
/// fraction of the current one.
const TRIM_RATIO: f32 = 0.9;

/// A group of instances attached to one scene object, drawn by the dispatcher
/// registered under `dispatcher_name`.
///
/// Setters only record state and raise dirty flags. Nothing reaches a render
/// system until the token is dispatched through its `InstancingWorld`.
#[derive(Debug, Clone)]
pub struct InstanceToken {
    object: ObjectId,
    dispatcher_name: String,
    local_bounds: Bounds,
    color: Vec4,
    /// Per-instance tints overriding `color` for the first instances.
    instance_colors: Vec<Vec4>,
    local_offsets: Vec<Mat4>,
    /// Requested slot size, a power of two.
    batch_size: usize,
    count: usize,
    batch_index: Option<usize>,

    active: bool,
    force_rendering_off: bool,

    instance_updated: bool,
    volume_updated: bool,
    material_property_updated: bool,
}

impl InstanceToken {
    pub fn new(object: ObjectId, dispatcher_name: impl Into<String>) -> Self {
        Self {
            object,
            dispatcher_name: dispatcher_name.into(),
            local_bounds: Bounds::ZERO,
            color: Vec4::ONE,
            instance_colors: Vec::new(),
            local_offsets: vec![Mat4::IDENTITY; DEFAULT_BUFFER_SIZE],
            batch_size: DEFAULT_BUFFER_SIZE,
            count: 0,
            batch_index: None,
            active: false,
            force_rendering_off: false,
            instance_updated: false,
            volume_updated: false,
            material_property_updated: false,
        }
    }

    /// A token drawing one instance at the object's own transform.
    pub fn single(object: ObjectId, dispatcher_name: impl Into<String>, local_bounds: Bounds) -> Self {
        let mut token = Self::new(object, dispatcher_name);
        token.make_single_instance();
        token.set_local_bounds(local_bounds);
        token
    }

    pub fn object(&self) -> ObjectId {
        self.object
    }

    pub fn dispatcher_name(&self) -> &str {
        &self.dispatcher_name
    }

    pub fn set_dispatcher_name(&mut self, name: impl Into<String>) {
        self.dispatcher_name = name.into();
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Changes the number of drawn instances. The batch size follows as the
    /// next power of two and the offset buffer grows to fit it.
    pub fn set_count(&mut self, count: usize) {
        let count = if count > MAX_BATCH_SIZE {
            log::warn!(
                "[{}] count {} clamped to {}",
                self.dispatcher_name,
                count,
                MAX_BATCH_SIZE
            );
            MAX_BATCH_SIZE
        } else {
            count
        };

        if self.count != count {
            self.batch_size = ceil_pow2(count).max(MIN_BATCH_SIZE);
            if self.batch_size > self.capacity() {
                self.local_offsets.resize(self.batch_size, Mat4::IDENTITY);
            }
            self.count = count;
            self.instance_updated = true;
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn capacity(&self) -> usize {
        self.local_offsets.len()
    }

    /// Slot inside the assigned render system, if any.
    pub fn batch_index(&self) -> Option<usize> {
        self.batch_index
    }

    pub(crate) fn set_batch_index(&mut self, batch_index: Option<usize>) {
        self.batch_index = batch_index;
    }

    pub fn local_offset(&self, index: usize) -> Mat4 {
        self.local_offsets[index]
    }

    /// Raw access. Call `mark_offsets_updated` and dispatch afterwards.
    pub fn local_offset_mut(&mut self, index: usize) -> &mut Mat4 {
        &mut self.local_offsets[index]
    }

    pub fn set_local_offset(&mut self, index: usize, offset: Mat4) {
        self.local_offsets[index] = offset;
        self.instance_updated = true;
    }

    /// The offsets of the instances being drawn.
    pub fn active_local_offsets(&self) -> &[Mat4] {
        &self.local_offsets[..self.count.min(self.local_offsets.len())]
    }

    pub fn mark_offsets_updated(&mut self) {
        self.instance_updated = true;
    }

    /// Resets the whole buffer to identity.
    pub fn init_local_offsets(&mut self) {
        self.local_offsets.fill(Mat4::IDENTITY);
    }

    pub fn clear_local_offsets_out_of_count(&mut self) {
        let count = self.count.min(self.local_offsets.len());
        self.local_offsets[count..].fill(Mat4::ZERO);
        self.instance_updated = true;
    }

    /// Copies `offsets` in as the new instance set.
    pub fn set_instance_offsets(&mut self, offsets: &[Mat4]) {
        self.set_count(offsets.len());
        let count = self.count;
        self.local_offsets[..count].copy_from_slice(&offsets[..count]);
        self.clear_local_offsets_out_of_count();
    }

    pub fn make_single_instance(&mut self) {
        self.batch_size = 1;
        self.count = 1;
        self.init_local_offsets();
        self.instance_updated = true;
    }

    pub fn is_single_instance(&self) -> bool {
        self.batch_size == 1
            && self.count == 1
            && self.capacity() > 0
            && matrix_approx_eq(&self.local_offsets[0], &Mat4::IDENTITY)
    }

    /// Shrinks the offset buffer to the smallest batch that still holds
    /// `count`. The token has to be dispatched again to move levels.
    pub fn trim_excess(&mut self) {
        let batch_size = ceil_pow2(self.count).max(MIN_BATCH_SIZE);
        if (batch_size as f32) < self.local_offsets.len() as f32 * TRIM_RATIO {
            self.local_offsets.truncate(batch_size);
            self.local_offsets.shrink_to_fit();
            self.batch_size = batch_size;
            self.instance_updated = true;
        }
    }

    pub fn local_bounds(&self) -> Bounds {
        self.local_bounds
    }

    pub fn set_local_bounds(&mut self, local_bounds: Bounds) {
        if !self.local_bounds.approx_eq(&local_bounds) {
            self.local_bounds = local_bounds;
            self.volume_updated = true;
        }
    }

    pub fn color(&self) -> Vec4 {
        self.color
    }

    pub fn set_color(&mut self, color: Vec4) {
        if !color_approx_eq(self.color, color) {
            self.color = color;
            self.material_property_updated = true;
        }
    }

    pub fn instance_colors(&self) -> &[Vec4] {
        &self.instance_colors
    }

    /// Tints instance `i` with `colors[i]`; instances past the slice keep
    /// the token color.
    pub fn set_instance_colors(&mut self, colors: &[Vec4]) {
        self.instance_colors.clear();
        self.instance_colors.extend_from_slice(colors);
        self.material_property_updated = true;
    }

    pub fn clear_instance_colors(&mut self) {
        if !self.instance_colors.is_empty() {
            self.instance_colors.clear();
            self.material_property_updated = true;
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub(crate) fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn force_rendering_off(&self) -> bool {
        self.force_rendering_off
    }

    /// Returns whether the flag changed.
    pub(crate) fn set_force_rendering_off(&mut self, value: bool) -> bool {
        let changed = self.force_rendering_off != value;
        self.force_rendering_off = value;
        changed
    }

    pub fn is_alive(&self) -> bool {
        self.active && !self.force_rendering_off
    }

    /// Re-derives the batch size from the count and raises every dirty flag,
    /// so the next dispatch rewrites the whole slot.
    pub(crate) fn wake_up(&mut self) {
        self.batch_size = if self.batch_size < 2 {
            MIN_BATCH_SIZE
        } else {
            ceil_pow2(self.count).max(MIN_BATCH_SIZE)
        };
        if self.batch_size > self.capacity() {
            self.local_offsets.resize(self.batch_size, Mat4::IDENTITY);
        }
        self.instance_updated = true;
        self.volume_updated = true;
        self.material_property_updated = true;
    }

    pub(crate) fn take_instance_updated(&mut self) -> bool {
        std::mem::take(&mut self.instance_updated)
    }

    pub(crate) fn take_volume_updated(&mut self) -> bool {
        std::mem::take(&mut self.volume_updated)
    }

    pub(crate) fn take_material_property_updated(&mut self) -> bool {
        std::mem::take(&mut self.material_property_updated)
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;
    use id_arena::Arena;

    use super::*;
    use crate::scene_graph::object3d::Object3D;

    fn object() -> ObjectId {
        let mut arena = Arena::<Object3D>::new();
        arena.alloc(Object3D::default())
    }

    #[test]
    fn count_drives_batch_size() {
        let mut token = InstanceToken::new(object(), "D");
        assert_eq!(token.batch_size(), DEFAULT_BUFFER_SIZE);

        token.set_count(3);
        assert_eq!(token.batch_size(), 4);
        assert!(token.take_instance_updated());
        assert!(!token.take_instance_updated());

        token.set_count(100);
        assert_eq!(token.batch_size(), 128);
        assert_eq!(token.capacity(), 128);

        token.set_count(0);
        assert_eq!(token.batch_size(), 1);
    }

    #[test]
    fn count_is_clamped_to_largest_level() {
        let mut token = InstanceToken::new(object(), "D");
        token.set_count(MAX_BATCH_SIZE + 5);
        assert_eq!(token.count(), MAX_BATCH_SIZE);
        assert_eq!(token.batch_size(), MAX_BATCH_SIZE);
    }

    #[test]
    fn trim_shrinks_buffer_to_count() {
        let mut token = InstanceToken::new(object(), "D");
        token.set_count(5);
        token.take_instance_updated();
        assert_eq!(token.capacity(), DEFAULT_BUFFER_SIZE);

        token.trim_excess();
        assert_eq!(token.capacity(), 8);
        assert_eq!(token.batch_size(), 8);
        assert!(token.take_instance_updated());

        // 8 is not below 0.9 * 8
        token.trim_excess();
        assert!(!token.take_instance_updated());
    }

    #[test]
    fn single_instance_round_trip() {
        let mut token = InstanceToken::new(object(), "D");
        assert!(!token.is_single_instance());
        token.make_single_instance();
        assert!(token.is_single_instance());

        token.set_local_offset(0, Mat4::from_translation(Vec3::X));
        assert!(!token.is_single_instance());
    }

    #[test]
    fn setters_ignore_near_equal_values() {
        let mut token = InstanceToken::new(object(), "D");
        token.set_color(Vec4::new(1.0, 1.0, 1.0, 1.0 + 1e-7));
        assert!(!token.take_material_property_updated());

        token.set_color(Vec4::new(1.0, 0.0, 0.0, 1.0));
        assert!(token.take_material_property_updated());

        let bounds = Bounds::from_center_size(Vec3::ZERO, Vec3::ONE);
        token.set_local_bounds(bounds);
        assert!(token.take_volume_updated());
        token.set_local_bounds(bounds);
        assert!(!token.take_volume_updated());
    }

    #[test]
    fn instance_colors_raise_material_flag() {
        let mut token = InstanceToken::new(object(), "D");
        token.clear_instance_colors();
        assert!(!token.take_material_property_updated());

        token.set_instance_colors(&[Vec4::ZERO, Vec4::X]);
        assert_eq!(token.instance_colors(), &[Vec4::ZERO, Vec4::X]);
        assert!(token.take_material_property_updated());

        token.clear_instance_colors();
        assert!(token.instance_colors().is_empty());
        assert!(token.take_material_property_updated());
    }

    #[test]
    fn dispatcher_name_is_replaced() {
        let mut token = InstanceToken::new(object(), "A");
        token.set_dispatcher_name("B");
        assert_eq!(token.dispatcher_name(), "B");
    }

    #[test]
    fn instance_offsets_replace_and_clear_tail() {
        let mut token = InstanceToken::new(object(), "D");
        let offsets: Vec<Mat4> = (0..3)
            .map(|i| Mat4::from_translation(Vec3::X * i as f32))
            .collect();
        token.set_instance_offsets(&offsets);

        assert_eq!(token.count(), 3);
        assert_eq!(token.batch_size(), 4);
        assert_eq!(token.active_local_offsets(), offsets.as_slice());
        assert_eq!(token.local_offset(3), Mat4::ZERO);
    }

    #[test]
    fn wake_up_recomputes_batch_size() {
        let mut token = InstanceToken::new(object(), "D");
        token.set_count(5);
        token.take_instance_updated();
        token.wake_up();
        assert_eq!(token.batch_size(), 8);
        assert!(token.take_instance_updated());
        assert!(token.take_volume_updated());
        assert!(token.take_material_property_updated());

        token.make_single_instance();
        token.wake_up();
        assert_eq!(token.batch_size(), 1);
    }
}
