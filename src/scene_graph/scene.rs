use glam::{Mat4, Quat, Vec3};
use id_arena::Arena;

use crate::scene_graph::{
    object3d::{Object3D, ObjectId},
    transform::Transform,
    TransformProvider,
};

/// Arena of objects linked into a parent/child hierarchy.
pub struct Scene {
    pub objects: Arena<Object3D>,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    pub fn new() -> Self {
        Self {
            objects: Arena::new(),
        }
    }

    pub fn add_object(&mut self, object: Object3D) -> ObjectId {
        self.objects.alloc(object)
    }

    pub fn add_child(&mut self, parent: ObjectId, object: Object3D) -> ObjectId {
        let id = self.add_object(object);
        self.set_object_parent(id, Some(parent));
        id
    }

    pub fn get_object(&self, id: ObjectId) -> Option<&Object3D> {
        self.objects.get(id)
    }

    pub fn get_object_mut(&mut self, id: ObjectId) -> Option<&mut Object3D> {
        self.objects.get_mut(id)
    }

    pub fn get_object_by_name(&self, name: &str) -> Option<ObjectId> {
        self.objects
            .iter()
            .find_map(|(id, object)| (object.name == name).then_some(id))
    }

    /// Marks the world matrix of `id` and everything below it stale.
    pub fn invalidate_object_hierarchy(&self, id: ObjectId) {
        let mut pending = vec![id];
        while let Some(id) = pending.pop() {
            if let Some(object) = self.objects.get(id) {
                object.transform.invalidate_world();
                pending.extend_from_slice(&object.child_ids);
            }
        }
    }

    pub fn set_object_parent(&mut self, child: ObjectId, parent: Option<ObjectId>) {
        let Some(old_parent) = self.objects.get(child).map(|object| object.parent_id) else {
            return;
        };

        if let Some(old) = old_parent.and_then(|id| self.objects.get_mut(id)) {
            old.child_ids.retain(|&id| id != child);
        }
        if let Some(new) = parent.and_then(|id| self.objects.get_mut(id)) {
            new.child_ids.push(child);
        }
        self.objects[child].parent_id = parent;

        self.invalidate_object_hierarchy(child);
    }

    fn edit_transform(&mut self, id: ObjectId, edit: impl FnOnce(&mut Transform)) {
        let Some(object) = self.objects.get_mut(id) else {
            return;
        };
        edit(&mut object.transform);
        self.invalidate_object_hierarchy(id);
    }

    pub fn set_object_translation(&mut self, id: ObjectId, translation: Vec3) {
        self.edit_transform(id, |transform| transform.set_translation(translation));
    }

    pub fn set_object_rotation(&mut self, id: ObjectId, rotation: Quat) {
        self.edit_transform(id, |transform| transform.set_rotation(rotation));
    }

    pub fn set_object_scale(&mut self, id: ObjectId, scale: Vec3) {
        self.edit_transform(id, |transform| transform.set_scale(scale));
    }

    pub fn set_object_transform(&mut self, id: ObjectId, translation: Vec3, rotation: Quat, scale: Vec3) {
        self.edit_transform(id, |transform| transform.set_trs(translation, rotation, scale));
    }

    pub fn get_object_transform(&self, id: ObjectId) -> Option<&Transform> {
        self.objects.get(id).map(|object| &object.transform)
    }

    /// Start of frame: forget which transforms moved last frame.
    pub fn early_update(&mut self) {
        for (_, object) in self.objects.iter() {
            object.transform.clear_moved();
        }
    }

    /// End of frame: recompute stale world matrices, parents before children.
    pub fn late_update(&mut self) {
        let mut pending: Vec<(ObjectId, Mat4)> = self
            .objects
            .iter()
            .filter(|(_, object)| object.parent_id.is_none())
            .map(|(id, _)| (id, Mat4::IDENTITY))
            .collect();

        while let Some((id, parent_world)) = pending.pop() {
            let object = &self.objects[id];
            let world = match object.transform.world_matrix() {
                Some(world) => world,
                None => {
                    let world = parent_world * object.transform.local_matrix();
                    object.transform.set_world_matrix(world);
                    world
                }
            };
            pending.extend(object.child_ids.iter().map(|&child| (child, world)));
        }
    }
}

impl TransformProvider for Scene {
    /// Cached world matrix when current, otherwise the product up the parent
    /// chain.
    fn local_to_world(&self, id: ObjectId) -> Option<Mat4> {
        let mut object = self.objects.get(id)?;
        let mut matrix = Mat4::IDENTITY;
        loop {
            if let Some(world) = object.transform.world_matrix() {
                return Some(world * matrix);
            }
            matrix = object.transform.local_matrix() * matrix;
            match object.parent_id {
                Some(parent) => object = self.objects.get(parent)?,
                None => return Some(matrix),
            }
        }
    }
}
