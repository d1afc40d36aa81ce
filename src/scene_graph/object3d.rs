use id_arena::Id;

use crate::scene_graph::{scene::Scene, transform::Transform};

pub type ObjectId = Id<Object3D>;

/// A node of the host scene. Instance tokens hang off these.
#[derive(Debug, Default)]
pub struct Object3D {
    pub name: String,
    pub transform: Transform,
    pub parent_id: Option<ObjectId>,
    pub child_ids: Vec<ObjectId>,
}

impl Object3D {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn parent<'s>(&self, scene: &'s Scene) -> Option<&'s Object3D> {
        scene.get_object(self.parent_id?)
    }

    pub fn children<'s>(&'s self, scene: &'s Scene) -> impl Iterator<Item = &'s Object3D> + 's {
        self.child_ids.iter().filter_map(move |&id| scene.get_object(id))
    }
}
