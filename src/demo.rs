use std::time::Instant;

use anyhow::Context;
use glam::{Mat4, Quat, Vec3, Vec4};
use rand::{rngs::StdRng, Rng, SeedableRng};

use draw_instanced::{
    math::bounds::Bounds,
    rendering::instancing::{
        layouts::{GridInstances, GridShape, LineAxis},
        TokenId,
    },
    scene_graph::object3d::{Object3D, ObjectId},
    DispatcherConfig, GpuBackend, InstanceToken, InstancingWorld, MaterialHandle, MeshHandle,
    Scene,
};

pub const DRUM_DISPATCHER: &str = "Drum";
pub const CRATE_DISPATCHER: &str = "Crate";

/// Columns are laid out row by row on the XZ plane.
#[derive(Debug, Clone)]
pub struct SpawnerConfig {
    pub count: usize,
    pub x_step: f32,
    pub z_step: f32,
    pub x_max: f32,
    pub seed: u64,
}

impl Default for SpawnerConfig {
    fn default() -> Self {
        Self {
            count: 2500,
            x_step: 2.5,
            z_step: 10.0,
            x_max: 200.0,
            seed: 7,
        }
    }
}

struct DrumColumn {
    token: TokenId,
    number: usize,
    step: f32,
}

pub struct DemoState<B: GpuBackend> {
    pub world: InstancingWorld<B>,
    pub start_time: Instant,
    rng: StdRng,
    root: ObjectId,
    drum_bounds: Bounds,
    columns: Vec<DrumColumn>,
    crates: TokenId,
    frame: u64,
}

impl<B: GpuBackend> DemoState<B> {
    pub fn new(
        backend: B,
        drum_mesh: (MeshHandle, Bounds),
        crate_mesh: (MeshHandle, Bounds),
        spawner: &SpawnerConfig,
    ) -> anyhow::Result<Self> {
        let mut world = InstancingWorld::new(backend, Scene::new());
        let mut rng = StdRng::seed_from_u64(spawner.seed);

        world
            .add_dispatcher(DispatcherConfig::new(
                DRUM_DISPATCHER,
                drum_mesh.0,
                MaterialHandle(0),
            ))
            .context("Failed to add drum dispatcher")?;
        world
            .add_dispatcher(DispatcherConfig::new(
                CRATE_DISPATCHER,
                crate_mesh.0,
                MaterialHandle(1),
            ))
            .context("Failed to add crate dispatcher")?;

        let root = world.scene_mut().add_object(Object3D::new("Spawner"));

        let mut columns = Vec::with_capacity(spawner.count);
        let (mut point_x, mut point_z) = (0.0, 0.0);
        for i in 0..spawner.count {
            let object = world
                .scene_mut()
                .add_child(root, Object3D::new(format!("Drum column {i}")));
            world.scene_mut().set_object_translation(
                object,
                Vec3::new(point_x, rng.gen_range(-0.5..0.5), point_z),
            );

            let token = world.spawn_token(InstanceToken::new(object, DRUM_DISPATCHER));
            let column = DrumColumn {
                token,
                number: rng.gen_range(13..120),
                step: rng.gen_range(0.05..0.2),
            };
            apply_column(&mut world, &column, drum_mesh.1)?;
            world
                .edit_token(token, |token| token.set_color(random_color(&mut rng)))
                .context("Failed to color drum column")?;
            columns.push(column);

            point_x += spawner.x_step;
            if point_x > spawner.x_max {
                point_x = 0.0;
                point_z += spawner.z_step;
            }
        }

        let crate_object = world.scene_mut().add_object(Object3D::new("Crate line"));
        world
            .scene_mut()
            .set_object_translation(crate_object, Vec3::new(0.0, 0.0, -10.0));
        let crates = world.spawn_token(InstanceToken::new(crate_object, CRATE_DISPATCHER));
        let mut line = GridInstances::new(GridShape::Line(LineAxis::X));
        line.set_numbers(80, 1, 1);
        line.distances = Vec3::splat(2.5);
        line.euler = Vec3::new(0.0, 45.0, 0.0);
        line.apply(&mut world, crates, crate_mesh.1)
            .context("Failed to lay out crates")?;

        log::info!(
            "Spawned {} drum columns, native memory {} bytes",
            columns.len(),
            world.used_native_memory()
        );

        Ok(Self {
            world,
            start_time: Instant::now(),
            rng,
            root,
            drum_bounds: drum_mesh.1,
            columns,
            crates,
            frame: 0,
        })
    }

    pub fn update(&mut self) -> anyhow::Result<()> {
        let time = self.start_time.elapsed().as_secs_f32();
        self.frame += 1;

        let rotation = Quat::from_axis_angle(Vec3::Y, time * 0.1);
        self.world.scene_mut().set_object_rotation(self.root, rotation);

        if !self.columns.is_empty() && self.frame % 30 == 0 {
            let index = self.rng.gen_range(0..self.columns.len());
            self.columns[index].number = self.rng.gen_range(1..200);
            apply_column(&mut self.world, &self.columns[index], self.drum_bounds)?;

            let hidden = self.rng.gen_range(0..self.columns.len());
            let token = self.columns[hidden].token;
            let off = self
                .world
                .token(token)
                .is_some_and(|token| !token.force_rendering_off());
            self.world.set_force_rendering_off(token, off)?;
        }

        if self.frame % 120 == 0 {
            let color = random_color(&mut self.rng);
            self.world
                .edit_token(self.crates, |token| token.set_color(color))?;
        }

        Ok(())
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }
}

/// A column of `number` drums spaced `step` apart along local Z.
fn apply_column<B: GpuBackend>(
    world: &mut InstancingWorld<B>,
    column: &DrumColumn,
    drum_bounds: Bounds,
) -> anyhow::Result<()> {
    let offsets: Vec<Mat4> = (0..column.number)
        .map(|i| Mat4::from_translation(Vec3::new(0.0, 0.0, i as f32 * column.step)))
        .collect();
    world.set_instance_offsets(column.token, &offsets)?;

    let length = column.step * (column.number.max(1) - 1) as f32;
    let extents = drum_bounds.extents.max(Vec3::splat(0.5));
    let bounds = Bounds::new(
        Vec3::new(0.0, 0.0, length * 0.5),
        extents + Vec3::new(0.0, 0.0, length * 0.5),
    );
    world.edit_token(column.token, |token| token.set_local_bounds(bounds))?;

    Ok(())
}

fn random_color(rng: &mut impl Rng) -> Vec4 {
    Vec4::new(rng.gen(), rng.gen(), rng.gen(), 1.0)
}
