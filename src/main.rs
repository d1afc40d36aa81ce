use anyhow::Result;
use glam::{Mat4, Vec3};

use draw_instanced::{
    rendering::{instanced_pass::InstancedPass, mesh::MeshData, wgpu_backend::WgpuBackend},
    GpuBackend, HeadlessBackend, MeshHandle,
};

mod demo;
mod engine;

use demo::{DemoState, SpawnerConfig};

const FRAME_COUNT: u64 = 600;
const TRIM_INTERVAL: u64 = 240;
const RESOLUTION: (u32, u32) = (1280, 720);

fn main() -> Result<()> {
    pretty_env_logger::init();

    let drum = MeshData::cuboid("Drum", Vec3::new(1.0, 0.2, 1.0));
    let crate_mesh = MeshData::cuboid("Crate", Vec3::ONE);
    let spawner = SpawnerConfig::default();

    match pollster::block_on(WgpuBackend::new_headless()) {
        Ok(mut backend) => {
            let drum_handle = backend.register_mesh(&drum);
            let crate_handle = backend.register_mesh(&crate_mesh);
            let pass = InstancedPass::new(&backend, RESOLUTION.0, RESOLUTION.1);
            pass.set_view_projection(backend.queue(), view_projection());
            let state = DemoState::new(
                backend,
                (drum_handle, drum.bounds()),
                (crate_handle, crate_mesh.bounds()),
                &spawner,
            )?;
            run(state, |backend| pass.render(backend))
        }
        Err(err) => {
            log::warn!("Running without a GPU: {:#}", err);
            let state = DemoState::new(
                HeadlessBackend::new(),
                (MeshHandle::new(0, drum.submesh_count()), drum.bounds()),
                (MeshHandle::new(1, crate_mesh.submesh_count()), crate_mesh.bounds()),
                &spawner,
            )?;
            run(state, |backend| backend.take_draws().len())
        }
    }
}

fn view_projection() -> Mat4 {
    let aspect = RESOLUTION.0 as f32 / RESOLUTION.1 as f32;
    let projection = Mat4::perspective_rh(60f32.to_radians(), aspect, 0.1, 1000.0);
    let view = Mat4::look_at_rh(Vec3::new(100.0, 80.0, -120.0), Vec3::new(100.0, 0.0, 40.0), Vec3::Y);
    projection * view
}

fn run<B: GpuBackend>(
    mut state: DemoState<B>,
    mut present: impl FnMut(&mut B) -> usize,
) -> Result<()> {
    for _ in 0..FRAME_COUNT {
        engine::update(&mut state)?;
        let draws = present(state.world.backend_mut());

        let frame = state.frame();
        if frame % TRIM_INTERVAL == 0 {
            state.world.trim_excess();
        }
        if frame % 60 == 0 {
            log::info!(
                "Frame {}: {} draws, {} visible instances, {} bytes native memory",
                frame,
                draws,
                state.world.visible_number(),
                state.world.used_native_memory()
            );
        }
    }

    log::info!(
        "Finished {} frames in {:.2?}",
        FRAME_COUNT,
        state.start_time.elapsed()
    );

    Ok(())
}
