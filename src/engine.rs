use draw_instanced::GpuBackend;

use crate::demo::DemoState;

pub fn update<B: GpuBackend>(state: &mut DemoState<B>) -> anyhow::Result<()> {
    state.world.scene_mut().early_update();
    state.update()?;
    state.world.update();
    state.world.scene_mut().late_update();

    Ok(())
}
