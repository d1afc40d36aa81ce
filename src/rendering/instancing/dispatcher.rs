use slotmap::new_key_type;

use crate::rendering::{
    config::{DispatcherConfig, RenderOptions},
    gpu::GpuBackend,
    instancing::{
        render_system::InstancedRenderSystem, system_with_tokens::SystemWithTokens,
        BATCH_SIZE_LEVELS, LEVEL_COUNT,
    },
};

new_key_type! {
    pub struct DispatcherId;
}

/// Owns one render system per batch-size level for a single mesh/material
/// pair. Levels are created on first use.
pub struct Dispatcher {
    config: DispatcherConfig,
    active: bool,
    levels: [Option<SystemWithTokens>; LEVEL_COUNT],
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        Self {
            config,
            active: false,
            levels: Default::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub(crate) fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn level(&self, level: usize) -> Option<&SystemWithTokens> {
        self.levels.get(level)?.as_ref()
    }

    pub(crate) fn level_mut(&mut self, level: usize) -> Option<&mut SystemWithTokens> {
        self.levels.get_mut(level)?.as_mut()
    }

    /// Instantiated levels, smallest batch size first.
    pub fn levels(&self) -> impl Iterator<Item = (usize, &SystemWithTokens)> {
        self.levels
            .iter()
            .enumerate()
            .filter_map(|(level, system)| system.as_ref().map(|system| (level, system)))
    }

    pub(crate) fn levels_mut(&mut self) -> impl Iterator<Item = (usize, &mut SystemWithTokens)> {
        self.levels
            .iter_mut()
            .enumerate()
            .filter_map(|(level, system)| system.as_mut().map(|system| (level, system)))
    }

    pub(crate) fn get_system_at_level(
        &mut self,
        backend: &mut dyn GpuBackend,
        level: usize,
    ) -> &mut SystemWithTokens {
        let config = &self.config;
        self.levels[level].get_or_insert_with(|| {
            let batch_size = BATCH_SIZE_LEVELS[level];
            let capacity = config.default_capacity_for(batch_size);
            log::debug!(
                "Dispatcher \"{}\" creating level {} (batch size {}, capacity {})",
                config.name,
                level,
                batch_size,
                capacity
            );

            let mut system = InstancedRenderSystem::new(
                backend,
                config.mesh,
                config.material,
                batch_size,
                capacity,
                config.options,
            );
            system.set_batch_number(0);
            SystemWithTokens::new(system)
        })
    }

    pub fn options(&self) -> &RenderOptions {
        &self.config.options
    }

    /// Replaces the shared options and applies them to every live level.
    pub fn set_render_options(&mut self, options: RenderOptions) {
        self.config.options = options;
        for (_, level) in self.levels_mut() {
            level.system_mut().set_options(options);
        }
    }

    /// Disposes every level, largest batch size first.
    pub(crate) fn dispose_levels(&mut self, backend: &mut dyn GpuBackend) {
        for level in self.levels.iter_mut().rev() {
            if let Some(mut system) = level.take() {
                system.dispose(backend);
            }
        }
    }

    pub fn used_buffer_memory(&self) -> usize {
        self.levels()
            .map(|(_, level)| level.system().used_buffer_memory())
            .sum()
    }

    pub fn instance_number(&self) -> usize {
        self.levels()
            .map(|(_, level)| level.system().instance_number())
            .sum()
    }

    pub fn visible_number(&self) -> usize {
        self.levels()
            .map(|(_, level)| level.system().visible_number())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendering::{
        config::ShadowCastingMode,
        gpu::{HeadlessBackend, MaterialHandle, MeshHandle},
    };

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(DispatcherConfig::new(
            "D",
            MeshHandle::default(),
            MaterialHandle(1),
        ))
    }

    #[test]
    fn levels_are_created_lazily() {
        let mut backend = HeadlessBackend::new();
        let mut dispatcher = dispatcher();
        assert_eq!(dispatcher.levels().count(), 0);

        let level = dispatcher.get_system_at_level(&mut backend, 3);
        assert_eq!(level.system().batch_size(), 8);
        assert_eq!(level.system().batch_capacity(), 32);
        assert_eq!(level.system().batch_number(), 0);

        let large = dispatcher.get_system_at_level(&mut backend, 12);
        assert_eq!(large.system().batch_size(), 4096);
        assert_eq!(large.system().batch_capacity(), 1);

        let levels: Vec<usize> = dispatcher.levels().map(|(level, _)| level).collect();
        assert_eq!(levels, vec![3, 12]);
        assert_eq!(backend.buffer_count(), 6);
    }

    #[test]
    fn options_reach_every_level() {
        let mut backend = HeadlessBackend::new();
        let mut dispatcher = dispatcher();
        dispatcher.get_system_at_level(&mut backend, 0);
        dispatcher.get_system_at_level(&mut backend, 5);

        let options = RenderOptions {
            shadow_casting: ShadowCastingMode::Off,
            layer: 4,
            ..Default::default()
        };
        dispatcher.set_render_options(options);
        for (_, level) in dispatcher.levels() {
            assert_eq!(level.system().options(), &options);
        }
    }

    #[test]
    fn dispose_releases_gpu_buffers() {
        let mut backend = HeadlessBackend::new();
        let mut dispatcher = dispatcher();
        dispatcher.get_system_at_level(&mut backend, 1);
        assert!(dispatcher.used_buffer_memory() > 0);

        dispatcher.dispose_levels(&mut backend);
        assert_eq!(dispatcher.levels().count(), 0);
        assert_eq!(dispatcher.used_buffer_memory(), 0);
        assert_eq!(backend.buffer_count(), 0);
    }
}
