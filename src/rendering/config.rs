use crate::rendering::gpu::{MaterialHandle, MeshHandle};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShadowCastingMode {
    Off,
    #[default]
    On,
    TwoSided,
    ShadowsOnly,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReflectionProbeUsage {
    Off,
    #[default]
    BlendProbes,
    BlendProbesAndSkybox,
    Simple,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LightProbeUsage {
    Off,
    #[default]
    BlendProbes,
    UseProxyVolume,
    CustomProvided,
}

/// Rendering options shared by every render system of one dispatcher. A
/// variant (different layer, no shadows, ...) needs its own dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    pub shadow_casting: ShadowCastingMode,
    pub receive_shadows: bool,
    pub layer: u32,
    pub reflection_probe_usage: ReflectionProbeUsage,
    pub light_probe_usage: LightProbeUsage,
    /// Host-side handle of a light probe proxy volume, if any.
    pub light_probe_proxy_volume: Option<u32>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            shadow_casting: ShadowCastingMode::On,
            receive_shadows: true,
            layer: 0,
            reflection_probe_usage: ReflectionProbeUsage::BlendProbes,
            light_probe_usage: LightProbeUsage::BlendProbes,
            light_probe_proxy_volume: None,
        }
    }
}

/// Per-dispatcher settings. Treated as constants once the dispatcher is
/// enabled; changing mesh or material means rebuilding the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub name: String,
    pub mesh: MeshHandle,
    pub material: MaterialHandle,
    /// Initial batch capacity of a freshly created render system.
    pub default_capacity: usize,
    /// Initial batch capacity for batch sizes above `large_batch_size_limit`.
    pub large_capacity: usize,
    pub large_batch_size_limit: usize,
    pub options: RenderOptions,
}

impl DispatcherConfig {
    pub fn new(name: impl Into<String>, mesh: MeshHandle, material: MaterialHandle) -> Self {
        Self {
            name: name.into(),
            mesh,
            material,
            ..Default::default()
        }
    }

    pub fn default_capacity_for(&self, batch_size: usize) -> usize {
        let capacity = if batch_size > self.large_batch_size_limit {
            self.large_capacity
        } else {
            self.default_capacity
        };
        capacity.max(1)
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            mesh: MeshHandle::default(),
            material: MaterialHandle::default(),
            default_capacity: 32,
            large_capacity: 1,
            large_batch_size_limit: 2047,
            options: RenderOptions::default(),
        }
    }
}
