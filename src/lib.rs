pub mod math;
pub mod rendering;
pub mod scene_graph;

pub use rendering::config::{DispatcherConfig, RenderOptions};
pub use rendering::gpu::{GpuBackend, HeadlessBackend, MaterialHandle, MeshHandle};
pub use rendering::instancing::{InstanceToken, InstancingError, InstancingWorld};
pub use scene_graph::scene::Scene;
