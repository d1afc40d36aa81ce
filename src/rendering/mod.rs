pub mod config;
pub mod gpu;
pub mod instanced_pass;
pub mod instancing;
pub mod mesh;
pub mod render_model;
pub mod wgpu_backend;
