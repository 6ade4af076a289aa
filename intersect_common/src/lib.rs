pub mod bvh;
pub mod error;
pub mod gpu_buffer;
pub mod parameters;
pub mod ray;
pub mod ray_buffer;
pub mod ray_buffer_queue;
pub mod rays_per_second;
pub mod scene;
pub mod triangle;
pub mod util_funcs;
pub mod wgpu_state;

pub use error::{DeviceError, Result};
