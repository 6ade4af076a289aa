pub mod accelerated;
pub mod device;
pub mod device_set;
pub mod kernel;
pub mod native;
pub mod virtual_m2o;
pub mod virtual_o2m;
pub mod wgpu_kernel;

pub use accelerated::AcceleratedIntersectionDevice;
pub use device::{DeviceKind, DeviceStats, IntersectionDevice};
pub use device_set::DeviceSet;
pub use kernel::{EmulatedKernel, IntersectionKernel};
pub use native::NativeIntersectionDevice;
pub use virtual_m2o::{VirtualM2ODevice, VirtualM2OIntersectionDevice};
pub use virtual_o2m::VirtualO2MDevice;
pub use wgpu_kernel::WgpuIntersectKernel;
