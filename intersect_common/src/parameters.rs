use crate::ray_buffer::RAY_BUFFER_SIZE;

pub const DEVICE_RENDER_BUFFER_COUNT: usize = 4;
pub const DEFAULT_WORKGROUP_SIZE: u32 = 64;

/// Device selection and sizing, handed to every device at construction time.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DeviceParameters {
    low_latency: bool,
    native_thread_count: usize,
    use_cpu_device: bool,
    use_gpu_device: bool,
    force_gpu_work_size: Option<u32>,
    device_render_thread_count: usize,
}

impl Default for DeviceParameters {
    fn default() -> Self {
        Self {
            low_latency: false,
            native_thread_count: 1,
            use_cpu_device: false,
            use_gpu_device: true,
            force_gpu_work_size: None,
            device_render_thread_count: 1,
        }
    }
}

impl DeviceParameters {
    pub fn new(native_thread_count: usize, use_cpu_device: bool, use_gpu_device: bool) -> Self {
        Self {
            native_thread_count,
            use_cpu_device,
            use_gpu_device,
            ..Default::default()
        }
    }

    pub fn with_low_latency(mut self, low_latency: bool) -> Self {
        self.low_latency = low_latency;
        self
    }

    // 0 keeps the device default, like an absent value
    pub fn with_force_gpu_work_size(mut self, work_size: u32) -> Self {
        self.force_gpu_work_size = (work_size > 0).then_some(work_size);
        self
    }

    pub fn with_device_render_thread_count(mut self, count: usize) -> Self {
        self.device_render_thread_count = count.max(1);
        self
    }

    pub fn ray_buffer_size(&self) -> usize {
        if self.low_latency { RAY_BUFFER_SIZE / 8 } else { RAY_BUFFER_SIZE }
    }

    pub fn low_latency(&self) -> bool { self.low_latency }
    pub fn native_thread_count(&self) -> usize { self.native_thread_count }
    pub fn use_cpu_device(&self) -> bool { self.use_cpu_device }
    pub fn use_gpu_device(&self) -> bool { self.use_gpu_device }
    pub fn force_gpu_work_size(&self) -> Option<u32> { self.force_gpu_work_size }
    pub fn device_render_thread_count(&self) -> usize { self.device_render_thread_count }
}
