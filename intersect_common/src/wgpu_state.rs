use crate::error::{DeviceError, Result};

// one logical wgpu device per intersection device; nothing here is shared between devices
pub struct WgpuState {
    adapter_info: wgpu::AdapterInfo,
    limits: wgpu::Limits,
    device: wgpu::Device,
    queue: wgpu::Queue,
}

impl WgpuState {
    pub fn instance() -> wgpu::Instance {
        wgpu::Instance::new(
            wgpu::InstanceDescriptor {
                backends: wgpu::Backends::PRIMARY,
                ..Default::default()
            }
        )
    }

    pub fn enumerate_adapters() -> Vec<wgpu::Adapter> {
        Self::instance().enumerate_adapters(wgpu::Backends::PRIMARY)
    }

    pub fn is_gpu(device_type: wgpu::DeviceType) -> bool {
        matches!(device_type,
            wgpu::DeviceType::DiscreteGpu | wgpu::DeviceType::IntegratedGpu | wgpu::DeviceType::VirtualGpu)
    }

    pub fn new(adapter: &wgpu::Adapter) -> Result<WgpuState> {
        pollster::block_on(WgpuState::new_async(adapter))
    }

    // first high performance adapter, software fallbacks included
    pub fn new_default() -> Result<WgpuState> {
        let instance = Self::instance();
        let adapter = pollster::block_on(instance.request_adapter(
            &wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            }
        )).ok_or(DeviceError::NoAdapter)?;
        WgpuState::new(&adapter)
    }

    async fn new_async(adapter: &wgpu::Adapter) -> Result<WgpuState> {
        let adapter_info = adapter.get_info();
        let limits = adapter.limits();

        let (device, queue) = adapter.request_device(
            &wgpu::DeviceDescriptor {
                required_features: wgpu::Features::empty(),
                required_limits: limits.clone(),
                label: Some(adapter_info.name.as_str()),
                memory_hints: Default::default(),
            },
            None,
        ).await?;

        device.on_uncaptured_error(Box::new(|error| {
            log::error!("[wgpu] uncaptured error: {}", error);
        }));

        Ok(Self {
            adapter_info,
            limits,
            device,
            queue,
        })
    }

    pub fn name(&self) -> &str {
        &self.adapter_info.name
    }
    pub fn device_type(&self) -> wgpu::DeviceType {
        self.adapter_info.device_type
    }
    pub fn limits(&self) -> &wgpu::Limits {
        &self.limits
    }
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }
}
