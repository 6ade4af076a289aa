use std::sync::Arc;

use intersect_common::error::Result;
use intersect_common::parameters::DeviceParameters;
use intersect_common::scene::Scene;
use intersect_common::wgpu_state::WgpuState;
use log::{error, info};

use crate::accelerated::AcceleratedIntersectionDevice;
use crate::device::IntersectionDevice;
use crate::kernel::IntersectionKernel;
use crate::native::NativeIntersectionDevice;
use crate::virtual_m2o::VirtualM2OIntersectionDevice;
use crate::virtual_o2m::VirtualO2MDevice;
use crate::wgpu_kernel::WgpuIntersectKernel;

/// Every device the benchmark drives, built from `DeviceParameters`.
///
/// Native devices are handed out as they are. The accelerated devices end up behind one
/// device (a `VirtualO2MDevice` when there are several) that the render endpoints share.
pub struct DeviceSet {
    native_devices: Vec<Arc<NativeIntersectionDevice>>,
    accelerated_devices: Vec<Arc<AcceleratedIntersectionDevice>>,
    render_devices: Vec<Arc<dyn IntersectionDevice>>,
    m2o_group: Option<VirtualM2OIntersectionDevice>,
}

impl DeviceSet {
    pub fn new(params: &DeviceParameters, scene: Arc<Scene>) -> Result<Self> {
        let mut kernels: Vec<Box<dyn IntersectionKernel>> = Vec::new();
        if params.use_cpu_device() || params.use_gpu_device() {
            for adapter in WgpuState::enumerate_adapters() {
                let info = adapter.get_info();
                let wanted = if WgpuState::is_gpu(info.device_type) {
                    params.use_gpu_device()
                } else {
                    info.device_type == wgpu::DeviceType::Cpu && params.use_cpu_device()
                };
                if !wanted {
                    continue;
                }
                info!("[DeviceSet] using adapter {} ({:?}, {:?})", info.name, info.device_type, info.backend);

                // a broken adapter costs its own device, not the whole set
                let kernel = WgpuState::new(&adapter)
                    .and_then(|state| WgpuIntersectKernel::new(state, &scene, params));
                match kernel {
                    Ok(kernel) => kernels.push(Box::new(kernel)),
                    Err(err) => error!("[DeviceSet] unable to set up {}: {}", info.name, err),
                }
            }
        }
        Ok(Self::with_kernels(params, scene, kernels))
    }

    /// Builds the set over kernels the caller already has.
    pub fn with_kernels(params: &DeviceParameters,
                        scene: Arc<Scene>,
                        kernels: Vec<Box<dyn IntersectionKernel>>) -> Self {
        let native_devices: Vec<_> = (0..params.native_thread_count())
            .map(|index| Arc::new(NativeIntersectionDevice::new(Arc::clone(&scene), index)))
            .collect();

        let accelerated_devices: Vec<_> = kernels.into_iter()
            .enumerate()
            .map(|(index, kernel)| Arc::new(AcceleratedIntersectionDevice::new(index, kernel)))
            .collect();

        let shared_device: Option<Arc<dyn IntersectionDevice>> = match accelerated_devices.len() {
            0 => None,
            1 => Some(Arc::clone(&accelerated_devices[0]) as Arc<dyn IntersectionDevice>),
            _ => {
                let devices = accelerated_devices.iter()
                    .map(|device| Arc::clone(device) as Arc<dyn IntersectionDevice>)
                    .collect();
                Some(Arc::new(VirtualO2MDevice::new(0, devices)))
            }
        };

        let m2o_group = shared_device.map(|device| {
            VirtualM2OIntersectionDevice::new(params.device_render_thread_count(), device)
        });
        let render_devices = m2o_group.as_ref()
            .map(|group| group.virtual_devices())
            .unwrap_or_default();

        info!("[DeviceSet] {} native devices, {} accelerated devices, {} render endpoints",
              native_devices.len(), accelerated_devices.len(), render_devices.len());

        Self {
            native_devices,
            accelerated_devices,
            render_devices,
            m2o_group,
        }
    }

    pub fn native_devices(&self) -> &[Arc<NativeIntersectionDevice>] {
        &self.native_devices
    }

    pub fn accelerated_devices(&self) -> &[Arc<AcceleratedIntersectionDevice>] {
        &self.accelerated_devices
    }

    /// The endpoints render threads push to; empty without accelerated devices.
    pub fn render_devices(&self) -> &[Arc<dyn IntersectionDevice>] {
        &self.render_devices
    }

    /// The physical devices, the ones whose performance adds up to the total.
    pub fn all_devices(&self) -> Vec<Arc<dyn IntersectionDevice>> {
        self.native_devices.iter()
            .map(|device| Arc::clone(device) as Arc<dyn IntersectionDevice>)
            .chain(self.accelerated_devices.iter()
                .map(|device| Arc::clone(device) as Arc<dyn IntersectionDevice>))
            .collect()
    }

    pub fn total_performance(&self) -> f64 {
        self.all_devices().iter().map(|device| device.performance()).sum()
    }

    /// Wakes every thread blocked on a device of the set.
    pub fn interrupt_all(&self) {
        for device in self.render_devices.iter() {
            device.interrupt();
        }
        for device in &self.native_devices {
            device.interrupt();
        }
    }

    pub fn stop_all(&self) {
        for device in self.render_devices.iter() {
            device.stop();
        }
        for device in &self.native_devices {
            device.stop();
        }
        if let Some(group) = &self.m2o_group {
            group.real_device().stop();
        }
    }
}
