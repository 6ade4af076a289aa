use std::borrow::Cow;
use std::sync::mpsc;

use intersect_common::bvh::BVHNode;
use intersect_common::error::{DeviceError, Result};
use intersect_common::gpu_buffer::{BufferAccess, GPUBuffer};
use intersect_common::parameters::{DeviceParameters, DEFAULT_WORKGROUP_SIZE};
use intersect_common::ray::{Ray, RayHit};
use intersect_common::scene::Scene;
use intersect_common::triangle::Triangle;
use intersect_common::wgpu_state::WgpuState;
use log::info;
use wgpu::{BindGroup, BindGroupDescriptor, BindGroupLayoutDescriptor, BufferAddress, BufferUsages, ComputePipeline};

use crate::kernel::IntersectionKernel;

const KERNEL_SOURCE: &str = include_str!("../shaders/intersect.wgsl");
const WORKGROUP_SIZE_TOKEN: &str = "WORKGROUP_SIZE";

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct KernelParams {
    ray_count: u32,
    node_count: u32,
    miss_distance: f32,
    _buffer: u32,
}

/// BVH intersection compute kernel on one wgpu adapter.
///
/// Every buffer is allocated once at setup for the device's ray buffer size; a batch only
/// rewrites the rays and the params uniform.
pub struct WgpuIntersectKernel {
    wgpu_state: WgpuState,
    ray_buffer: GPUBuffer,
    hit_buffer: GPUBuffer,
    params_buffer: GPUBuffer,
    readback_buffer: wgpu::Buffer,
    // kept alive for the scene bind group
    _triangle_buffer: GPUBuffer,
    _bvh_buffer: GPUBuffer,
    ray_bind_group: BindGroup,
    scene_bind_group: BindGroup,
    pipeline: ComputePipeline,
    node_count: u32,
    capacity: usize,
    workgroup_size: u32,
}

impl WgpuIntersectKernel {
    pub fn new(wgpu_state: WgpuState, scene: &Scene, params: &DeviceParameters) -> Result<Self> {
        let name = wgpu_state.name().to_string();
        let capacity = params.ray_buffer_size();
        let workgroup_size = Self::select_workgroup_size(&wgpu_state, params);

        let workgroups = capacity.div_ceil(workgroup_size as usize);
        if workgroups > wgpu_state.limits().max_compute_workgroups_per_dimension as usize {
            return Err(DeviceError::KernelSetup {
                device: name,
                log: format!("{} workgroups of {} exceed the dispatch limit", workgroups, workgroup_size),
            });
        }

        let device = wgpu_state.device();
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        info!("[Device::{}] rays buffer size: {}Kb", name, size_of::<Ray>() * capacity / 1024);
        let ray_buffer = GPUBuffer::with_capacity::<Ray>(device, BufferAccess::ReadOnly, 0, capacity, "ray buffer");
        info!("[Device::{}] ray hits buffer size: {}Kb", name, size_of::<RayHit>() * capacity / 1024);
        let hit_buffer = GPUBuffer::with_capacity::<RayHit>(device, BufferAccess::ReadWrite, 1, capacity, "hit buffer");
        let params_buffer = GPUBuffer::with_capacity::<KernelParams>(device,
                                                                     BufferAccess::Uniform,
                                                                     2,
                                                                     1,
                                                                     "kernel params buffer");
        let readback_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("hit readback buffer"),
            size: (size_of::<RayHit>() * capacity) as BufferAddress,
            usage: BufferUsages::COPY_DST | BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        // an empty scene uploads placeholders; node_count == 0 keeps the kernel off them
        let triangles = scene.triangles();
        let nodes = scene.bvh_nodes();
        info!("[Device::{}] triangle buffer size: {}Kb", name, size_of::<Triangle>() * triangles.len() / 1024);
        let triangle_buffer = GPUBuffer::from_slice(device, BufferAccess::ReadOnly, 0, triangles, "triangle buffer");
        info!("[Device::{}] BVH buffer size: {}Kb", name, size_of::<BVHNode>() * nodes.len() / 1024);
        let bvh_buffer = GPUBuffer::from_slice(device, BufferAccess::ReadOnly, 1, nodes, "bvh buffer");

        let source = KERNEL_SOURCE.replace(WORKGROUP_SIZE_TOKEN, &format!("{}u", workgroup_size));
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("intersect kernel"),
            source: wgpu::ShaderSource::Wgsl(Cow::Owned(source)),
        });

        // rays, hits and params change per batch; the scene never does
        let ray_bind_group_layout = device.create_bind_group_layout(
            &BindGroupLayoutDescriptor {
                label: Some("ray bind group layout"),
                entries: &[
                    ray_buffer.layout_entry(),
                    hit_buffer.layout_entry(),
                    params_buffer.layout_entry(),
                ],
            });

        let ray_bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("ray bind group"),
            layout: &ray_bind_group_layout,
            entries: &[
                ray_buffer.binding(),
                hit_buffer.binding(),
                params_buffer.binding(),
            ],
        });

        let scene_bind_group_layout = device.create_bind_group_layout(
            &BindGroupLayoutDescriptor {
                label: Some("scene bind group layout"),
                entries: &[triangle_buffer.layout_entry(), bvh_buffer.layout_entry()],
            });

        let scene_bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("scene bind group"),
            layout: &scene_bind_group_layout,
            entries: &[triangle_buffer.binding(),
                bvh_buffer.binding()],
        });

        let pipeline_layout = device.create_pipeline_layout(
            &wgpu::PipelineLayoutDescriptor {
                label: Some("intersect pipeline layout"),
                bind_group_layouts: &[
                    &ray_bind_group_layout,
                    &scene_bind_group_layout
                ],
                push_constant_ranges: &[],
            }
        );

        let pipeline = device.create_compute_pipeline(
            &wgpu::ComputePipelineDescriptor {
                label: Some("intersect pipeline"),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: "main",
                compilation_options: Default::default(),
                cache: None,
            }
        );

        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(DeviceError::KernelSetup { device: name, log: error.to_string() });
        }
        info!("[Device::{}] intersect kernel work group size: {}", name, workgroup_size);

        Ok(Self {
            node_count: scene.bvh_nodes().len() as u32,
            wgpu_state,
            ray_buffer,
            hit_buffer,
            params_buffer,
            readback_buffer,
            _triangle_buffer: triangle_buffer,
            _bvh_buffer: bvh_buffer,
            ray_bind_group,
            scene_bind_group,
            pipeline,
            capacity,
            workgroup_size,
        })
    }

    // the forced size only applies to real GPUs, and never beyond what the adapter allows
    fn select_workgroup_size(wgpu_state: &WgpuState, params: &DeviceParameters) -> u32 {
        let limits = wgpu_state.limits();
        let max_size = limits.max_compute_workgroup_size_x
            .min(limits.max_compute_invocations_per_workgroup)
            .max(1);
        match params.force_gpu_work_size() {
            Some(forced) if WgpuState::is_gpu(wgpu_state.device_type()) => {
                info!("[Device::{}] forced work group size: {}", wgpu_state.name(), forced);
                forced.min(max_size)
            }
            _ => DEFAULT_WORKGROUP_SIZE.min(max_size),
        }
    }

    pub fn workgroup_size(&self) -> u32 {
        self.workgroup_size
    }

    fn dispatch_error(&self, reason: impl ToString) -> DeviceError {
        DeviceError::Dispatch { device: self.wgpu_state.name().to_string(), reason: reason.to_string() }
    }
}

impl IntersectionKernel for WgpuIntersectKernel {
    fn name(&self) -> &str {
        self.wgpu_state.name()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn intersect(&mut self, rays: &[Ray], hits: &mut [RayHit]) -> Result<()> {
        let ray_count = rays.len();
        if ray_count == 0 {
            return Ok(());
        }
        if ray_count > self.capacity {
            return Err(DeviceError::CapacityExceeded {
                device: self.wgpu_state.name().to_string(),
                count: ray_count,
                capacity: self.capacity,
            });
        }

        let device = self.wgpu_state.device();
        let queue = self.wgpu_state.queue();
        let hits_size = (size_of::<RayHit>() * ray_count) as BufferAddress;
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        // stage the rays; the writes land before the submitted commands run
        self.ray_buffer.write(queue, rays);
        let kernel_params = KernelParams {
            ray_count: ray_count as u32,
            node_count: self.node_count,
            miss_distance: f32::INFINITY,
            _buffer: 0,
        };
        self.params_buffer.write(queue, &[kernel_params]);

        let mut encoder = device.create_command_encoder(
            &wgpu::CommandEncoderDescriptor {
                label: Some("intersect kernel encoder"),
            });
        {
            let mut intersect_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("intersect pass"),
                timestamp_writes: None,
            });
            intersect_pass.set_pipeline(&self.pipeline);
            intersect_pass.set_bind_group(0, &self.ray_bind_group, &[]);
            intersect_pass.set_bind_group(1, &self.scene_bind_group, &[]);
            intersect_pass.dispatch_workgroups((ray_count as u32).div_ceil(self.workgroup_size), 1, 1);
        }
        encoder.copy_buffer_to_buffer(self.hit_buffer.buffer(), 0,
                                      &self.readback_buffer, 0,
                                      hits_size);
        queue.submit(Some(encoder.finish()));

        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(self.dispatch_error(error));
        }

        // blocking readback: one batch in flight per device
        let slice = self.readback_buffer.slice(..hits_size);
        let (sender, receiver) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        let _ = device.poll(wgpu::Maintain::wait());
        receiver.recv().map_err(|error| self.dispatch_error(error))??;

        {
            let hit_view = slice.get_mapped_range();
            hits.copy_from_slice(bytemuck::cast_slice(&hit_view[..]));
        }
        self.readback_buffer.unmap();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    // needs an adapter; machines without one just log and skip
    fn kernel_for(scene: &Scene) -> Option<WgpuIntersectKernel> {
        let _ = env_logger::builder().is_test(true).try_init();
        let wgpu_state = match WgpuState::new_default() {
            Ok(state) => state,
            Err(err) => {
                log::warn!("skipping wgpu kernel test: {}", err);
                return None;
            }
        };
        let params = DeviceParameters::default().with_low_latency(true);
        Some(WgpuIntersectKernel::new(wgpu_state, scene, &params).expect("kernel setup"))
    }

    #[test]
    fn gpu_kernel_matches_scene_intersect() {
        let scene = Scene::unit_triangle();
        let Some(mut kernel) = kernel_for(&scene) else { return };

        let rays = [Ray::new(Vec3::new(0.0, 0.0, -1.0), Vec3::Z),
                    Ray::new(Vec3::new(10.0, 10.0, -1.0), Vec3::Z),
                    Ray::new(Vec3::new(-10.0, 0.0, -1.0), Vec3::Z),
                    Ray::new(Vec3::new(0.0, 10.0, -1.0), Vec3::Z)];
        let mut hits = [RayHit { t: 0.0, index: 0 }; 4];
        kernel.intersect(&rays, &mut hits).unwrap();

        assert_eq!(hits[0].index, 0);
        assert!((hits[0].t - 1.0).abs() < 1e-5);
        for hit in &hits[1..] {
            assert!(hit.is_miss());
            assert_eq!(hit.t, f32::INFINITY);
        }
    }

    #[test]
    fn gpu_kernel_handles_empty_scene() {
        let scene = Scene::empty();
        let Some(mut kernel) = kernel_for(&scene) else { return };
        let rays = [Ray::new(Vec3::ZERO, Vec3::Z); 3];
        let mut hits = [RayHit { t: 0.0, index: 0 }; 3];
        kernel.intersect(&rays, &mut hits).unwrap();
        assert!(hits.iter().all(|hit| hit.is_miss()));
    }

    #[test]
    fn oversized_batch_is_rejected() {
        let scene = Scene::unit_triangle();
        let Some(mut kernel) = kernel_for(&scene) else { return };
        let rays = vec![Ray::default(); kernel.capacity() + 1];
        let mut hits = vec![RayHit::default(); rays.len()];
        assert!(matches!(kernel.intersect(&rays, &mut hits),
                         Err(DeviceError::CapacityExceeded { .. })));
    }
}
