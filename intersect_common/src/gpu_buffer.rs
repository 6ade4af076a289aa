use bytemuck::Pod;
use wgpu::util::{BufferInitDescriptor, DeviceExt};
use wgpu::{BindGroupEntry, BindGroupLayoutEntry, BindingType, Buffer, BufferAddress, BufferBindingType,
           BufferUsages, Device, Queue, ShaderStages};

/// How the intersect kernel sees a buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BufferAccess {
    /// `var<storage, read>`, written from the host.
    ReadOnly,
    /// `var<storage, read_write>`, copied out after the dispatch.
    ReadWrite,
    /// `var<uniform>`.
    Uniform,
}

impl BufferAccess {
    pub fn usages(self) -> BufferUsages {
        match self {
            BufferAccess::ReadOnly => BufferUsages::STORAGE | BufferUsages::COPY_DST,
            BufferAccess::ReadWrite => BufferUsages::STORAGE | BufferUsages::COPY_SRC | BufferUsages::COPY_DST,
            BufferAccess::Uniform => BufferUsages::UNIFORM | BufferUsages::COPY_DST,
        }
    }

    pub fn binding_type(self) -> BufferBindingType {
        match self {
            BufferAccess::ReadOnly => BufferBindingType::Storage { read_only: true },
            BufferAccess::ReadWrite => BufferBindingType::Storage { read_only: false },
            BufferAccess::Uniform => BufferBindingType::Uniform,
        }
    }
}

/// A compute-stage buffer that knows its binding slot in the kernel's bind group.
pub struct GPUBuffer {
    buffer: Buffer,
    access: BufferAccess,
    binding: u32,
}

impl GPUBuffer {
    /// Room for `len` elements of `T`, contents left to the first `write`.
    pub fn with_capacity<T: Pod>(device: &Device, access: BufferAccess, binding: u32, len: usize, label: &str)
                                 -> Self {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: (size_of::<T>() * len.max(1)) as BufferAddress,
            usage: access.usages(),
            mapped_at_creation: false,
        });
        Self { buffer, access, binding }
    }

    /// Uploads `data` at creation. Zero sized bindings are invalid, so an empty slice
    /// becomes one zeroed element.
    pub fn from_slice<T: Pod>(device: &Device, access: BufferAccess, binding: u32, data: &[T], label: &str)
                              -> Self {
        let placeholder = [T::zeroed()];
        let data = if data.is_empty() { &placeholder[..] } else { data };
        let buffer = device.create_buffer_init(&BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::cast_slice(data),
            usage: access.usages(),
        });
        Self { buffer, access, binding }
    }

    /// Queues `data` for the start of the buffer; it lands before the next submit runs.
    pub fn write<T: Pod>(&self, queue: &Queue, data: &[T]) {
        queue.write_buffer(&self.buffer, 0, bytemuck::cast_slice(data));
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn access(&self) -> BufferAccess {
        self.access
    }

    pub fn size(&self) -> BufferAddress {
        self.buffer.size()
    }

    pub fn layout_entry(&self) -> BindGroupLayoutEntry {
        BindGroupLayoutEntry {
            binding: self.binding,
            visibility: ShaderStages::COMPUTE,
            ty: BindingType::Buffer {
                ty: self.access.binding_type(),
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }
    }

    pub fn binding(&self) -> BindGroupEntry<'_> {
        BindGroupEntry {
            binding: self.binding,
            resource: self.buffer.as_entire_binding(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bvh::BVHNode;
    use crate::triangle::Triangle;
    use crate::wgpu_state::WgpuState;

    #[test]
    fn access_picks_usage_and_binding_type() {
        assert!(BufferAccess::ReadWrite.usages().contains(BufferUsages::COPY_SRC));
        assert!(!BufferAccess::ReadOnly.usages().contains(BufferUsages::COPY_SRC));
        assert!(BufferAccess::Uniform.usages().contains(BufferUsages::UNIFORM));
        assert_eq!(BufferAccess::ReadOnly.binding_type(), BufferBindingType::Storage { read_only: true });
        assert_eq!(BufferAccess::Uniform.binding_type(), BufferBindingType::Uniform);
    }

    // needs an adapter; machines without one just log and skip
    #[test]
    fn empty_slices_get_one_placeholder_element() {
        let _ = env_logger::builder().is_test(true).try_init();
        let wgpu_state = match WgpuState::new_default() {
            Ok(state) => state,
            Err(err) => {
                log::warn!("skipping gpu buffer test: {}", err);
                return;
            }
        };
        let device = wgpu_state.device();

        let triangles = GPUBuffer::from_slice::<Triangle>(device, BufferAccess::ReadOnly, 0, &[], "triangles");
        assert_eq!(triangles.size(), size_of::<Triangle>() as BufferAddress);
        let nodes = GPUBuffer::from_slice(device, BufferAccess::ReadOnly, 1, &[BVHNode::default(); 3], "nodes");
        assert_eq!(nodes.size(), 3 * size_of::<BVHNode>() as BufferAddress);

        let hits = GPUBuffer::with_capacity::<u32>(device, BufferAccess::ReadWrite, 2, 8, "hits");
        assert_eq!(hits.size(), 32);
        let entry = hits.layout_entry();
        assert_eq!(entry.binding, 2);
        assert_eq!(entry.visibility, ShaderStages::COMPUTE);
        assert_eq!(hits.binding().binding, 2);
        hits.write(wgpu_state.queue(), &[1u32, 2, 3]);
    }
}
