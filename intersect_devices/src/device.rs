use std::time::Instant;

use intersect_common::ray_buffer::RayBuffer;
use intersect_common::Result;
use parking_lot::Mutex;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeviceKind {
    Native,
    Accelerated,
    VirtualManyToOne,
    VirtualOneToMany,
}

/// Something that turns pushed ray buffers into popped, intersected ray buffers.
///
/// Buffers may come back in a different order than they were pushed; callers match them by
/// `RayBuffer::id`. All methods take `&self` so a device can sit behind an `Arc` shared
/// by the producer thread and the virtual devices routing through it.
pub trait IntersectionDevice: Send + Sync {
    fn name(&self) -> &str;
    fn index(&self) -> usize;
    fn kind(&self) -> DeviceKind;

    fn start(&self) -> Result<()>;
    /// Wakes every thread parked in a queue pop of this device. Never blocks.
    fn interrupt(&self);
    /// Joins the device threads and drains its queues. Safe to call when already stopped.
    fn stop(&self);
    fn is_running(&self) -> bool;

    fn push_ray_buffer(&self, ray_buffer: RayBuffer);
    /// Blocks until a finished buffer is available or the device is interrupted.
    fn pop_ray_buffer(&self) -> Result<RayBuffer>;
    /// Advisory backlog, only meant for load balancing.
    fn queue_size(&self) -> usize;
    /// Hands back the buffers a failed device will never finish. Empty while it runs.
    fn reclaim(&self) -> Vec<RayBuffer> {
        Vec::new()
    }

    /// Busy fraction in `[0, 1]`.
    fn load(&self) -> f64;
    /// Rays per second since the last `start`.
    fn performance(&self) -> f64;
}

struct StatsInner {
    total_ray_count: f64,
    start_time: Instant,
}

pub struct DeviceStats {
    inner: Mutex<StatsInner>,
}

impl Default for DeviceStats {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceStats {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StatsInner {
                total_ray_count: 0.0,
                start_time: Instant::now(),
            })
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.total_ray_count = 0.0;
        inner.start_time = Instant::now();
    }

    pub fn add_rays(&self, ray_count: usize) {
        self.inner.lock().total_ray_count += ray_count as f64;
    }

    pub fn total_ray_count(&self) -> f64 {
        self.inner.lock().total_ray_count
    }

    pub fn performance(&self) -> f64 {
        let inner = self.inner.lock();
        let elapsed = inner.start_time.elapsed().as_secs_f64();
        if elapsed == 0.0 { 1.0 } else { inner.total_ray_count / elapsed }
    }
}
