use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use intersect_common::ray_buffer::RayBuffer;
use intersect_common::ray_buffer_queue::RayBufferQueue;
use intersect_common::scene::Scene;
use intersect_common::Result;
use log::{debug, info};

use crate::device::{DeviceKind, DeviceStats, IntersectionDevice};

/// Intersects in the calling thread: by the time `push_ray_buffer` returns the buffer is done.
pub struct NativeIntersectionDevice {
    index: usize,
    name: String,
    scene: Arc<Scene>,
    done_queue: RayBufferQueue,
    running: AtomicBool,
    stats: DeviceStats,
}

impl NativeIntersectionDevice {
    pub fn new(scene: Arc<Scene>, index: usize) -> Self {
        Self {
            index,
            name: format!("Thread-{:03}", index),
            scene,
            done_queue: RayBufferQueue::new(),
            running: AtomicBool::new(false),
            stats: DeviceStats::new(),
        }
    }

    /// Shortcut for callers owning the device: intersect in place, no queueing.
    pub fn trace_rays(&self, ray_buffer: &mut RayBuffer) {
        let (rays, hits) = ray_buffer.rays_and_hits_mut();
        for (ray, hit) in rays.iter().zip(hits.iter_mut()) {
            *hit = self.scene.intersect(ray);
        }
        self.stats.add_rays(rays.len());
    }
}

impl IntersectionDevice for NativeIntersectionDevice {
    fn name(&self) -> &str { &self.name }
    fn index(&self) -> usize { self.index }
    fn kind(&self) -> DeviceKind { DeviceKind::Native }

    fn start(&self) -> Result<()> {
        self.done_queue.reset_interrupt();
        self.stats.reset();
        self.running.store(true, Ordering::SeqCst);
        info!("[Device::{}] started", self.name);
        Ok(())
    }

    fn interrupt(&self) {
        self.done_queue.interrupt();
    }

    fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let discarded = self.done_queue.clear();
        debug!("[Device::{}] stopped, {} finished ray buffers discarded", self.name, discarded.len());
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn push_ray_buffer(&self, mut ray_buffer: RayBuffer) {
        debug_assert!(self.is_running(), "ray buffer pushed to stopped device {}", self.name);
        self.trace_rays(&mut ray_buffer);
        self.done_queue.push(ray_buffer);
    }

    fn pop_ray_buffer(&self) -> Result<RayBuffer> {
        self.done_queue.pop()
    }

    fn queue_size(&self) -> usize { 0 }

    fn load(&self) -> f64 { 1.0 }

    fn performance(&self) -> f64 {
        self.stats.performance()
    }
}
