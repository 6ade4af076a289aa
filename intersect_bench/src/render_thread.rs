use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use intersect_common::error::Result;
use intersect_common::parameters::DEVICE_RENDER_BUFFER_COUNT;
use intersect_common::ray_buffer::RayBuffer;
use intersect_common::util_funcs::random_ray;
use intersect_devices::{DeviceKind, IntersectionDevice};
use log::{debug, error, info};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Hit statistics shared by all render threads.
#[derive(Default)]
pub struct HitCounter {
    rays: AtomicU64,
    hits: AtomicU64,
}

impl HitCounter {
    fn record(&self, ray_buffer: &RayBuffer) {
        let hits = ray_buffer.hits().iter().filter(|hit| !hit.is_miss()).count();
        self.rays.fetch_add(ray_buffer.ray_count() as u64, Ordering::Relaxed);
        self.hits.fetch_add(hits as u64, Ordering::Relaxed);
    }

    pub fn rays(&self) -> u64 {
        self.rays.load(Ordering::Relaxed)
    }

    pub fn hit_ratio(&self) -> f64 {
        let rays = self.rays();
        if rays == 0 { 0.0 } else { self.hits.load(Ordering::Relaxed) as f64 / rays as f64 }
    }
}

/// Feeds one device with random rays until told to stop.
pub struct RenderThread {
    device: Arc<dyn IntersectionDevice>,
    handle: Option<JoinHandle<()>>,
}

impl RenderThread {
    pub fn start(index: usize,
                 device: Arc<dyn IntersectionDevice>,
                 ray_buffer_size: usize,
                 scene_extent: f32,
                 halt: Arc<AtomicBool>,
                 counter: Arc<HitCounter>) -> Result<Self> {
        device.start()?;
        let thread_device = Arc::clone(&device);
        let handle = thread::Builder::new()
            .name(format!("render-{}", index))
            .spawn(move || {
                let buffer_count = match thread_device.kind() {
                    DeviceKind::Native => 1,
                    _ => DEVICE_RENDER_BUFFER_COUNT,
                };
                let mut rng = StdRng::seed_from_u64(index as u64);
                let mut fill = |mut ray_buffer: RayBuffer| {
                    ray_buffer.reset();
                    while !ray_buffer.is_full() {
                        ray_buffer.add_ray(random_ray(&mut rng, scene_extent));
                    }
                    ray_buffer
                };

                for id in 0..buffer_count {
                    thread_device.push_ray_buffer(fill(RayBuffer::new(id, ray_buffer_size)));
                }
                info!("[RenderThread::{}] rendering with {} ray buffers", thread_device.name(), buffer_count);

                while !halt.load(Ordering::Relaxed) {
                    match thread_device.pop_ray_buffer() {
                        Ok(ray_buffer) => {
                            counter.record(&ray_buffer);
                            thread_device.push_ray_buffer(fill(ray_buffer));
                        }
                        Err(err) if err.is_interrupted() => break,
                        Err(err) => {
                            error!("[RenderThread::{}] {}", thread_device.name(), err);
                            break;
                        }
                    }
                }
                debug!("[RenderThread::{}] halted", thread_device.name());
            })?;

        Ok(Self { device, handle: Some(handle) })
    }

    pub fn interrupt(&self) {
        self.device.interrupt();
    }

    pub fn stop(&mut self) {
        self.interrupt();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("[RenderThread::{}] render thread panicked", self.device.name());
            }
        }
        self.device.stop();
    }
}

impl Drop for RenderThread {
    fn drop(&mut self) {
        self.stop();
    }
}
