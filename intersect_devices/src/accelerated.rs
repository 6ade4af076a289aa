use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use intersect_common::error::{DeviceError, Result};
use intersect_common::ray_buffer::RayBuffer;
use intersect_common::ray_buffer_queue::RayBufferQueue;
use log::{debug, error, info, warn};
use parking_lot::Mutex;

use crate::device::{DeviceKind, DeviceStats, IntersectionDevice};
use crate::kernel::IntersectionKernel;

#[derive(Default)]
struct Timing {
    idle: Duration,
    total: Duration,
}

// everything the worker thread touches
struct WorkerShared {
    name: String,
    todo_queue: RayBufferQueue,
    done_queue: RayBufferQueue,
    running: AtomicBool,
    stats: DeviceStats,
    timing: Mutex<Timing>,
}

/// Runs an `IntersectionKernel` on a dedicated worker thread fed by a todo queue.
///
/// While the device runs, the kernel lives inside the worker thread; `stop` joins the
/// worker and takes the kernel back so the device can be started again.
pub struct AcceleratedIntersectionDevice {
    index: usize,
    shared: Arc<WorkerShared>,
    kernel: Mutex<Option<Box<dyn IntersectionKernel>>>,
    worker: Mutex<Option<JoinHandle<Box<dyn IntersectionKernel>>>>,
}

impl AcceleratedIntersectionDevice {
    pub fn new(index: usize, kernel: Box<dyn IntersectionKernel>) -> Self {
        let shared = WorkerShared {
            name: kernel.name().to_string(),
            todo_queue: RayBufferQueue::new(),
            done_queue: RayBufferQueue::new(),
            running: AtomicBool::new(false),
            stats: DeviceStats::new(),
            timing: Mutex::new(Timing::default()),
        };
        Self {
            index,
            shared: Arc::new(shared),
            kernel: Mutex::new(Some(kernel)),
            worker: Mutex::new(None),
        }
    }

    /// Largest ray buffer the kernel accepts.
    pub fn capacity(&self) -> usize {
        self.kernel.lock().as_ref().map_or(0, |kernel| kernel.capacity())
    }

    fn worker_loop(shared: Arc<WorkerShared>, mut kernel: Box<dyn IntersectionKernel>) -> Box<dyn IntersectionKernel> {
        debug!("[Device::{}] worker thread started", shared.name);
        loop {
            let t1 = Instant::now();
            let mut ray_buffer = match shared.todo_queue.pop() {
                Ok(ray_buffer) => ray_buffer,
                Err(_) => {
                    debug!("[Device::{}] worker thread halted", shared.name);
                    break;
                }
            };
            let t2 = Instant::now();

            let ray_count = ray_buffer.ray_count();
            let result = {
                let (rays, hits) = ray_buffer.rays_and_hits_mut();
                kernel.intersect(rays, hits)
            };

            if let Err(err) = result {
                error!("[Device::{}] intersection kernel failed: {}", shared.name, err);
                shared.running.store(false, Ordering::SeqCst);
                // stop drains the failed buffer with the rest of the todo queue
                shared.todo_queue.push(ray_buffer);
                // nothing more will come out of this device
                shared.done_queue.interrupt();
                break;
            }
            let t3 = Instant::now();

            {
                let mut timing = shared.timing.lock();
                timing.idle += t2 - t1;
                timing.total += t3 - t1;
            }
            shared.stats.add_rays(ray_count);
            shared.done_queue.push(ray_buffer);
        }
        kernel
    }
}

impl IntersectionDevice for AcceleratedIntersectionDevice {
    fn name(&self) -> &str { &self.shared.name }
    fn index(&self) -> usize { self.index }
    fn kind(&self) -> DeviceKind { DeviceKind::Accelerated }

    fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            warn!("[Device::{}] start called on a running device", self.shared.name);
            return Ok(());
        }
        let kernel = self.kernel.lock().take()
            .ok_or_else(|| DeviceError::KernelLost(self.shared.name.clone()))?;

        self.shared.todo_queue.reset_interrupt();
        self.shared.done_queue.reset_interrupt();
        self.shared.stats.reset();
        *self.shared.timing.lock() = Timing::default();
        self.shared.running.store(true, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(format!("{}-worker", self.shared.name))
            .spawn(move || Self::worker_loop(shared, kernel));
        match handle {
            Ok(handle) => {
                *worker = Some(handle);
                info!("[Device::{}] started", self.shared.name);
                Ok(())
            }
            Err(err) => {
                self.shared.running.store(false, Ordering::SeqCst);
                Err(err.into())
            }
        }
    }

    fn interrupt(&self) {
        self.shared.todo_queue.interrupt();
        self.shared.done_queue.interrupt();
    }

    fn stop(&self) {
        let Some(handle) = self.worker.lock().take() else {
            return;
        };
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.todo_queue.interrupt();

        match handle.join() {
            Ok(kernel) => *self.kernel.lock() = Some(kernel),
            Err(_) => error!("[Device::{}] worker thread panicked, kernel lost", self.shared.name),
        }

        let discarded = self.shared.todo_queue.clear().len() + self.shared.done_queue.clear().len();
        if discarded > 0 {
            debug!("[Device::{}] stopped, {} ray buffers discarded", self.shared.name, discarded);
        }
        self.shared.todo_queue.reset_interrupt();
        info!("[Device::{}] stopped", self.shared.name);
    }

    fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    fn push_ray_buffer(&self, ray_buffer: RayBuffer) {
        // a failed worker is not running but still takes buffers until stop
        debug_assert!(self.worker.lock().is_some(), "ray buffer pushed to stopped device {}", self.shared.name);
        self.shared.todo_queue.push(ray_buffer);
    }

    fn pop_ray_buffer(&self) -> Result<RayBuffer> {
        self.shared.done_queue.pop()
    }

    fn queue_size(&self) -> usize {
        self.shared.todo_queue.size()
    }

    fn reclaim(&self) -> Vec<RayBuffer> {
        if self.is_running() {
            return Vec::new();
        }
        self.shared.todo_queue.clear()
    }

    fn load(&self) -> f64 {
        let timing = self.shared.timing.lock();
        if timing.total.is_zero() {
            0.0
        } else {
            1.0 - timing.idle.as_secs_f64() / timing.total.as_secs_f64()
        }
    }

    fn performance(&self) -> f64 {
        self.shared.stats.performance()
    }
}

impl Drop for AcceleratedIntersectionDevice {
    fn drop(&mut self) {
        self.stop();
    }
}
