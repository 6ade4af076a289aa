use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use intersect_common::error::Result;
use intersect_common::ray_buffer::RayBuffer;
use intersect_common::ray_buffer_queue::RayBufferQueue;
use log::{debug, error, info, warn};
use parking_lot::Mutex;

use crate::device::{DeviceKind, DeviceStats, IntersectionDevice};

// how often a draining endpoint re-checks that its buffers can still come back
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

// state shared by the endpoints of one group and its router thread
struct M2OShared {
    real_device: Arc<dyn IntersectionDevice>,
    // guards starting/stopping the real device; holds the router while it runs
    router: Mutex<Option<JoinHandle<()>>>,
    done_queues: Vec<RayBufferQueue>,
    running: Vec<AtomicBool>,
}

impl M2OShared {
    fn route(shared: Arc<M2OShared>) {
        let real_name = shared.real_device.name().to_string();
        debug!("[VirtualM2ODevice::{}] router thread started", real_name);
        loop {
            let mut ray_buffer = match shared.real_device.pop_ray_buffer() {
                Ok(ray_buffer) => ray_buffer,
                Err(_) => {
                    debug!("[VirtualM2ODevice::{}] router thread halted", real_name);
                    // endpoints still waiting would never be fed again
                    for done_queue in &shared.done_queues {
                        done_queue.interrupt();
                    }
                    break;
                }
            };
            match ray_buffer.pop_user_data() {
                Some(index) if index < shared.done_queues.len() => shared.done_queues[index].push(ray_buffer),
                tag => error!("[VirtualM2ODevice::{}] ray buffer {} has no valid endpoint tag: {:?}",
                              real_name, ray_buffer.id(), tag),
            }
        }
    }
}

/// Lets several render threads share one physical device.
///
/// Every endpoint tags the buffers it pushes with its own index; a router thread pops the
/// physical device and hands each buffer back to the endpoint named by its tag.
pub struct VirtualM2OIntersectionDevice {
    shared: Arc<M2OShared>,
    virtual_devices: Vec<Arc<VirtualM2ODevice>>,
}

impl VirtualM2OIntersectionDevice {
    pub fn new(count: usize, real_device: Arc<dyn IntersectionDevice>) -> Self {
        let shared = Arc::new(M2OShared {
            real_device,
            router: Mutex::new(None),
            done_queues: (0..count).map(|_| RayBufferQueue::new()).collect(),
            running: (0..count).map(|_| AtomicBool::new(false)).collect(),
        });
        let virtual_devices = (0..count)
            .map(|index| Arc::new(VirtualM2ODevice {
                index,
                name: format!("VirtualM2ODevice-{:03}-{}", index, shared.real_device.name()),
                shared: Arc::clone(&shared),
                pending: AtomicUsize::new(0),
                stats: DeviceStats::new(),
            }))
            .collect();
        Self { shared, virtual_devices }
    }

    pub fn real_device(&self) -> &Arc<dyn IntersectionDevice> {
        &self.shared.real_device
    }

    pub fn get_virtual_device(&self, index: usize) -> Option<Arc<dyn IntersectionDevice>> {
        self.virtual_devices.get(index)
            .map(|device| Arc::clone(device) as Arc<dyn IntersectionDevice>)
    }

    pub fn virtual_devices(&self) -> Vec<Arc<dyn IntersectionDevice>> {
        self.virtual_devices.iter()
            .map(|device| Arc::clone(device) as Arc<dyn IntersectionDevice>)
            .collect()
    }
}

impl Drop for VirtualM2OIntersectionDevice {
    fn drop(&mut self) {
        for device in &self.virtual_devices {
            device.stop();
        }
    }
}

pub struct VirtualM2ODevice {
    index: usize,
    name: String,
    shared: Arc<M2OShared>,
    // pushed but not popped yet
    pending: AtomicUsize,
    stats: DeviceStats,
}

impl VirtualM2ODevice {
    fn done_queue(&self) -> &RayBufferQueue {
        &self.shared.done_queues[self.index]
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

impl IntersectionDevice for VirtualM2ODevice {
    fn name(&self) -> &str { &self.name }
    fn index(&self) -> usize { self.index }
    fn kind(&self) -> DeviceKind { DeviceKind::VirtualManyToOne }

    fn start(&self) -> Result<()> {
        let mut router = self.shared.router.lock();
        if self.is_running() {
            return Ok(());
        }
        self.pending.store(0, Ordering::SeqCst);
        self.done_queue().reset_interrupt();
        self.stats.reset();

        if router.is_none() {
            self.shared.real_device.start()?;
            let shared = Arc::clone(&self.shared);
            let spawned = thread::Builder::new()
                .name(format!("{}-router", self.shared.real_device.name()))
                .spawn(move || M2OShared::route(shared));
            match spawned {
                Ok(handle) => *router = Some(handle),
                Err(err) => {
                    self.shared.real_device.stop();
                    return Err(err.into());
                }
            }
        }

        self.shared.running[self.index].store(true, Ordering::SeqCst);
        info!("[{}] started", self.name);
        Ok(())
    }

    fn interrupt(&self) {
        self.done_queue().interrupt();
    }

    fn stop(&self) {
        let mut router = self.shared.router.lock();
        if !self.shared.running[self.index].swap(false, Ordering::SeqCst) {
            return;
        }

        // a previous interrupt must not cut the drain short
        self.done_queue().reset_interrupt();
        let mut drained = 0;
        while self.pending() > 0 {
            match self.done_queue().pop_timeout(DRAIN_POLL_INTERVAL) {
                Ok(Some(_)) => {
                    self.pending.fetch_sub(1, Ordering::SeqCst);
                    drained += 1;
                }
                Ok(None) => {
                    let router_alive = router.as_ref().is_some_and(|handle| !handle.is_finished());
                    if !router_alive || !self.shared.real_device.is_running() {
                        warn!("[{}] {} pending ray buffers lost with {}",
                              self.name, self.pending(), self.shared.real_device.name());
                        break;
                    }
                }
                Err(_) => break,
            }
        }
        let leftover = self.done_queue().clear().len();
        debug!("[{}] stopped, {} pending ray buffers drained, {} discarded", self.name, drained, leftover);
        self.pending.store(0, Ordering::SeqCst);

        let still_needed = self.shared.running.iter().any(|running| running.load(Ordering::SeqCst));
        if !still_needed {
            if let Some(handle) = router.take() {
                self.shared.real_device.interrupt();
                if handle.join().is_err() {
                    error!("[{}] router thread panicked", self.name);
                }
            }
            self.shared.real_device.stop();
        }
        info!("[{}] stopped", self.name);
    }

    fn is_running(&self) -> bool {
        self.shared.running[self.index].load(Ordering::SeqCst)
    }

    fn push_ray_buffer(&self, mut ray_buffer: RayBuffer) {
        debug_assert!(self.is_running(), "ray buffer pushed to stopped device {}", self.name);
        ray_buffer.push_user_data(self.index);
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.shared.real_device.push_ray_buffer(ray_buffer);
    }

    fn pop_ray_buffer(&self) -> Result<RayBuffer> {
        let ray_buffer = self.done_queue().pop()?;
        self.pending.fetch_sub(1, Ordering::SeqCst);
        self.stats.add_rays(ray_buffer.ray_count());
        Ok(ray_buffer)
    }

    fn queue_size(&self) -> usize {
        self.shared.real_device.queue_size()
    }

    fn load(&self) -> f64 { 1.0 }

    fn performance(&self) -> f64 {
        self.stats.performance()
    }
}
