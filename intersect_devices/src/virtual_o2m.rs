use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use intersect_common::error::Result;
use intersect_common::ray_buffer::RayBuffer;
use intersect_common::ray_buffer_queue::RayBufferQueue;
use log::{debug, error, info, warn};
use parking_lot::Mutex;

use crate::device::{DeviceKind, DeviceStats, IntersectionDevice};

type Job = Box<dyn FnOnce() + Send + 'static>;

fn spawn_named(name: String, job: Job) -> io::Result<JoinHandle<()>> {
    thread::Builder::new().name(name).spawn(job)
}

/// Index of the running device with the shortest queue; the lowest index wins ties.
///
/// Stopped devices are skipped, so a device whose worker died stops receiving work.
pub fn least_loaded_device(devices: &[Arc<dyn IntersectionDevice>]) -> Option<usize> {
    let mut selected: Option<(usize, usize)> = None;
    for (index, device) in devices.iter().enumerate() {
        if !device.is_running() {
            continue;
        }
        let queue_size = device.queue_size();
        match selected {
            Some((_, smallest)) if queue_size >= smallest => {}
            _ => selected = Some((index, queue_size)),
        }
    }
    selected.map(|(index, _)| index)
}

struct O2MShared {
    name: String,
    todo_queue: RayBufferQueue,
    done_queue: RayBufferQueue,
    devices: Vec<Arc<dyn IntersectionDevice>>,
    stats: DeviceStats,
}

impl O2MShared {
    fn any_device_running(&self) -> bool {
        self.devices.iter().any(|device| device.is_running())
    }

    fn push_loop(shared: Arc<O2MShared>) {
        debug!("[{}] pusher thread started", shared.name);
        loop {
            let ray_buffer = match shared.todo_queue.pop() {
                Ok(ray_buffer) => ray_buffer,
                Err(_) => {
                    debug!("[{}] pusher thread halted", shared.name);
                    break;
                }
            };
            match least_loaded_device(&shared.devices) {
                Some(index) => {
                    let device = &shared.devices[index];
                    device.push_ray_buffer(ray_buffer);
                    // the device may have failed between the pick and the push
                    if !device.is_running() {
                        for ray_buffer in device.reclaim() {
                            shared.todo_queue.push(ray_buffer);
                        }
                    }
                }
                None => {
                    error!("[{}] no running device left to push ray buffer {}", shared.name, ray_buffer.id());
                    shared.todo_queue.push(ray_buffer);
                    // poppers waiting on this device would never be fed again
                    shared.done_queue.interrupt();
                    break;
                }
            }
        }
    }

    fn pop_loop(shared: Arc<O2MShared>, index: usize) {
        let device = &shared.devices[index];
        debug!("[{}] popper thread for {} started", shared.name, device.name());
        loop {
            match device.pop_ray_buffer() {
                Ok(ray_buffer) => shared.done_queue.push(ray_buffer),
                Err(_) => {
                    let stranded = device.reclaim();
                    if !stranded.is_empty() {
                        warn!("[{}] {} failed, handing {} ray buffers to the other devices",
                              shared.name, device.name(), stranded.len());
                    }
                    for ray_buffer in stranded {
                        shared.todo_queue.push(ray_buffer);
                    }
                    if !shared.any_device_running() {
                        shared.done_queue.interrupt();
                    }
                    debug!("[{}] popper thread for {} halted", shared.name, device.name());
                    break;
                }
            }
        }
    }
}

/// Spreads one stream of ray buffers over several physical devices.
///
/// A pusher thread hands every buffer to the least loaded device and one popper thread per
/// device collects the finished buffers into a single done queue. When a device fails, its
/// popper hands the buffers it was holding back to the pusher.
pub struct VirtualO2MDevice {
    index: usize,
    shared: Arc<O2MShared>,
    threads: Mutex<Option<Vec<JoinHandle<()>>>>,
    running: AtomicBool,
}

impl VirtualO2MDevice {
    pub fn new(index: usize, devices: Vec<Arc<dyn IntersectionDevice>>) -> Self {
        let shared = O2MShared {
            name: format!("VirtualO2MDevice-{:03}", index),
            todo_queue: RayBufferQueue::new(),
            done_queue: RayBufferQueue::new(),
            devices,
            stats: DeviceStats::new(),
        };
        Self {
            index,
            shared: Arc::new(shared),
            threads: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    pub fn real_devices(&self) -> &[Arc<dyn IntersectionDevice>] {
        &self.shared.devices
    }

    // pusher first, then one popper per device
    fn spawn_threads<S>(&self, spawn: &S) -> Result<Vec<JoinHandle<()>>>
    where
        S: Fn(String, Job) -> io::Result<JoinHandle<()>>,
    {
        let mut threads = Vec::with_capacity(self.shared.devices.len() + 1);
        let shared = Arc::clone(&self.shared);
        let pusher = spawn(format!("{}-pusher", self.shared.name),
                           Box::new(move || O2MShared::push_loop(shared)));
        match pusher {
            Ok(pusher) => threads.push(pusher),
            Err(err) => {
                error!("[{}] failed to spawn the pusher thread: {}", self.shared.name, err);
                self.halt(threads);
                return Err(err.into());
            }
        }
        for index in 0..self.shared.devices.len() {
            let shared = Arc::clone(&self.shared);
            let popper = spawn(format!("{}-popper-{}", self.shared.name, index),
                               Box::new(move || O2MShared::pop_loop(shared, index)));
            match popper {
                Ok(popper) => threads.push(popper),
                Err(err) => {
                    error!("[{}] failed to spawn popper thread {}: {}", self.shared.name, index, err);
                    self.halt(threads);
                    return Err(err.into());
                }
            }
        }
        Ok(threads)
    }

    // interrupt and join the routing threads, then stop the physical devices
    fn halt(&self, threads: Vec<JoinHandle<()>>) {
        self.shared.todo_queue.interrupt();
        for device in &self.shared.devices {
            device.interrupt();
        }
        for thread in threads {
            if thread.join().is_err() {
                error!("[{}] routing thread panicked", self.shared.name);
            }
        }
        for device in &self.shared.devices {
            device.stop();
        }
    }

    fn start_with<S>(&self, spawn: S) -> Result<()>
    where
        S: Fn(String, Job) -> io::Result<JoinHandle<()>>,
    {
        let mut threads = self.threads.lock();
        if threads.is_some() {
            return Ok(());
        }
        self.shared.todo_queue.reset_interrupt();
        self.shared.done_queue.reset_interrupt();
        self.shared.stats.reset();

        for (started, device) in self.shared.devices.iter().enumerate() {
            if let Err(err) = device.start() {
                error!("[{}] failed to start {}: {}", self.shared.name, device.name(), err);
                for device in &self.shared.devices[..started] {
                    device.stop();
                }
                return Err(err);
            }
        }
        *threads = Some(self.spawn_threads(&spawn)?);
        self.running.store(true, Ordering::SeqCst);
        info!("[{}] started over {} devices", self.shared.name, self.shared.devices.len());
        Ok(())
    }
}

impl IntersectionDevice for VirtualO2MDevice {
    fn name(&self) -> &str { &self.shared.name }
    fn index(&self) -> usize { self.index }
    fn kind(&self) -> DeviceKind { DeviceKind::VirtualOneToMany }

    fn start(&self) -> Result<()> {
        self.start_with(spawn_named)
    }

    fn interrupt(&self) {
        self.shared.todo_queue.interrupt();
        self.shared.done_queue.interrupt();
        for device in &self.shared.devices {
            device.interrupt();
        }
    }

    fn stop(&self) {
        let Some(threads) = self.threads.lock().take() else {
            return;
        };
        self.running.store(false, Ordering::SeqCst);
        self.halt(threads);

        let discarded = self.shared.todo_queue.clear().len() + self.shared.done_queue.clear().len();
        debug!("[{}] stopped, {} ray buffers discarded", self.shared.name, discarded);
        self.shared.todo_queue.reset_interrupt();
        self.shared.done_queue.reset_interrupt();
        info!("[{}] stopped", self.shared.name);
    }

    // dead once every physical device has failed
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && self.shared.any_device_running()
    }

    fn push_ray_buffer(&self, ray_buffer: RayBuffer) {
        debug_assert!(self.running.load(Ordering::SeqCst), "ray buffer pushed to stopped device {}", self.shared.name);
        self.shared.todo_queue.push(ray_buffer);
    }

    fn pop_ray_buffer(&self) -> Result<RayBuffer> {
        let ray_buffer = self.shared.done_queue.pop()?;
        self.shared.stats.add_rays(ray_buffer.ray_count());
        Ok(ray_buffer)
    }

    fn queue_size(&self) -> usize {
        self.shared.todo_queue.size()
    }

    fn load(&self) -> f64 { 1.0 }

    fn performance(&self) -> f64 {
        self.shared.stats.performance()
    }
}

impl Drop for VirtualO2MDevice {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accelerated::AcceleratedIntersectionDevice;
    use crate::kernel::{EmulatedKernel, IntersectionKernel};
    use glam::Vec3;
    use intersect_common::error::DeviceError;
    use intersect_common::ray::{Ray, RayHit};
    use intersect_common::scene::Scene;
    use std::sync::atomic::AtomicUsize;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    struct FailingKernel;

    impl IntersectionKernel for FailingKernel {
        fn name(&self) -> &str { "failing" }
        fn capacity(&self) -> usize { 16 }
        fn intersect(&mut self, _rays: &[Ray], _hits: &mut [RayHit]) -> Result<()> {
            Err(DeviceError::Dispatch { device: "failing".to_string(), reason: "lost device".to_string() })
        }
    }

    fn emulated(index: usize) -> Arc<dyn IntersectionDevice> {
        let kernel = EmulatedKernel::new("emulated", Arc::new(Scene::unit_triangle()), 16);
        Arc::new(AcceleratedIntersectionDevice::new(index, Box::new(kernel)))
    }

    fn failing(index: usize) -> Arc<dyn IntersectionDevice> {
        Arc::new(AcceleratedIntersectionDevice::new(index, Box::new(FailingKernel)))
    }

    fn buffer(id: usize) -> RayBuffer {
        let mut buffer = RayBuffer::new(id, 16);
        buffer.add_ray(Ray::new(Vec3::new(0.0, 0.0, -1.0), Vec3::Z));
        buffer
    }

    fn no_threads(_name: String, _job: Job) -> io::Result<JoinHandle<()>> {
        Err(io::Error::other("thread limit reached"))
    }

    // only what the balancer looks at
    struct QueueStub {
        queue_size: AtomicUsize,
        running: bool,
    }

    impl QueueStub {
        fn new(queue_size: usize, running: bool) -> Arc<dyn IntersectionDevice> {
            Arc::new(Self { queue_size: AtomicUsize::new(queue_size), running })
        }
    }

    impl IntersectionDevice for QueueStub {
        fn name(&self) -> &str { "stub" }
        fn index(&self) -> usize { 0 }
        fn kind(&self) -> DeviceKind { DeviceKind::Accelerated }
        fn start(&self) -> Result<()> { Ok(()) }
        fn interrupt(&self) {}
        fn stop(&self) {}
        fn is_running(&self) -> bool { self.running }
        fn push_ray_buffer(&self, _ray_buffer: RayBuffer) {
            self.queue_size.fetch_add(1, Ordering::SeqCst);
        }
        fn pop_ray_buffer(&self) -> Result<RayBuffer> {
            Err(intersect_common::DeviceError::Interrupted)
        }
        fn queue_size(&self) -> usize { self.queue_size.load(Ordering::SeqCst) }
        fn load(&self) -> f64 { 1.0 }
        fn performance(&self) -> f64 { 1.0 }
    }

    #[test]
    fn ties_go_to_the_lowest_index() {
        let devices = vec![QueueStub::new(2, true), QueueStub::new(1, true), QueueStub::new(1, true)];
        assert_eq!(least_loaded_device(&devices), Some(1));
        let devices = vec![QueueStub::new(0, true), QueueStub::new(0, true)];
        assert_eq!(least_loaded_device(&devices), Some(0));
    }

    #[test]
    fn stopped_devices_are_skipped() {
        let devices = vec![QueueStub::new(0, false), QueueStub::new(5, true)];
        assert_eq!(least_loaded_device(&devices), Some(1));
        let devices = vec![QueueStub::new(0, false)];
        assert_eq!(least_loaded_device(&devices), None);
        assert_eq!(least_loaded_device(&[]), None);
    }

    #[test]
    fn shortest_queue_dispatch_keeps_queues_level() {
        let devices = vec![QueueStub::new(0, true), QueueStub::new(3, true), QueueStub::new(1, true)];
        for id in 0..50 {
            let index = least_loaded_device(&devices).unwrap();
            devices[index].push_ray_buffer(RayBuffer::new(id, 1));
        }
        let sizes: Vec<_> = devices.iter().map(|device| device.queue_size()).collect();
        let max = *sizes.iter().max().unwrap();
        let min = *sizes.iter().min().unwrap();
        assert!(max - min <= 1, "queue sizes {:?}", sizes);
        assert_eq!(sizes.iter().sum::<usize>(), 54);
    }

    #[test]
    fn failed_pusher_spawn_stops_devices() {
        init();
        let device = VirtualO2MDevice::new(0, vec![emulated(0), emulated(1)]);
        assert!(device.start_with(no_threads).is_err());
        assert!(!device.is_running());
        assert!(device.real_devices().iter().all(|device| !device.is_running()));

        device.start().unwrap();
        device.push_ray_buffer(buffer(4));
        assert_eq!(device.pop_ray_buffer().unwrap().id(), 4);
        device.stop();
    }

    #[test]
    fn failed_popper_spawn_stops_devices() {
        init();
        let device = VirtualO2MDevice::new(0, vec![emulated(0), emulated(1)]);
        let spawned = AtomicUsize::new(0);
        let result = device.start_with(|name, job| {
            // the pusher gets its thread, the first popper does not
            if spawned.fetch_add(1, Ordering::SeqCst) == 1 {
                no_threads(name, job)
            } else {
                spawn_named(name, job)
            }
        });
        assert!(result.is_err());
        assert_eq!(spawned.load(Ordering::SeqCst), 2);
        assert!(!device.is_running());
        assert!(device.real_devices().iter().all(|device| !device.is_running()));
        device.stop();
    }

    #[test]
    fn failed_device_hands_its_buffers_to_the_others() {
        init();
        // ties go to index 0, so the first buffer lands on the failing device
        let device = VirtualO2MDevice::new(0, vec![failing(0), emulated(1)]);
        device.start().unwrap();
        device.push_ray_buffer(buffer(9));

        let done = device.pop_ray_buffer().unwrap();
        assert_eq!(done.id(), 9);
        assert_eq!(done.hits()[0].index, 0);
        assert!(!device.real_devices()[0].is_running());
        assert!(device.is_running());
        device.stop();
    }

    #[test]
    fn losing_every_device_interrupts_pop() {
        init();
        let device = VirtualO2MDevice::new(0, vec![failing(0), failing(1)]);
        device.start().unwrap();
        device.push_ray_buffer(buffer(1));

        assert!(matches!(device.pop_ray_buffer(), Err(DeviceError::Interrupted)));
        assert!(!device.is_running());
        device.stop();
        assert!(device.real_devices().iter().all(|device| !device.is_running()));
    }
}
