use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use glam::Vec3;
use intersect_common::error::{DeviceError, Result};
use intersect_common::ray::{Ray, RayHit};
use intersect_common::ray_buffer::RayBuffer;
use intersect_common::scene::Scene;
use intersect_devices::{AcceleratedIntersectionDevice, EmulatedKernel, IntersectionDevice, IntersectionKernel,
                        NativeIntersectionDevice, VirtualM2OIntersectionDevice, VirtualO2MDevice};
use parking_lot::{Condvar, Mutex};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn accelerated(index: usize, scene: &Arc<Scene>) -> Arc<dyn IntersectionDevice> {
    let kernel = EmulatedKernel::new(&format!("emulated-{}", index), Arc::clone(scene), 16);
    Arc::new(AcceleratedIntersectionDevice::new(index, Box::new(kernel)))
}

// ray 0 hits the unit triangle head on, the others pass beside it
fn unit_triangle_rays(id: usize) -> RayBuffer {
    let mut buffer = RayBuffer::new(id, 16);
    buffer.add_ray(Ray::new(Vec3::new(0.0, 0.0, -1.0), Vec3::Z));
    buffer.add_ray(Ray::new(Vec3::new(2.0, 0.0, -1.0), Vec3::Z));
    buffer.add_ray(Ray::new(Vec3::new(0.0, 2.0, -1.0), Vec3::Z));
    buffer.add_ray(Ray::new(Vec3::new(-2.0, -2.0, -1.0), Vec3::Z));
    buffer
}

fn assert_unit_triangle_hits(buffer: &RayBuffer) {
    let hits = buffer.hits();
    assert_eq!(buffer.ray_count(), 4);
    assert_eq!(hits[0].index, 0);
    assert!((hits[0].t - 1.0).abs() < 1e-5, "t = {}", hits[0].t);
    for hit in &hits[1..] {
        assert_eq!(hit.index, RayHit::NO_HIT);
        assert_eq!(hit.t, f32::INFINITY);
    }
}

fn round_trip(device: &dyn IntersectionDevice) {
    device.start().unwrap();
    device.push_ray_buffer(unit_triangle_rays(42));
    let buffer = device.pop_ray_buffer().unwrap();
    assert_eq!(buffer.id(), 42);
    assert_unit_triangle_hits(&buffer);
    device.stop();
    device.stop();
    assert!(!device.is_running());
}

#[test]
fn unit_triangle_on_native_device() {
    init();
    let device = NativeIntersectionDevice::new(Arc::new(Scene::unit_triangle()), 0);
    round_trip(&device);
}

#[test]
fn unit_triangle_on_accelerated_device() {
    init();
    let scene = Arc::new(Scene::unit_triangle());
    round_trip(accelerated(0, &scene).as_ref());
}

#[test]
fn unit_triangle_on_o2m_device() {
    init();
    let scene = Arc::new(Scene::unit_triangle());
    let device = VirtualO2MDevice::new(0, vec![accelerated(0, &scene), accelerated(1, &scene)]);
    assert_eq!(device.name(), "VirtualO2MDevice-000");
    round_trip(&device);
}

#[test]
fn unit_triangle_on_m2o_endpoints() {
    init();
    let scene = Arc::new(Scene::unit_triangle());
    let group = VirtualM2OIntersectionDevice::new(2, accelerated(0, &scene));
    round_trip(group.get_virtual_device(0).unwrap().as_ref());
    round_trip(group.get_virtual_device(1).unwrap().as_ref());
}

#[test]
fn m2o_over_o2m_device() {
    init();
    let scene = Arc::new(Scene::unit_triangle());
    let o2m: Arc<dyn IntersectionDevice> =
        Arc::new(VirtualO2MDevice::new(0, vec![accelerated(0, &scene), accelerated(1, &scene)]));
    let group = VirtualM2OIntersectionDevice::new(2, o2m);
    let first = group.get_virtual_device(0).unwrap();
    let second = group.get_virtual_device(1).unwrap();
    first.start().unwrap();
    second.start().unwrap();

    for id in 0..10 {
        first.push_ray_buffer(unit_triangle_rays(id));
        second.push_ray_buffer(unit_triangle_rays(100 + id));
    }
    let mut first_ids: Vec<_> = (0..10).map(|_| first.pop_ray_buffer().unwrap().id()).collect();
    let mut second_ids: Vec<_> = (0..10).map(|_| second.pop_ray_buffer().unwrap().id()).collect();
    first_ids.sort();
    second_ids.sort();
    assert_eq!(first_ids, (0..10).collect::<Vec<_>>());
    assert_eq!(second_ids, (100..110).collect::<Vec<_>>());

    first.stop();
    second.stop();
    assert!(!group.real_device().is_running());
}

#[test]
fn stop_without_start_is_harmless() {
    init();
    let scene = Arc::new(Scene::unit_triangle());
    let devices: Vec<Arc<dyn IntersectionDevice>> = vec![
        Arc::new(NativeIntersectionDevice::new(Arc::clone(&scene), 0)),
        accelerated(0, &scene),
        Arc::new(VirtualO2MDevice::new(0, vec![accelerated(1, &scene)])),
    ];
    for device in &devices {
        device.stop();
        device.stop();
        assert!(!device.is_running());
    }
}

// fails every batch, but only after holding it for a while
struct LateFailingKernel {
    name: String,
}

impl IntersectionKernel for LateFailingKernel {
    fn name(&self) -> &str { &self.name }
    fn capacity(&self) -> usize { 16 }
    fn intersect(&mut self, _rays: &[Ray], _hits: &mut [RayHit]) -> Result<()> {
        thread::sleep(Duration::from_millis(30));
        Err(DeviceError::Dispatch { device: self.name.clone(), reason: "lost device".to_string() })
    }
}

#[test]
fn m2o_over_failing_o2m_stops() {
    init();
    let devices: Vec<Arc<dyn IntersectionDevice>> = (0..2)
        .map(|index| {
            let kernel = LateFailingKernel { name: format!("late-failing-{}", index) };
            Arc::new(AcceleratedIntersectionDevice::new(index, Box::new(kernel))) as Arc<dyn IntersectionDevice>
        })
        .collect();
    let o2m: Arc<dyn IntersectionDevice> = Arc::new(VirtualO2MDevice::new(0, devices.clone()));
    let group = VirtualM2OIntersectionDevice::new(1, Arc::clone(&o2m));
    let endpoint = group.get_virtual_device(0).unwrap();
    endpoint.start().unwrap();
    endpoint.push_ray_buffer(unit_triangle_rays(0));

    let (sender, receiver) = mpsc::channel();
    let stopper = {
        let endpoint = Arc::clone(&endpoint);
        thread::spawn(move || {
            endpoint.stop();
            let _ = sender.send(());
        })
    };
    assert!(receiver.recv_timeout(Duration::from_secs(5)).is_ok(), "endpoint stop hung");
    stopper.join().unwrap();

    assert!(!endpoint.is_running());
    assert!(!o2m.is_running());
    assert!(devices.iter().all(|device| !device.is_running()));
}

// lets one batch through per permit, so the test decides when each device finishes
#[derive(Default)]
struct GateState {
    permits: usize,
    waiting: bool,
    open: bool,
}

#[derive(Default)]
struct Gate {
    state: Mutex<GateState>,
    changed: Condvar,
}

impl Gate {
    fn pass(&self) {
        let mut state = self.state.lock();
        state.waiting = true;
        while !state.open && state.permits == 0 {
            self.changed.wait(&mut state);
        }
        state.permits = state.permits.saturating_sub(1);
        state.waiting = false;
    }

    fn release(&self) {
        self.state.lock().permits += 1;
        self.changed.notify_all();
    }

    fn open(&self) {
        self.state.lock().open = true;
        self.changed.notify_all();
    }

    fn is_waiting(&self) -> bool {
        self.state.lock().waiting
    }
}

struct GatedKernel {
    name: String,
    gate: Arc<Gate>,
    inner: EmulatedKernel,
}

impl IntersectionKernel for GatedKernel {
    fn name(&self) -> &str { &self.name }
    fn capacity(&self) -> usize { self.inner.capacity() }
    fn intersect(&mut self, rays: &[Ray], hits: &mut [RayHit]) -> Result<()> {
        self.gate.pass();
        self.inner.intersect(rays, hits)
    }
}

#[test]
fn o2m_keeps_device_queues_level_under_staggered_latencies() {
    init();
    let scene = Arc::new(Scene::unit_triangle());
    let gates: Vec<Arc<Gate>> = (0..3).map(|_| Arc::new(Gate::default())).collect();
    let devices: Vec<Arc<dyn IntersectionDevice>> = gates.iter().enumerate()
        .map(|(index, gate)| {
            let kernel = GatedKernel {
                name: format!("gated-{}", index),
                gate: Arc::clone(gate),
                inner: EmulatedKernel::new("inner", Arc::clone(&scene), 16),
            };
            Arc::new(AcceleratedIntersectionDevice::new(index, Box::new(kernel))) as Arc<dyn IntersectionDevice>
        })
        .collect();
    let device = VirtualO2MDevice::new(0, devices.clone());
    device.start().unwrap();

    let queue_sizes = || devices.iter().map(|device| device.queue_size()).collect::<Vec<_>>();
    // every buffer in flight sits in a device queue or in a kernel held at its gate
    let wait_until_settled = |in_flight: usize| {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let queues = queue_sizes();
            let waiting: Vec<bool> = gates.iter().map(|gate| gate.is_waiting()).collect();
            let held = waiting.iter().filter(|waiting| **waiting).count();
            if device.queue_size() == 0
                && queues.iter().sum::<usize>() + held == in_flight
                && queues.iter().zip(&waiting).all(|(queue, waiting)| *queue == 0 || *waiting) {
                return queues;
            }
            assert!(Instant::now() < deadline, "never settled with {} in flight: {:?}", in_flight, queues);
            thread::sleep(Duration::from_millis(1));
        }
    };
    let assert_level = |queues: &[usize]| {
        let max = queues.iter().max().unwrap();
        let min = queues.iter().min().unwrap();
        assert!(max - min <= 1, "queue sizes {:?}", queues);
    };

    let in_flight = 12;
    let mut next_id = 0;
    for _ in 0..in_flight {
        device.push_ray_buffer(unit_triangle_rays(next_id));
        next_id += 1;
        assert_level(&wait_until_settled(next_id));
    }
    assert_eq!(queue_sizes(), vec![3, 3, 3]);

    // device 0 finishes a batch every round, device 1 every third, device 2 every seventh
    let mut ids = Vec::new();
    for round in 0..21 {
        for (index, period) in [1, 3, 7].iter().enumerate() {
            if round % period != 0 {
                continue;
            }
            gates[index].release();
            let buffer = device.pop_ray_buffer().unwrap();
            assert_unit_triangle_hits(&buffer);
            ids.push(buffer.id());
            wait_until_settled(in_flight - 1);

            device.push_ray_buffer(unit_triangle_rays(next_id));
            next_id += 1;
            assert_level(&wait_until_settled(in_flight));
        }
    }
    assert!(devices[0].performance() > devices[2].performance());

    for gate in &gates {
        gate.open();
    }
    for _ in 0..in_flight {
        let buffer = device.pop_ray_buffer().unwrap();
        assert_unit_triangle_hits(&buffer);
        ids.push(buffer.id());
    }
    ids.sort();
    assert_eq!(ids, (0..next_id).collect::<Vec<_>>());
    assert_eq!(device.queue_size(), 0);

    device.stop();
    device.stop();
    assert!(devices.iter().all(|device| !device.is_running()));
}
