mod render_thread;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use intersect_common::error::DeviceError;
use intersect_common::parameters::DeviceParameters;
use intersect_common::rays_per_second::RaysPerSecond;
use intersect_common::scene::Scene;
use intersect_devices::DeviceSet;
use log::{error, info};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::render_thread::{HitCounter, RenderThread};

const SCENE_TRIANGLE_COUNT: usize = 100_000;
const SCENE_EXTENT: f32 = 50.0;
const SCENE_TRIANGLE_SIZE: f32 = 1.0;
const DEFAULT_HALT_SECONDS: u64 = 10;

const USAGE: &str = "usage: intersect_bench <native threads> <use CPU device 0|1> <use GPU device 0|1> \
                     <GPU workgroup size, 0=default> [halt seconds] [low latency 0|1]";

fn parse_arg<T: std::str::FromStr>(args: &[String], index: usize, name: &str) -> Option<T> {
    let arg = args.get(index)?;
    match arg.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            error!("invalid {}: {}", name, arg);
            None
        }
    }
}

fn main() -> Result<(), DeviceError> {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 4 {
        println!("{}", USAGE);
        return Ok(());
    }
    let (Some(native_threads), Some(use_cpu), Some(use_gpu), Some(work_size)) = (
        parse_arg::<usize>(&args, 0, "native thread count"),
        parse_arg::<u32>(&args, 1, "CPU device flag"),
        parse_arg::<u32>(&args, 2, "GPU device flag"),
        parse_arg::<u32>(&args, 3, "GPU workgroup size"),
    ) else {
        println!("{}", USAGE);
        return Ok(());
    };
    let halt_seconds = parse_arg::<u64>(&args, 4, "halt seconds").unwrap_or(DEFAULT_HALT_SECONDS);
    let low_latency = parse_arg::<u32>(&args, 5, "low latency flag").unwrap_or(0) != 0;

    let params = DeviceParameters::new(native_threads, use_cpu != 0, use_gpu != 0)
        .with_force_gpu_work_size(work_size)
        .with_low_latency(low_latency);
    info!("{:?}", params);

    let mut rng = StdRng::seed_from_u64(0);
    let scene = Arc::new(Scene::random_soup(&mut rng,
                                            SCENE_TRIANGLE_COUNT,
                                            SCENE_EXTENT,
                                            SCENE_TRIANGLE_SIZE));
    let device_set = DeviceSet::new(&params, Arc::clone(&scene))?;

    let halt = Arc::new(AtomicBool::new(false));
    let counter = Arc::new(HitCounter::default());
    let mut render_threads = Vec::new();
    let devices = device_set.native_devices().iter()
        .map(|device| Arc::clone(device) as Arc<dyn intersect_devices::IntersectionDevice>)
        .chain(device_set.render_devices().iter().cloned());
    for (index, device) in devices.enumerate() {
        render_threads.push(RenderThread::start(index,
                                                device,
                                                params.ray_buffer_size(),
                                                SCENE_EXTENT,
                                                Arc::clone(&halt),
                                                Arc::clone(&counter))?);
    }
    if render_threads.is_empty() {
        error!("no device selected");
        return Ok(());
    }

    let mut rays_per_second = RaysPerSecond::new();
    let start_time = Instant::now();
    let halt_time = Duration::from_secs(halt_seconds);
    while start_time.elapsed() < halt_time {
        thread::sleep(Duration::from_secs(1));

        let performance = device_set.total_performance();
        rays_per_second.update(performance);
        info!("[Elapsed time: {}secs][Rays/sec {:.0}K ({:.0}K avg)][Hit ratio {:.3}]",
              start_time.elapsed().as_secs(),
              performance / 1000.0,
              rays_per_second.get_avg() / 1000.0,
              counter.hit_ratio());
        for device in device_set.all_devices() {
            info!("  [{}][Rays/sec {:.0}K][Load {:.1}%]",
                  device.name(), device.performance() / 1000.0, device.load() * 100.0);
        }
    }

    info!("halting after {} rays", counter.rays());
    halt.store(true, Ordering::Relaxed);
    // render threads parked in a pop see the halt flag only once woken
    device_set.interrupt_all();
    for render_thread in render_threads.iter_mut() {
        render_thread.stop();
    }
    device_set.stop_all();
    Ok(())
}
