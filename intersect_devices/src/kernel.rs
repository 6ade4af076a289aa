use std::sync::Arc;

use intersect_common::ray::{Ray, RayHit};
use intersect_common::scene::Scene;
use intersect_common::Result;
use rayon::iter::{IndexedParallelIterator, IntoParallelRefIterator, IntoParallelRefMutIterator, ParallelIterator};

/// The batched intersection routine an accelerated device drives from its worker thread.
///
/// One call stages `rays`, runs the kernel over them and blocks until `hits` holds the
/// results. A kernel is owned by exactly one device and moves into that device's worker
/// thread while it runs.
pub trait IntersectionKernel: Send {
    fn name(&self) -> &str;
    /// Largest batch the kernel's buffers can hold.
    fn capacity(&self) -> usize;
    fn intersect(&mut self, rays: &[Ray], hits: &mut [RayHit]) -> Result<()>;
}

// CPU stand-in for the compute shader, one rayon task per ray
pub struct EmulatedKernel {
    name: String,
    scene: Arc<Scene>,
    capacity: usize,
}

impl EmulatedKernel {
    pub fn new(name: &str, scene: Arc<Scene>, capacity: usize) -> Self {
        Self { name: name.to_string(), scene, capacity }
    }
}

impl IntersectionKernel for EmulatedKernel {
    fn name(&self) -> &str {
        &self.name
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn intersect(&mut self, rays: &[Ray], hits: &mut [RayHit]) -> Result<()> {
        let scene = &self.scene;
        hits.par_iter_mut()
            .zip(rays.par_iter())
            .for_each(|(hit, ray)| *hit = scene.intersect(ray));
        Ok(())
    }
}
