use crate::ray::{Ray, RayHit};

pub const RAY_BUFFER_SIZE: usize = 65536;
pub const USER_DATA_STACK_SIZE: usize = 8;

/// A reusable batch of rays and the hit slots the intersection device fills in.
///
/// The user data stack is only a routing trail: virtual devices push their endpoint index
/// before handing the buffer to a shared device and pop it when the buffer comes back.
#[derive(Debug)]
pub struct RayBuffer {
    id: usize,
    rays: Vec<Ray>,
    hits: Vec<RayHit>,
    ray_count: usize,
    user_data: [usize; USER_DATA_STACK_SIZE],
    user_data_count: usize,
}

impl RayBuffer {
    pub fn new(id: usize, size: usize) -> Self {
        Self {
            id,
            rays: vec![Ray::default(); size],
            hits: vec![RayHit::default(); size],
            ray_count: 0,
            user_data: [0; USER_DATA_STACK_SIZE],
            user_data_count: 0,
        }
    }

    pub fn id(&self) -> usize { self.id }
    pub fn size(&self) -> usize { self.rays.len() }
    pub fn ray_count(&self) -> usize { self.ray_count }

    pub fn is_full(&self) -> bool {
        self.ray_count == self.rays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ray_count == 0
    }

    /// Drops the rays but keeps the routing trail.
    pub fn reset(&mut self) {
        self.ray_count = 0;
    }

    /// Returns the slot index of the new ray, or `None` when the buffer is full.
    pub fn add_ray(&mut self, ray: Ray) -> Option<usize> {
        if self.is_full() {
            return None;
        }
        let index = self.ray_count;
        self.rays[index] = ray;
        self.ray_count += 1;
        Some(index)
    }

    pub fn rays(&self) -> &[Ray] {
        &self.rays[..self.ray_count]
    }

    pub fn hits(&self) -> &[RayHit] {
        &self.hits[..self.ray_count]
    }

    pub fn hits_mut(&mut self) -> &mut [RayHit] {
        &mut self.hits[..self.ray_count]
    }

    pub fn rays_and_hits_mut(&mut self) -> (&[Ray], &mut [RayHit]) {
        (&self.rays[..self.ray_count], &mut self.hits[..self.ray_count])
    }

    pub fn push_user_data(&mut self, data: usize) {
        debug_assert!(self.user_data_count < USER_DATA_STACK_SIZE, "ray buffer routing stack overflow");
        if self.user_data_count < USER_DATA_STACK_SIZE {
            self.user_data[self.user_data_count] = data;
            self.user_data_count += 1;
        }
    }

    pub fn pop_user_data(&mut self) -> Option<usize> {
        if self.user_data_count == 0 {
            return None;
        }
        self.user_data_count -= 1;
        Some(self.user_data[self.user_data_count])
    }

    pub fn user_data(&self) -> Option<usize> {
        self.user_data_count.checked_sub(1).map(|top| self.user_data[top])
    }

    pub fn user_data_count(&self) -> usize { self.user_data_count }
}
