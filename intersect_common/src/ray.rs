use glam::Vec3;

pub const RAY_EPSILON: f32 = 1e-4;

// layout matches the `Ray` struct in the intersection kernel:
// vec3 origin, f32 mint, vec3 direction, f32 maxt
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct Ray {
    pub origin: Vec3,
    pub mint: f32,
    pub direction: Vec3,
    pub maxt: f32,
}

unsafe impl bytemuck::Zeroable for Ray {}
unsafe impl bytemuck::Pod for Ray {}

impl Default for Ray {
    fn default() -> Self {
        Self {
            origin: Vec3::ZERO,
            mint: RAY_EPSILON,
            direction: Vec3::Z,
            maxt: f32::INFINITY,
        }
    }
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self { origin, mint: RAY_EPSILON, direction, maxt: f32::INFINITY }
    }

    pub fn with_range(origin: Vec3, direction: Vec3, mint: f32, maxt: f32) -> Self {
        Self { origin, mint, direction, maxt }
    }

    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + t * self.direction
    }

    pub fn inverse_direction(&self) -> Vec3 {
        self.direction.recip()
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct RayHit {
    pub t: f32,
    pub index: u32,
}

impl Default for RayHit {
    fn default() -> Self {
        Self::miss()
    }
}

impl RayHit {
    pub const NO_HIT: u32 = 0xffff_ffff;

    pub fn miss() -> Self {
        Self { t: f32::INFINITY, index: Self::NO_HIT }
    }

    pub fn is_miss(&self) -> bool {
        self.index == Self::NO_HIT
    }
}
