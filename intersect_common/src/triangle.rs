use glam::Vec3;
use crate::ray::Ray;

const DET_EPSILON: f32 = 1e-8;

#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct Triangle {
    v0: Vec3,
    prim_id: u32,
    v1: Vec3,
    _buffer1: u32,
    v2: Vec3,
    _buffer2: u32,
}

unsafe impl bytemuck::Pod for Triangle {}
unsafe impl bytemuck::Zeroable for Triangle {}

impl Triangle {
    pub fn new(v0: Vec3, v1: Vec3, v2: Vec3, prim_id: u32) -> Self {
        Self { v0, prim_id, v1, _buffer1: 0, v2, _buffer2: 0 }
    }

    pub fn get_aabb(&self) -> (Vec3, Vec3) {
        let aabb_min = self.v0.min(self.v1).min(self.v2);
        let aabb_max = self.v0.max(self.v1).max(self.v2);
        (aabb_min, aabb_max)
    }

    pub fn centroid(&self) -> Vec3 {
        (self.v0 + self.v1 + self.v2) / 3.0
    }

    // Moller-Trumbore; accepts t in [ray.mint, t_nearest)
    pub fn intersect(&self, ray: &Ray, t_nearest: f32) -> Option<f32> {
        let edge1 = self.v1 - self.v0;
        let edge2 = self.v2 - self.v0;
        let p = ray.direction.cross(edge2);
        let det = edge1.dot(p);
        if det.abs() < DET_EPSILON {
            return None;
        }
        let inv_det = 1.0 / det;

        let s = ray.origin - self.v0;
        let u = s.dot(p) * inv_det;
        if !(0.0..=1.0).contains(&u) {
            return None;
        }
        let q = s.cross(edge1);
        let v = ray.direction.dot(q) * inv_det;
        if v < 0.0 || u + v > 1.0 {
            return None;
        }

        let t = edge2.dot(q) * inv_det;
        if t >= ray.mint && t < t_nearest {
            Some(t)
        } else {
            None
        }
    }

    pub fn vertices(&self) -> [Vec3; 3] { [self.v0, self.v1, self.v2] }
    pub fn prim_id(&self) -> u32 { self.prim_id }
}
