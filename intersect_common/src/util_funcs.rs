use rand::Rng;
use glam::Vec3;
use crate::ray::Ray;
use crate::triangle::Triangle;

pub fn random_vec3_range(rng: &mut impl Rng, min: f32, max: f32) -> Vec3 {
    Vec3::new(rng.random_range(min .. max),
              rng.random_range(min .. max),
              rng.random_range(min .. max))
}

// uniform direction on the unit sphere
pub fn random_unit_vec3(rng: &mut impl Rng) -> Vec3 {
    loop {
        let v = random_vec3_range(rng, -1.0, 1.0);
        let len_sq = v.length_squared();
        if len_sq > 1e-6 && len_sq <= 1.0 {
            return v / len_sq.sqrt();
        }
    }
}

pub fn random_ray(rng: &mut impl Rng, extent: f32) -> Ray {
    Ray::new(random_vec3_range(rng, -extent, extent), random_unit_vec3(rng))
}

// a soup of small triangles scattered inside [-extent, extent]^3
pub fn random_triangles(rng: &mut impl Rng, count: usize, extent: f32, size: f32) -> Vec<Triangle> {
    (0..count)
        .map(|i| {
            let center = random_vec3_range(rng, -extent, extent);
            Triangle::new(center + size * random_unit_vec3(rng),
                          center + size * random_unit_vec3(rng),
                          center + size * random_unit_vec3(rng),
                          i as u32)
        })
        .collect()
}
