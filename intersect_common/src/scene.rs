use glam::Vec3;
use rand::Rng;
use crate::bvh::{BVHNode, BVHTree};
use crate::ray::{Ray, RayHit};
use crate::triangle::Triangle;
use crate::util_funcs::random_triangles;

/// Immutable triangle geometry and the BVH built over it.
///
/// `intersect` only reads, so one scene is shared by every native device thread.
pub struct Scene {
    triangles: Vec<Triangle>,
    bvh_tree: BVHTree,
}

impl Scene {
    // primitive ids are the positions in `vertices`
    pub fn new(vertices: &[[Vec3; 3]]) -> Self {
        let triangles = vertices.iter()
            .enumerate()
            .map(|(i, v)| Triangle::new(v[0], v[1], v[2], i as u32))
            .collect();
        Self::from_triangles(triangles)
    }

    pub fn from_triangles(mut triangles: Vec<Triangle>) -> Self {
        let mut bvh_tree = BVHTree::new(triangles.len());
        bvh_tree.build_bvh_tree(&mut triangles);
        log::info!("[Scene] {} triangles, {} BVH nodes", triangles.len(), bvh_tree.nodes.len());
        Self { triangles, bvh_tree }
    }

    pub fn empty() -> Self {
        Self::from_triangles(Vec::new())
    }

    // the unit triangle centered at the origin, facing +Z
    pub fn unit_triangle() -> Self {
        Self::new(&[[Vec3::new(-0.5, -0.5, 0.0),
                     Vec3::new(0.5, -0.5, 0.0),
                     Vec3::new(0.0, 0.5, 0.0)]])
    }

    pub fn random_soup(rng: &mut impl Rng, count: usize, extent: f32, size: f32) -> Self {
        Self::from_triangles(random_triangles(rng, count, extent, size))
    }

    pub fn intersect(&self, ray: &Ray) -> RayHit {
        self.bvh_tree.intersect(&self.triangles, ray)
    }

    pub fn triangles(&self) -> &[Triangle] { &self.triangles }
    pub fn bvh_nodes(&self) -> &[BVHNode] { &self.bvh_tree.nodes }
    pub fn triangle_count(&self) -> usize { self.triangles.len() }
}
