use crate::ray::{Ray, RayHit};
use crate::triangle::Triangle;
use glam::{Vec3};

const BINS: usize = 32;
pub const STACK_SIZE: usize = 64;
pub const MISS_DISTANCE: f32 = 1e30;

pub struct Bin {
    aabb_min: Vec3,
    aabb_max: Vec3,
    prim_count: u32,
}

impl Default for Bin {
    fn default() -> Self {
        Self {
            aabb_min: Vec3::INFINITY,
            aabb_max: Vec3::NEG_INFINITY,
            prim_count: 0
        }
    }
}

impl Bin {
    pub fn expand_bin(&mut self, min: Vec3, max: Vec3) {
        self.aabb_min = self.aabb_min.min(min);
        self.aabb_max = self.aabb_max.max(max);
        self.prim_count += 1;
    }

    pub fn get_area(&self) -> f32 {
        if !self.aabb_max.is_finite() {
            return 0.0
        }
        let extent = self.aabb_max - self.aabb_min;
        extent.x * extent.y + extent.y * extent.z + extent.z * extent.x
    }
}

// layout matches the `BVHNode` struct in the intersection kernel
#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct BVHNode {
    pub aabb_min: Vec3,
    pub left_first: u32,
    pub aabb_max: Vec3,
    pub prim_count: u32
}

unsafe impl bytemuck::Pod for BVHNode {}
unsafe impl bytemuck::Zeroable for BVHNode {}

impl BVHNode {
    pub fn find_node_cost(&self) -> f32 {
        let extent = self.aabb_max - self.aabb_min;
        let area = extent.x * extent.y + extent.y * extent.z + extent.z * extent.x;

        self.prim_count as f32 * area
    }

    pub fn update_node_bounds(&mut self, triangles: &[Triangle]) {
        let mut aabb_min = Vec3::INFINITY;
        let mut aabb_max = Vec3::NEG_INFINITY;
        for i in 0..self.prim_count as usize {
            let (tri_min, tri_max) =
                triangles[self.left_first as usize + i].get_aabb();
            aabb_min = aabb_min.min(tri_min);
            aabb_max = aabb_max.max(tri_max);
        }
        self.aabb_min = aabb_min;
        self.aabb_max = aabb_max;
    }

    // returns (splitCost, bestAxis, planeValue)
    pub fn find_best_split_plane(&self, triangles: &[Triangle])
                                 -> (f32, usize, f32) {

        let extent = self.aabb_max - self.aabb_min;
        let start_idx = self.left_first as usize;
        let mut low_cost = f32::INFINITY;
        let mut best_axis = 0;
        let mut best_plane = 0.0;

        for axes in 0..3 {
            if extent[axes] < 0.00001 {
                continue;
            }

            let mut bins: Vec<Bin> = (0..BINS).map(|_| Bin::default()).collect();

            let scale = BINS as f32 / extent[axes];
            let min_bound = self.aabb_min[axes];
            // bin the triangles by centroid along this axis
            for i in 0..self.prim_count as usize {
                let triangle = &triangles[i + start_idx];
                let bin_idx = (BINS - 1).min(
                    ((triangle.centroid()[axes] - min_bound) * scale) as usize);
                let (aabb_min, aabb_max) = triangle.get_aabb();
                bins[bin_idx].expand_bin(aabb_min, aabb_max);
            }

            // N bins means N-1 candidate planes; sweep from both ends at once
            let mut left_count = [0u32; BINS - 1];
            let mut right_count = [0u32; BINS - 1];
            let mut left_area = [0.0f32; BINS - 1];
            let mut right_area = [0.0f32; BINS - 1];
            let mut left_sum_bin = Bin::default();
            let mut right_sum_bin = Bin::default();
            for idx in 0..BINS - 1 {
                left_sum_bin.prim_count += bins[idx].prim_count;
                left_count[idx] = left_sum_bin.prim_count;
                right_sum_bin.prim_count += bins[BINS - 1 - idx].prim_count;
                right_count[BINS - 2 - idx] = right_sum_bin.prim_count;

                left_sum_bin.expand_bin(bins[idx].aabb_min, bins[idx].aabb_max);
                left_sum_bin.prim_count -= 1;
                left_area[idx] = left_sum_bin.get_area();
                right_sum_bin.expand_bin(bins[BINS - 1 - idx].aabb_min, bins[BINS - 1 - idx].aabb_max);
                right_sum_bin.prim_count -= 1;
                right_area[BINS - 2 - idx] = right_sum_bin.get_area();
            }

            let scale = 1.0 / BINS as f32;
            for idx in 0..BINS - 1 {
                let cost = left_count[idx] as f32 * left_area[idx] +
                    right_count[idx] as f32 * right_area[idx];
                if cost < low_cost {
                    best_axis = axes;
                    best_plane = min_bound + extent[axes] * scale * (1.0 + idx as f32);
                    low_cost = cost;
                }
            }
        }

        (low_cost, best_axis, best_plane)
    }
}

/// Leaves never sit deeper than `max_depth`, so traversal never needs more than
/// `STACK_SIZE` stack slots.
pub struct BVHTree {
    pub nodes: Vec<BVHNode>,
    max_depth: usize,
}

impl Default for BVHTree {
    fn default() -> Self {
        Self::new(0)
    }
}

impl BVHTree {
    pub fn new(num_primitives: usize) -> Self {
        Self {
            nodes: Vec::<BVHNode>::with_capacity(2 * num_primitives),
            max_depth: STACK_SIZE,
        }
    }

    /// Caps the tree depth below the default of `STACK_SIZE`.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.clamp(1, STACK_SIZE);
        self
    }

    pub fn build_bvh_tree(&mut self, triangles: &mut [Triangle]) {
        self.nodes.clear();
        // an empty scene has no root; every traversal is a miss
        if triangles.is_empty() {
            return;
        }

        let mut node = BVHNode {
            left_first: 0,
            prim_count: triangles.len() as u32,
            ..Default::default()
        };
        node.update_node_bounds(triangles);
        self.nodes.push(node);

        // push an empty node at index 1 as a placeholder that will never be used
        self.nodes.push(BVHNode::default());

        self.subdivide(0, 1, triangles);
    }

    fn subdivide(&mut self, index: usize, depth: usize, triangles: &mut [Triangle]) {
        if depth >= self.max_depth {
            return;
        }
        let (split_cost, best_axis, plane_val) =
            self.nodes[index].find_best_split_plane(triangles);
        let cost = self.nodes[index].find_node_cost();

        if cost <= split_cost {
            return;
        }

        let mut i = self.nodes[index].left_first as usize;
        let mut j = i + self.nodes[index].prim_count as usize - 1;

        while i <= j {
            if triangles[i].centroid()[best_axis] < plane_val {
                i += 1;
            } else {
                triangles.swap(i, j);
                if j == 0 {
                    break;
                }
                j -= 1;
            }
        }
        let left_count = i as u32 - self.nodes[index].left_first;
        if left_count == 0 || left_count == self.nodes[index].prim_count {
            return;
        }

        let node_idx = self.nodes.len();
        let mut left_node = BVHNode {
            left_first: self.nodes[index].left_first,
            prim_count: left_count,
            ..Default::default()
        };
        left_node.update_node_bounds(triangles);

        let mut right_node = BVHNode {
            left_first: i as u32,
            prim_count: self.nodes[index].prim_count - left_count,
            ..Default::default()
        };
        right_node.update_node_bounds(triangles);

        self.nodes[index].left_first = node_idx as u32;
        self.nodes[index].prim_count = 0;

        self.nodes.push(left_node);
        self.nodes.push(right_node);

        self.subdivide(node_idx, depth + 1, triangles);
        self.subdivide(node_idx + 1, depth + 1, triangles);
    }

    pub fn depth(&self) -> usize {
        fn node_depth(nodes: &[BVHNode], index: usize) -> usize {
            let node = &nodes[index];
            if node.prim_count > 0 {
                1
            } else {
                let left = node.left_first as usize;
                1 + node_depth(nodes, left).max(node_depth(nodes, left + 1))
            }
        }
        if self.nodes.is_empty() { 0 } else { node_depth(&self.nodes, 0) }
    }

    /// Closest hit of `ray` against `triangles`, which must be the slice the tree was built over.
    pub fn intersect(&self, triangles: &[Triangle], ray: &Ray) -> RayHit {
        let mut hit = RayHit::miss();
        if self.nodes.is_empty() {
            return hit;
        }

        let inverse_direction = ray.inverse_direction();
        let mut nearest_hit = ray.maxt;
        if hit_bvh_node(ray, inverse_direction, &self.nodes[0], nearest_hit) == MISS_DISTANCE {
            return hit;
        }

        let mut stack = [0usize; STACK_SIZE];
        let mut stack_pointer = 0usize;
        let mut node_index = 0usize;

        loop {
            let node = &self.nodes[node_index];
            if node.prim_count > 0 {
                // leaf: test its primitives, then resume from the stack
                let first = node.left_first as usize;
                for triangle in &triangles[first..first + node.prim_count as usize] {
                    if let Some(t) = triangle.intersect(ray, nearest_hit) {
                        nearest_hit = t;
                        hit = RayHit { t, index: triangle.prim_id() };
                    }
                }
                if stack_pointer == 0 {
                    break;
                }
                stack_pointer -= 1;
                node_index = stack[stack_pointer];
                continue;
            }

            // inner node: visit the closer child first
            let mut near_idx = node.left_first as usize;
            let mut far_idx = near_idx + 1;
            let mut t_near = hit_bvh_node(ray, inverse_direction, &self.nodes[near_idx], nearest_hit);
            let mut t_far = hit_bvh_node(ray, inverse_direction, &self.nodes[far_idx], nearest_hit);
            if t_near > t_far {
                std::mem::swap(&mut t_near, &mut t_far);
                std::mem::swap(&mut near_idx, &mut far_idx);
            }

            if t_near == MISS_DISTANCE {
                if stack_pointer == 0 {
                    break;
                }
                stack_pointer -= 1;
                node_index = stack[stack_pointer];
            } else {
                node_index = near_idx;
                // the depth cap keeps this bound; same guard as the shader
                if t_far != MISS_DISTANCE && stack_pointer < STACK_SIZE {
                    stack[stack_pointer] = far_idx;
                    stack_pointer += 1;
                }
            }
        }

        hit
    }
}

// slab test; returns the entry distance or MISS_DISTANCE
fn hit_bvh_node(ray: &Ray, inverse_direction: Vec3, node: &BVHNode, t_nearest: f32) -> f32 {
    let t0 = (node.aabb_min - ray.origin) * inverse_direction;
    let t1 = (node.aabb_max - ray.origin) * inverse_direction;
    let tmin = t0.min(t1).max_element();
    let tmax = t0.max(t1).min_element();

    if tmin > tmax || tmax < ray.mint || tmin >= t_nearest {
        MISS_DISTANCE
    } else {
        tmin
    }
}
