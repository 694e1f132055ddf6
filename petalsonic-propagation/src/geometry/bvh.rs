//! Flattened bounding-volume hierarchy.
//!
//! Used twice: once per geometry instance over its world-space triangles, and once for the
//! whole scene over instance bounds. Rebuilding the scene level only touches one box per
//! instance, so adding, moving or removing an instance never rebuilds other instances' trees.

use crate::math::{Aabb, Vec3};
use std::collections::TryReserveError;

const LEAF_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq)]
struct BvhNode {
    bounds: Aabb,
    /// First primitive slot for leaves, left child index for interior nodes
    start: u32,
    /// Primitive count; zero marks an interior node
    count: u32,
}

#[derive(Debug, Clone, Default)]
pub struct Bvh {
    nodes: Vec<BvhNode>,
    primitives: Vec<u32>,
}

impl Bvh {
    /// Builds a tree over primitives given by their bounds.
    ///
    /// Storage is reserved up front with `try_reserve`, so an allocation failure is reported
    /// instead of aborting.
    pub fn build(bounds: &[Aabb]) -> Result<Self, TryReserveError> {
        let mut nodes = Vec::new();
        let mut primitives = Vec::new();
        if bounds.is_empty() {
            return Ok(Self { nodes, primitives });
        }
        nodes.try_reserve_exact(2 * bounds.len())?;
        primitives.try_reserve_exact(bounds.len())?;
        primitives.extend(0..bounds.len() as u32);

        let centroids: Vec<Vec3> = bounds.iter().map(Aabb::center).collect();
        nodes.push(BvhNode {
            bounds: Aabb::EMPTY,
            start: 0,
            count: bounds.len() as u32,
        });

        let mut stack = vec![0usize];
        while let Some(node_index) = stack.pop() {
            let BvhNode { start, count, .. } = nodes[node_index];
            let range = start as usize..(start + count) as usize;

            let mut node_bounds = Aabb::EMPTY;
            let mut centroid_bounds = Aabb::EMPTY;
            for p in &primitives[range.clone()] {
                node_bounds = node_bounds.union(&bounds[*p as usize]);
                centroid_bounds.grow(centroids[*p as usize]);
            }
            nodes[node_index].bounds = node_bounds;

            if range.len() <= LEAF_SIZE {
                continue;
            }

            // Median split along the longest centroid axis
            let extent = centroid_bounds.extent();
            let axis = if extent.x >= extent.y && extent.x >= extent.z {
                0
            } else if extent.y >= extent.z {
                1
            } else {
                2
            };
            if extent[axis] <= f32::EPSILON {
                continue;
            }
            let slice = &mut primitives[range.clone()];
            let mid = slice.len() / 2;
            slice.select_nth_unstable_by(mid, |a, b| {
                centroids[*a as usize][axis].total_cmp(&centroids[*b as usize][axis])
            });

            let left = nodes.len();
            nodes.push(BvhNode {
                bounds: Aabb::EMPTY,
                start,
                count: mid as u32,
            });
            nodes.push(BvhNode {
                bounds: Aabb::EMPTY,
                start: start + mid as u32,
                count: count - mid as u32,
            });
            nodes[node_index].start = left as u32;
            nodes[node_index].count = 0;
            stack.push(left);
            stack.push(left + 1);
        }

        Ok(Self { nodes, primitives })
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn bounds(&self) -> Aabb {
        self.nodes.first().map(|n| n.bounds).unwrap_or(Aabb::EMPTY)
    }

    /// Visits every primitive whose box the ray `origin + t·direction` enters before `max_distance`.
    ///
    /// `visit` returns a new, shorter maximum distance when it accepts a hit, which prunes the
    /// rest of the traversal for nearest-hit queries.
    pub fn traverse<F>(&self, origin: Vec3, direction: Vec3, mut max_distance: f32, mut visit: F)
    where
        F: FnMut(u32) -> Option<f32>,
    {
        if self.nodes.is_empty() {
            return;
        }
        let inv_direction = safe_recip(direction);
        let mut stack: Vec<u32> = Vec::with_capacity(64);
        stack.push(0);
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index as usize];
            if node
                .bounds
                .intersect_ray(origin, inv_direction, max_distance)
                .is_none()
            {
                continue;
            }
            if node.count > 0 {
                let range = node.start as usize..(node.start + node.count) as usize;
                for p in &self.primitives[range] {
                    if let Some(t) = visit(*p) {
                        max_distance = max_distance.min(t);
                    }
                }
            } else {
                stack.push(node.start);
                stack.push(node.start + 1);
            }
        }
    }

    /// Visits every primitive whose box contains `point`.
    pub fn query_point<F>(&self, point: Vec3, mut visit: F)
    where
        F: FnMut(u32),
    {
        if self.nodes.is_empty() {
            return;
        }
        let mut stack: Vec<u32> = vec![0];
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index as usize];
            if !node.bounds.contains(point) {
                continue;
            }
            if node.count > 0 {
                let range = node.start as usize..(node.start + node.count) as usize;
                self.primitives[range].iter().for_each(|p| visit(*p));
            } else {
                stack.push(node.start);
                stack.push(node.start + 1);
            }
        }
    }
}

/// Component-wise reciprocal that maps near-zero components to infinity.
pub fn safe_recip(direction: Vec3) -> Vec3 {
    let r = |c: f32| {
        if c.abs() < f32::EPSILON {
            f32::INFINITY.copysign(c)
        } else {
            1.0 / c
        }
    };
    Vec3::new(r(direction.x), r(direction.y), r(direction.z))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_boxes_along_x(n: usize) -> Vec<Aabb> {
        (0..n)
            .map(|i| {
                let min = Vec3::new(i as f32 * 2.0, 0.0, 0.0);
                Aabb::new(min, min + Vec3::ONE)
            })
            .collect()
    }

    #[test]
    fn test_empty_build() {
        let bvh = Bvh::build(&[]).unwrap();
        assert!(bvh.is_empty());
        let mut visited = 0;
        bvh.traverse(Vec3::ZERO, Vec3::X, 10.0, |_| {
            visited += 1;
            None
        });
        assert_eq!(visited, 0);
    }

    #[test]
    fn test_traverse_visits_only_crossed_boxes() {
        let boxes = unit_boxes_along_x(32);
        let bvh = Bvh::build(&boxes).unwrap();
        assert_eq!(bvh.bounds().min, Vec3::ZERO);

        // Ray along the row at y = z = 0.5 crosses the first five boxes within 9 m.
        // Leaves are visited whole, so neighbours in the same leaf show up too.
        let mut visited = Vec::new();
        bvh.traverse(Vec3::new(-0.5, 0.5, 0.5), Vec3::X, 9.0, |p| {
            visited.push(p);
            None
        });
        visited.sort_unstable();
        for p in 0..5 {
            assert!(visited.contains(&p));
        }
        assert!(visited.iter().all(|p| *p < 8));

        // Ray above the row crosses nothing
        let mut count = 0;
        bvh.traverse(Vec3::new(-0.5, 5.0, 0.5), Vec3::X, 100.0, |_| {
            count += 1;
            None
        });
        assert_eq!(count, 0);
    }

    #[test]
    fn test_nearest_hit_prunes() {
        let boxes = unit_boxes_along_x(64);
        let bvh = Bvh::build(&boxes).unwrap();
        let mut nearest = f32::INFINITY;
        bvh.traverse(Vec3::new(-1.0, 0.5, 0.5), Vec3::X, 1000.0, |p| {
            let t = boxes[p as usize].min.x + 1.0;
            if t < nearest {
                nearest = t;
                Some(t)
            } else {
                None
            }
        });
        assert_eq!(nearest, 1.0);
    }

    #[test]
    fn test_query_point() {
        let boxes = unit_boxes_along_x(10);
        let bvh = Bvh::build(&boxes).unwrap();
        let mut hits = Vec::new();
        bvh.query_point(Vec3::new(4.5, 0.5, 0.5), |p| hits.push(p));
        assert_eq!(hits, vec![2]);
    }
}
