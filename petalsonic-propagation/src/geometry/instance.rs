//! Positioned placements of geometry sets.

use super::bvh::Bvh;
use super::mesh::GeometrySet;
use super::ray::{HitSurface, ray_triangle_intersection};
use crate::config::GeometryInstanceParams;
use crate::id::SceneEntityId;
use crate::math::{Aabb, Plane, Vec3};
use std::collections::TryReserveError;
use std::sync::Arc;

/// Direction of the parity ray, (1, 2, 3) normalized. Skewed so it rarely grazes edges.
const PARITY_DIRECTION: Vec3 = Vec3::new(0.267_261_24, 0.534_522_5, 0.801_783_7);

/// Points closer than this to a face group's plane count as lying on it.
const ON_SURFACE_TOLERANCE: f32 = 1e-2;

#[derive(Debug)]
enum StorageFailure {
    Allocation(TryReserveError),
    Budget { required: usize, budget: usize },
}

impl std::fmt::Display for StorageFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Allocation(e) => write!(f, "allocation failed: {}", e),
            Self::Budget { required, budget } => write!(
                f,
                "needs {} bytes, budget is {} bytes",
                required, budget
            ),
        }
    }
}

impl From<TryReserveError> for StorageFailure {
    fn from(e: TryReserveError) -> Self {
        Self::Allocation(e)
    }
}

/// World-space data derived from the set and the placement.
#[derive(Debug, Clone, Default)]
struct WorldStorage {
    triangles: Vec<[Vec3; 3]>,
    normals: Vec<Vec3>,
    edges: Vec<[Vec3; 2]>,
    bvh: Bvh,
}

/// A geometry set placed in the scene, with world-space triangles and its own BVH.
///
/// If the world-space storage cannot be allocated the instance is kept but marked
/// degraded: ray queries skip it and containment falls back to its bounding box.
#[derive(Debug, Clone)]
pub struct GeometryInstance {
    pub id: SceneEntityId,
    pub params: GeometryInstanceParams,
    set: Arc<GeometrySet>,
    storage: WorldStorage,
    bounds: Aabb,
    degraded: bool,
}

impl GeometryInstance {
    pub fn build(
        id: SceneEntityId,
        params: GeometryInstanceParams,
        set: Arc<GeometrySet>,
        memory_budget: Option<usize>,
    ) -> Self {
        let corners: Vec<Vec3> = set
            .vertices()
            .iter()
            .map(|v| params.transform.transform_point(*v, params.scale))
            .collect();
        let bounds = Aabb::from_points(&corners);

        let (storage, degraded) = match build_storage(&set, &corners, memory_budget) {
            Ok(storage) => (storage, false),
            Err(failure) => {
                log::error!(
                    "Geometry instance {} degraded ({}); it no longer takes part in geometric propagation",
                    id,
                    failure
                );
                (WorldStorage::default(), true)
            }
        };

        Self {
            id,
            params,
            set,
            storage,
            bounds,
            degraded,
        }
    }

    pub fn set(&self) -> &Arc<GeometrySet> {
        &self.set
    }

    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn is_solid(&self) -> bool {
        self.params.solid
    }

    pub fn is_reflective(&self) -> bool {
        self.params.use_for_reflection_and_diffraction
    }

    pub fn triangle_count(&self) -> usize {
        self.storage.triangles.len()
    }

    pub fn triangle(&self, index: u32) -> [Vec3; 3] {
        self.storage.triangles[index as usize]
    }

    /// World-space unit normal as given by the triangle's winding.
    pub fn normal(&self, index: u32) -> Vec3 {
        self.storage.normals[index as usize]
    }

    pub fn hit_surface(&self, triangle: u32) -> HitSurface {
        let surface = self.set.surface(triangle);
        HitSurface {
            instance: self.id,
            triangle,
            face_group: self.set.face_group(triangle),
            transmission_loss: surface.transmission_loss,
            texture: surface.texture,
            solid: self.params.solid,
            reflective: self.params.use_for_reflection_and_diffraction,
        }
    }

    /// Nearest triangle along a ray, as `(distance, triangle)`.
    pub fn intersect(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> Option<(f32, u32)> {
        let mut best: Option<(f32, u32)> = None;
        self.storage
            .bvh
            .traverse(origin, direction, max_distance, |triangle| {
                let limit = best.map_or(max_distance, |(t, _)| t);
                let t = ray_triangle_intersection(
                    origin,
                    direction,
                    self.storage.triangles[triangle as usize],
                    limit,
                )?;
                best = Some((t, triangle));
                Some(t)
            });
        best
    }

    /// Calls `visit(distance, triangle)` for every triangle the ray crosses, in no particular order.
    pub fn for_each_hit<F>(&self, origin: Vec3, direction: Vec3, max_distance: f32, mut visit: F)
    where
        F: FnMut(f32, u32),
    {
        self.storage
            .bvh
            .traverse(origin, direction, max_distance, |triangle| {
                if let Some(t) = ray_triangle_intersection(
                    origin,
                    direction,
                    self.storage.triangles[triangle as usize],
                    max_distance,
                ) {
                    visit(t, triangle);
                }
                None
            });
    }

    /// Parity test: a point is inside when a ray from it crosses the mesh an odd number of times.
    ///
    /// Degraded instances fall back to their bounding box.
    pub fn contains_point(&self, point: Vec3) -> bool {
        if !self.bounds.contains(point) {
            return false;
        }
        if self.degraded {
            return true;
        }
        let direction = PARITY_DIRECTION;
        let reach = self.bounds.extent().length() * 2.0 + 1.0;
        let mut crossings: Vec<f32> = Vec::new();
        self.for_each_hit(point, direction, reach, |t, _| crossings.push(t));
        // Shared edges report the same crossing twice
        crossings.sort_unstable_by(f32::total_cmp);
        crossings.dedup_by(|a, b| (*a - *b).abs() < 1e-5);
        crossings.len() % 2 == 1
    }

    /// Number of world-space diffraction edges.
    pub fn edge_count(&self) -> usize {
        self.storage.edges.len()
    }

    pub fn edge(&self, diffraction_index: u32) -> [Vec3; 2] {
        self.storage.edges[diffraction_index as usize]
    }

    pub fn edge_neighbours(&self, diffraction_index: u32) -> &[u32] {
        if self.degraded {
            return &[];
        }
        self.set.edge_neighbours(diffraction_index)
    }

    /// Diffraction edges bordering the faces on either side of edge `diffraction_index`,
    /// excluding the edge itself. These are the edges a path can reach by crossing one face.
    pub fn edges_across_faces(&self, diffraction_index: u32) -> Vec<u32> {
        if self.degraded {
            return Vec::new();
        }
        let set = &self.set;
        let Some(&mesh_edge) = set.diffraction_edges().get(diffraction_index as usize) else {
            return Vec::new();
        };
        let mut groups: Vec<u32> = set.edges()[mesh_edge as usize]
            .triangles
            .iter()
            .map(|t| set.face_group(*t))
            .collect();
        groups.sort_unstable();
        groups.dedup();

        let mut across: Vec<u32> = Vec::new();
        for group in groups {
            for &triangle in set.face_group_triangles(group) {
                across.extend(
                    set.triangle_diffraction_edges(triangle)
                        .filter(|e| *e != diffraction_index),
                );
            }
        }
        across.sort_unstable();
        across.dedup();
        across
    }

    /// Diffraction edges bordering `triangle`.
    pub fn triangle_edges(&self, triangle: u32) -> impl Iterator<Item = u32> + '_ {
        let degraded = self.degraded;
        self.set
            .triangle_diffraction_edges(triangle)
            .filter(move |_| !degraded)
    }

    /// Plane of a coplanar face group.
    pub fn face_group_plane(&self, group: u32) -> Option<Plane> {
        let first = *self.set.face_group_triangles(group).first()?;
        if self.degraded {
            return None;
        }
        Some(Plane::from_point_normal(
            self.storage.triangles[first as usize][0],
            self.storage.normals[first as usize],
        ))
    }

    /// Whether `point` lies on one of the face group's triangles.
    pub fn face_group_contains(&self, group: u32, point: Vec3) -> bool {
        if self.degraded {
            return false;
        }
        self.set.face_group_triangles(group).iter().any(|t| {
            point_on_triangle(
                point,
                self.storage.triangles[*t as usize],
                self.storage.normals[*t as usize],
            )
        })
    }

    /// Approximate heap usage of the world-space storage.
    pub fn storage_bytes(&self) -> usize {
        estimate_bytes(self.storage.triangles.len(), self.storage.edges.len())
    }
}

fn estimate_bytes(triangles: usize, edges: usize) -> usize {
    triangles * (std::mem::size_of::<[Vec3; 3]>() + std::mem::size_of::<Vec3>())
        + edges * std::mem::size_of::<[Vec3; 2]>()
        // BVH: up to two nodes and one index per triangle
        + triangles * (2 * (std::mem::size_of::<Aabb>() + 8) + 4)
}

fn build_storage(
    set: &GeometrySet,
    world_vertices: &[Vec3],
    memory_budget: Option<usize>,
) -> Result<WorldStorage, StorageFailure> {
    let triangle_count = set.triangles().len();
    let edge_count = set.diffraction_edges().len();
    if let Some(budget) = memory_budget {
        let required = estimate_bytes(triangle_count, edge_count);
        if required > budget {
            return Err(StorageFailure::Budget { required, budget });
        }
    }

    let mut triangles = Vec::new();
    triangles.try_reserve_exact(triangle_count)?;
    let mut normals = Vec::new();
    normals.try_reserve_exact(triangle_count)?;
    let mut boxes = Vec::new();
    boxes.try_reserve_exact(triangle_count)?;
    for (i, triangle) in set.triangles().iter().enumerate() {
        let corners = triangle.vertices.map(|v| world_vertices[v as usize]);
        let normal = if set.is_degenerate(i as u32) {
            Vec3::ZERO
        } else {
            (corners[1] - corners[0])
                .cross(corners[2] - corners[0])
                .normalize_or_zero()
        };
        triangles.push(corners);
        normals.push(normal);
        boxes.push(if normal == Vec3::ZERO {
            // Degenerate triangles never hit; keep them out of the tree's bounds
            Aabb::EMPTY
        } else {
            Aabb::from_points(&corners)
        });
    }

    let mut edges = Vec::new();
    edges.try_reserve_exact(edge_count)?;
    for mesh_edge in set.diffraction_edges() {
        let welded = set.edges()[*mesh_edge as usize].vertices;
        edges.push(welded.map(|v| world_vertices[v as usize]));
    }

    let bvh = Bvh::build(&boxes)?;
    Ok(WorldStorage {
        triangles,
        normals,
        edges,
        bvh,
    })
}

fn point_on_triangle(point: Vec3, [a, b, c]: [Vec3; 3], normal: Vec3) -> bool {
    if normal == Vec3::ZERO || (point - a).dot(normal).abs() > ON_SURFACE_TOLERANCE {
        return false;
    }
    // Barycentric coordinates with a small tolerance at the borders
    let v0 = b - a;
    let v1 = c - a;
    let v2 = point - a;
    let d00 = v0.dot(v0);
    let d01 = v0.dot(v1);
    let d11 = v1.dot(v1);
    let d20 = v2.dot(v0);
    let d21 = v2.dot(v1);
    let denom = d00 * d11 - d01 * d01;
    if denom.abs() <= f32::EPSILON {
        return false;
    }
    let v = (d11 * d20 - d01 * d21) / denom;
    let w = (d00 * d21 - d01 * d20) / denom;
    let u = 1.0 - v - w;
    const TOLERANCE: f32 = -1e-4;
    u >= TOLERANCE && v >= TOLERANCE && w >= TOLERANCE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::AcousticSurface;
    use crate::geometry::mesh::tests::{box_params, quad_params};
    use crate::id::GeometrySetId;
    use crate::math::Transform;

    fn unit_box_instance(budget: Option<usize>) -> GeometryInstance {
        let set = Arc::new(GeometrySet::build(
            GeometrySetId(1),
            &box_params(Vec3::splat(-1.0), Vec3::splat(1.0), AcousticSurface::GLASS),
        ));
        let params = GeometryInstanceParams::new(GeometrySetId(1))
            .with_transform(Transform::from_position(Vec3::new(10.0, 0.0, 0.0)))
            .with_scale(Vec3::splat(2.0))
            .solid(true);
        GeometryInstance::build(SceneEntityId(5), params, set, budget)
    }

    #[test]
    fn test_world_placement() {
        let instance = unit_box_instance(None);
        assert!(!instance.is_degraded());
        assert!(instance.bounds().min.abs_diff_eq(Vec3::new(8.0, -2.0, -2.0), 1e-5));
        assert!(instance.bounds().max.abs_diff_eq(Vec3::new(12.0, 2.0, 2.0), 1e-5));
        assert_eq!(instance.edge_count(), 12);
    }

    #[test]
    fn test_nearest_and_all_hits() {
        let instance = unit_box_instance(None);
        let (t, triangle) = instance.intersect(Vec3::ZERO, Vec3::X, 100.0).unwrap();
        assert!((t - 8.0).abs() < 1e-4);
        let surface = instance.hit_surface(triangle);
        assert_eq!(surface.transmission_loss, AcousticSurface::GLASS.transmission_loss);
        assert!(surface.solid);

        let mut distances = Vec::new();
        instance.for_each_hit(Vec3::new(0.0, 0.1, 0.2), Vec3::X, 100.0, |t, _| {
            distances.push(t)
        });
        distances.sort_unstable_by(f32::total_cmp);
        assert_eq!(distances.len(), 2);
        assert!((distances[1] - 12.0).abs() < 1e-4);
    }

    #[test]
    fn test_contains_point() {
        let instance = unit_box_instance(None);
        assert!(instance.contains_point(Vec3::new(10.0, 0.0, 0.0)));
        assert!(instance.contains_point(Vec3::new(11.5, 1.5, -1.5)));
        assert!(!instance.contains_point(Vec3::new(13.0, 0.0, 0.0)));
        assert!(!instance.contains_point(Vec3::ZERO));
    }

    #[test]
    fn test_edges_across_faces() {
        let instance = unit_box_instance(None);
        for edge in 0..instance.edge_count() as u32 {
            let across = instance.edges_across_faces(edge);
            // Two square faces with four edges each, sharing this one
            assert_eq!(across.len(), 6);
            assert!(!across.contains(&edge));
        }
    }

    #[test]
    fn test_budget_degrades() {
        let instance = unit_box_instance(Some(16));
        assert!(instance.is_degraded());
        assert!(instance.intersect(Vec3::ZERO, Vec3::X, 100.0).is_none());
        assert_eq!(instance.edge_count(), 0);
        // Containment falls back to bounds
        assert!(instance.contains_point(Vec3::new(10.0, 0.0, 0.0)));
    }

    #[test]
    fn test_face_group_queries() {
        let set = Arc::new(GeometrySet::build(GeometrySetId(2), &quad_params(1.0, 1.0)));
        let params = GeometryInstanceParams::new(GeometrySetId(2))
            .with_transform(Transform::from_position(Vec3::new(0.0, 0.0, 3.0)));
        let instance = GeometryInstance::build(SceneEntityId(9), params, set, None);

        let plane = instance.face_group_plane(0).unwrap();
        assert!(plane.signed_distance(Vec3::new(0.0, 0.0, 3.0)).abs() < 1e-5);
        assert!(instance.face_group_contains(0, Vec3::new(0.5, -0.5, 3.0)));
        assert!(!instance.face_group_contains(0, Vec3::new(1.5, 0.0, 3.0)));
        assert!(!instance.face_group_contains(0, Vec3::new(0.0, 0.0, 4.0)));
    }
}
