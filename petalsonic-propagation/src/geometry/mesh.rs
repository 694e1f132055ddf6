//! Geometry sets: immutable triangle meshes with precomputed adjacency.

use super::AcousticSurface;
use crate::config::GeometryParams;
use crate::id::GeometrySetId;
use crate::math::{Aabb, Vec3};
use std::collections::HashMap;

/// Two triangles whose normals differ by less than this are coplanar.
pub const COPLANAR_TOLERANCE: f32 = 1e-4;

static DEFAULT_SURFACE: AcousticSurface = AcousticSurface::DEFAULT;

/// Three vertex indices and an optional index into the set's surfaces.
///
/// Triangles are double-sided; winding only determines the reported normal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Triangle {
    pub vertices: [u32; 3],
    /// `None` uses [`AcousticSurface::DEFAULT`] (full transmission loss)
    pub surface: Option<u16>,
}

impl Triangle {
    pub fn new(vertices: [u32; 3], surface: Option<u16>) -> Self {
        Self { vertices, surface }
    }
}

/// An edge of the mesh after welding coincident vertices.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshEdge {
    /// Welded vertex indices, smallest first
    pub vertices: [u32; 2],
    /// Triangles using this edge
    pub triangles: Vec<u32>,
    /// Index into [`GeometrySet::diffraction_edges`] if sound can bend around this edge
    pub diffraction_index: Option<u32>,
}

impl MeshEdge {
    pub fn is_boundary(&self) -> bool {
        self.triangles.len() == 1
    }
}

/// Immutable triangle mesh shared by every instance placing it.
#[derive(Debug, Clone)]
pub struct GeometrySet {
    pub id: GeometrySetId,
    vertices: Vec<Vec3>,
    triangles: Vec<Triangle>,
    surfaces: Vec<AcousticSurface>,
    normals: Vec<Vec3>,
    edges: Vec<MeshEdge>,
    triangle_edges: Vec<[u32; 3]>,
    face_groups: Vec<u32>,
    face_group_count: u32,
    group_triangles: Vec<Vec<u32>>,
    diffraction_edges: Vec<u32>,
    edge_neighbours: Vec<Vec<u32>>,
    bounds: Aabb,
}

impl GeometrySet {
    /// Copies `params` into engine-owned storage and precomputes edge adjacency,
    /// diffraction edges and coplanar face groups. `params` must already be validated.
    pub fn build(id: GeometrySetId, params: &GeometryParams) -> Self {
        let vertices = params.vertices.clone();
        let triangles = params.triangles.clone();
        let welded = weld_vertices(&vertices);

        let normals: Vec<Vec3> = triangles
            .iter()
            .map(|t| {
                let [a, b, c] = t.vertices.map(|i| vertices[i as usize]);
                (b - a).cross(c - a).normalize_or_zero()
            })
            .collect();
        let degenerate = normals.iter().filter(|n| **n == Vec3::ZERO).count();
        if degenerate > 0 {
            log::warn!(
                "Geometry set {} has {} degenerate triangles; they are ignored",
                id,
                degenerate
            );
        }

        // Edge adjacency over welded vertices
        let mut edge_lookup: HashMap<[u32; 2], u32> = HashMap::new();
        let mut edges: Vec<MeshEdge> = Vec::new();
        let mut triangle_edges = Vec::with_capacity(triangles.len());
        for (ti, triangle) in triangles.iter().enumerate() {
            let w = triangle.vertices.map(|i| welded[i as usize]);
            let mut sides = [u32::MAX; 3];
            if normals[ti] != Vec3::ZERO {
                for (side, (a, b)) in [(w[0], w[1]), (w[1], w[2]), (w[2], w[0])]
                    .into_iter()
                    .enumerate()
                {
                    let key = if a < b { [a, b] } else { [b, a] };
                    let index = *edge_lookup.entry(key).or_insert_with(|| {
                        edges.push(MeshEdge {
                            vertices: key,
                            triangles: Vec::new(),
                            diffraction_index: None,
                        });
                        (edges.len() - 1) as u32
                    });
                    edges[index as usize].triangles.push(ti as u32);
                    sides[side] = index;
                }
            }
            triangle_edges.push(sides);
        }

        let (face_groups, face_group_count) =
            coplanar_groups(&vertices, &triangles, &normals, &edges);

        let mut group_triangles = vec![Vec::new(); face_group_count as usize];
        for (ti, group) in face_groups.iter().enumerate() {
            if normals[ti] != Vec3::ZERO {
                group_triangles[*group as usize].push(ti as u32);
            }
        }

        let mut diffraction_edges = Vec::new();
        if params.enable_diffraction {
            for (ei, edge) in edges.iter_mut().enumerate() {
                let bends = match edge.triangles.as_slice() {
                    [single] => {
                        params.enable_diffraction_on_boundary_edges
                            && normals[*single as usize] != Vec3::ZERO
                    }
                    [first, second] => {
                        face_groups[*first as usize] != face_groups[*second as usize]
                    }
                    // Non-manifold edges always bend
                    _ => true,
                };
                if bends {
                    edge.diffraction_index = Some(diffraction_edges.len() as u32);
                    diffraction_edges.push(ei as u32);
                }
            }
        }

        // Diffraction edges sharing a welded vertex are neighbours
        let mut by_vertex: HashMap<u32, Vec<u32>> = HashMap::new();
        for (di, ei) in diffraction_edges.iter().enumerate() {
            for v in edges[*ei as usize].vertices {
                by_vertex.entry(v).or_default().push(di as u32);
            }
        }
        let edge_neighbours = diffraction_edges
            .iter()
            .enumerate()
            .map(|(di, ei)| {
                let mut neighbours: Vec<u32> = edges[*ei as usize]
                    .vertices
                    .iter()
                    .flat_map(|v| by_vertex.get(v).into_iter().flatten().copied())
                    .filter(|other| *other as usize != di)
                    .collect();
                neighbours.sort_unstable();
                neighbours.dedup();
                neighbours
            })
            .collect();

        let bounds = Aabb::from_points(&vertices);
        log::debug!(
            "Built geometry set {}: {} vertices, {} triangles, {} edges ({} diffraction), {} face groups",
            id,
            vertices.len(),
            triangles.len(),
            edges.len(),
            diffraction_edges.len(),
            face_group_count
        );

        Self {
            id,
            vertices,
            triangles,
            surfaces: params.surfaces.clone(),
            normals,
            edges,
            triangle_edges,
            face_groups,
            face_group_count,
            group_triangles,
            diffraction_edges,
            edge_neighbours,
            bounds,
        }
    }

    pub fn vertices(&self) -> &[Vec3] {
        &self.vertices
    }

    pub fn triangles(&self) -> &[Triangle] {
        &self.triangles
    }

    pub fn edges(&self) -> &[MeshEdge] {
        &self.edges
    }

    /// Local-space unit normal, zero for degenerate triangles.
    pub fn normal(&self, triangle: u32) -> Vec3 {
        self.normals[triangle as usize]
    }

    pub fn is_degenerate(&self, triangle: u32) -> bool {
        self.normals[triangle as usize] == Vec3::ZERO
    }

    /// Surface of a triangle, falling back to the fully blocking default.
    pub fn surface(&self, triangle: u32) -> &AcousticSurface {
        self.triangles[triangle as usize]
            .surface
            .and_then(|s| self.surfaces.get(s as usize))
            .unwrap_or(&DEFAULT_SURFACE)
    }

    pub fn face_group(&self, triangle: u32) -> u32 {
        self.face_groups[triangle as usize]
    }

    pub fn face_group_count(&self) -> u32 {
        self.face_group_count
    }

    /// Non-degenerate triangles of a coplanar face group.
    pub fn face_group_triangles(&self, group: u32) -> &[u32] {
        &self.group_triangles[group as usize]
    }

    /// Mesh edges of a triangle, or `u32::MAX` for degenerate triangles.
    pub fn triangle_edges(&self, triangle: u32) -> [u32; 3] {
        self.triangle_edges[triangle as usize]
    }

    /// Mesh edge indices sound can diffract around.
    pub fn diffraction_edges(&self) -> &[u32] {
        &self.diffraction_edges
    }

    /// Diffraction edges (by diffraction index) sharing a vertex with `diffraction_index`.
    pub fn edge_neighbours(&self, diffraction_index: u32) -> &[u32] {
        &self.edge_neighbours[diffraction_index as usize]
    }

    /// Diffraction edges bordering a triangle.
    pub fn triangle_diffraction_edges(&self, triangle: u32) -> impl Iterator<Item = u32> + '_ {
        self.triangle_edges[triangle as usize]
            .into_iter()
            .filter(|e| *e != u32::MAX)
            .filter_map(|e| self.edges[e as usize].diffraction_index)
    }

    pub fn local_bounds(&self) -> Aabb {
        self.bounds
    }
}

/// Maps every vertex to the first vertex at exactly the same position.
fn weld_vertices(vertices: &[Vec3]) -> Vec<u32> {
    let mut first_at: HashMap<[u32; 3], u32> = HashMap::with_capacity(vertices.len());
    vertices
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let key = [v.x.to_bits(), v.y.to_bits(), v.z.to_bits()];
            *first_at.entry(key).or_insert(i as u32)
        })
        .collect()
}

/// Connected components of edge-adjacent coplanar triangles.
fn coplanar_groups(
    vertices: &[Vec3],
    triangles: &[Triangle],
    normals: &[Vec3],
    edges: &[MeshEdge],
) -> (Vec<u32>, u32) {
    let mut parent: Vec<u32> = (0..triangles.len() as u32).collect();

    fn find(parent: &mut [u32], mut i: u32) -> u32 {
        while parent[i as usize] != i {
            parent[i as usize] = parent[parent[i as usize] as usize];
            i = parent[i as usize];
        }
        i
    }

    for edge in edges {
        if edge.triangles.len() != 2 {
            continue;
        }
        let (a, b) = (edge.triangles[0], edge.triangles[1]);
        let (na, nb) = (normals[a as usize], normals[b as usize]);
        if na.dot(nb).abs() < 1.0 - COPLANAR_TOLERANCE {
            continue;
        }
        // Parallel normals across a shared edge; check the far vertex lies in the plane
        let origin = vertices[triangles[a as usize].vertices[0] as usize];
        let coplanar = triangles[b as usize]
            .vertices
            .iter()
            .all(|v| (vertices[*v as usize] - origin).dot(na).abs() < 1e-3);
        if coplanar {
            let (ra, rb) = (find(&mut parent, a), find(&mut parent, b));
            if ra != rb {
                parent[rb as usize] = ra;
            }
        }
    }

    let mut remap: HashMap<u32, u32> = HashMap::new();
    let mut groups = Vec::with_capacity(triangles.len());
    for i in 0..triangles.len() as u32 {
        let root = find(&mut parent, i);
        let next = remap.len() as u32;
        groups.push(*remap.entry(root).or_insert(next));
    }
    let count = remap.len() as u32;
    (groups, count)
}
