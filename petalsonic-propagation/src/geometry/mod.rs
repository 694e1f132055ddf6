//! Scene geometry: triangle meshes, their placements and ray queries.

mod bvh;
mod instance;
mod mesh;
mod ray;
mod store;
mod surface;

pub use bvh::{Bvh, safe_recip};
pub use instance::GeometryInstance;
pub use mesh::{COPLANAR_TOLERANCE, GeometrySet, MeshEdge, Triangle};
pub use ray::{
    HitSurface, MAX_SEGMENT_HITS, RayHit, RayTracer, SurfaceKey, ray_triangle_intersection,
};
pub use store::GeometryStore;
pub use surface::AcousticSurface;

#[cfg(test)]
pub(crate) use mesh::tests::{box_params, quad_params};
