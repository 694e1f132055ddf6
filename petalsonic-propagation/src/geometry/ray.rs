//! Ray queries against scene geometry.
//!
//! [`RayTracer`] is the seam between the propagation search and whatever answers ray
//! queries. The built-in [`GeometryStore`](super::GeometryStore) implements it over its
//! BVHs, and the scene snapshot wraps that to carve portal openings out of walls.

use crate::id::{AcousticTextureId, SceneEntityId};
use crate::math::{SURFACE_EPSILON, Vec3};

/// Upper bound on surfaces collected along one segment.
pub const MAX_SEGMENT_HITS: usize = 64;

/// Identifies a planar reflector: a coplanar face group of one geometry instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceKey {
    pub instance: SceneEntityId,
    pub face_group: u32,
}

/// What a ray hit, beyond where.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitSurface {
    pub instance: SceneEntityId,
    pub triangle: u32,
    pub face_group: u32,
    /// Fraction of sound blocked when passing through (0.0 - 1.0)
    pub transmission_loss: f32,
    pub texture: AcousticTextureId,
    /// Hit belongs to a closed mesh; entry and exit pair up
    pub solid: bool,
    /// Instance takes part in reflection and diffraction
    pub reflective: bool,
}

impl HitSurface {
    pub fn key(&self) -> SurfaceKey {
        SurfaceKey {
            instance: self.instance,
            face_group: self.face_group,
        }
    }
}

impl Default for HitSurface {
    fn default() -> Self {
        Self {
            instance: SceneEntityId::OUTDOORS,
            triangle: 0,
            face_group: 0,
            transmission_loss: 0.0,
            texture: AcousticTextureId::default(),
            solid: false,
            reflective: false,
        }
    }
}

/// Result of a ray intersection test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    /// Whether the ray hit any geometry
    pub hit: bool,

    /// Distance from ray origin to hit point (in meters)
    ///
    /// Only meaningful if `hit` is true
    pub distance: f32,

    /// World-space hit point
    pub point: Vec3,

    /// Unit surface normal, flipped to face the incoming ray
    pub normal: Vec3,

    /// The surface that was hit
    pub surface: HitSurface,
}

impl RayHit {
    /// Creates a miss result (no hit)
    pub fn miss() -> Self {
        Self {
            hit: false,
            distance: 0.0,
            point: Vec3::ZERO,
            normal: Vec3::ZERO,
            surface: HitSurface::default(),
        }
    }

    /// Creates a hit result
    pub fn new(distance: f32, point: Vec3, normal: Vec3, surface: HitSurface) -> Self {
        Self {
            hit: true,
            distance,
            point,
            normal,
            surface,
        }
    }
}

impl Default for RayHit {
    fn default() -> Self {
        Self::miss()
    }
}

/// Answers the ray queries the ray caster and path search need.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`: listener scans and emitter searches run on
/// job workers in parallel against the same tracer.
pub trait RayTracer: Send + Sync {
    /// Nearest surface along a ray.
    ///
    /// * `origin` - Ray starting position in world space (meters)
    /// * `direction` - Ray direction (normalized)
    /// * `max_distance` - Maximum ray distance to test (meters)
    fn cast_ray(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> RayHit;

    /// Every surface crossed by the segment `from → to`, sorted by distance from `from`.
    ///
    /// The default implementation marches with [`cast_ray`](Self::cast_ray), restarting just
    /// past each hit.
    fn segment_hits(&self, from: Vec3, to: Vec3, hits: &mut Vec<RayHit>) {
        let length = from.distance(to);
        if length <= SURFACE_EPSILON {
            return;
        }
        let direction = (to - from) / length;
        let mut travelled = 0.0;
        while hits.len() < MAX_SEGMENT_HITS {
            let origin = from + direction * travelled;
            let hit = self.cast_ray(origin, direction, length - travelled);
            if !hit.hit {
                break;
            }
            travelled += hit.distance;
            hits.push(RayHit {
                distance: travelled,
                ..hit
            });
            travelled += SURFACE_EPSILON;
        }
    }

    /// Whether any surface lies strictly between `from` and `to`.
    fn is_occluded(&self, from: Vec3, to: Vec3) -> bool {
        let length = from.distance(to);
        if length <= 2.0 * SURFACE_EPSILON {
            return false;
        }
        let direction = (to - from) / length;
        self.cast_ray(
            from + direction * SURFACE_EPSILON,
            direction,
            length - 2.0 * SURFACE_EPSILON,
        )
        .hit
    }
}

/// Möller–Trumbore ray/triangle intersection, double-sided.
///
/// Returns the distance along the ray if the hit lies within `(0, max_distance)`.
pub fn ray_triangle_intersection(
    origin: Vec3,
    direction: Vec3,
    [v0, v1, v2]: [Vec3; 3],
    max_distance: f32,
) -> Option<f32> {
    const EPSILON: f32 = 1e-7;

    let edge1 = v1 - v0;
    let edge2 = v2 - v0;
    let h = direction.cross(edge2);
    let a = edge1.dot(h);
    // Parallel to the triangle
    if a.abs() < EPSILON {
        return None;
    }

    let f = 1.0 / a;
    let s = origin - v0;
    let u = f * s.dot(h);
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(edge1);
    let v = f * direction.dot(q);
    if v < 0.0 || u + v > 1.0 {
        return None;
    }

    let t = f * edge2.dot(q);
    if t > EPSILON && t < max_distance {
        Some(t)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ray_hit_miss() {
        let miss = RayHit::miss();
        assert!(!miss.hit);
        assert_eq!(miss.distance, 0.0);
    }

    #[test]
    fn test_triangle_intersection_double_sided() {
        let tri = [
            Vec3::new(-1.0, -1.0, 5.0),
            Vec3::new(1.0, -1.0, 5.0),
            Vec3::new(0.0, 1.0, 5.0),
        ];
        let t = ray_triangle_intersection(Vec3::ZERO, Vec3::Z, tri, 100.0);
        assert!((t.unwrap() - 5.0).abs() < 1e-5);

        let back = ray_triangle_intersection(Vec3::new(0.0, 0.0, 10.0), -Vec3::Z, tri, 100.0);
        assert!((back.unwrap() - 5.0).abs() < 1e-5);

        assert!(ray_triangle_intersection(Vec3::ZERO, Vec3::Z, tri, 4.0).is_none());
        assert!(ray_triangle_intersection(Vec3::ZERO, Vec3::X, tri, 100.0).is_none());
    }

    /// Infinite walls at x = 2, 4, 6.
    struct WallTracer;

    impl RayTracer for WallTracer {
        fn cast_ray(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> RayHit {
            if direction.x.abs() < 1e-6 {
                return RayHit::miss();
            }
            [2.0f32, 4.0, 6.0]
                .iter()
                .map(|x| (x - origin.x) / direction.x)
                .filter(|t| *t > 1e-6 && *t < max_distance)
                .fold(None, |best: Option<f32>, t| Some(best.map_or(t, |b| b.min(t))))
                .map(|t| {
                    RayHit::new(
                        t,
                        origin + direction * t,
                        -direction.x.signum() * Vec3::X,
                        HitSurface {
                            transmission_loss: 0.5,
                            ..Default::default()
                        },
                    )
                })
                .unwrap_or_else(RayHit::miss)
        }
    }

    #[test]
    fn test_default_segment_hits_marches() {
        let mut hits = Vec::new();
        WallTracer.segment_hits(Vec3::ZERO, Vec3::new(5.0, 0.0, 0.0), &mut hits);
        assert_eq!(hits.len(), 2);
        assert!((hits[0].distance - 2.0).abs() < 1e-4);
        assert!((hits[1].distance - 4.0).abs() < 1e-4);
    }

    #[test]
    fn test_default_occlusion() {
        assert!(WallTracer.is_occluded(Vec3::ZERO, Vec3::new(3.0, 0.0, 0.0)));
        assert!(!WallTracer.is_occluded(Vec3::ZERO, Vec3::new(1.5, 0.0, 0.0)));
        assert!(!WallTracer.is_occluded(Vec3::ZERO, Vec3::new(0.0, 9.0, 0.0)));
    }
}
