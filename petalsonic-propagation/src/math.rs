//! Math types for PetalSonic propagation

pub use glam::{Mat3, Quat, Vec3};

use crate::error::{PropagationError, Result};

/// Tolerance used when checking that orientation vectors are unit length and orthogonal.
pub const ORIENTATION_TOLERANCE: f32 = 1e-3;

/// Distance used to push ray origins off the surface they start on.
pub const SURFACE_EPSILON: f32 = 1e-3;

/// Position and orientation of an object in the scene.
///
/// Orientation is given as a front and an up vector, both unit length and mutually
/// orthogonal. The right vector is derived as `up × front`, so local X is right,
/// local Y is up and local Z is front.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub front: Vec3,
    pub up: Vec3,
}

impl Transform {
    pub fn new(position: Vec3, front: Vec3, up: Vec3) -> Self {
        Self {
            position,
            front,
            up,
        }
    }

    pub fn identity() -> Self {
        Self {
            position: Vec3::ZERO,
            front: Vec3::Z,
            up: Vec3::Y,
        }
    }

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::identity()
        }
    }

    pub fn right(&self) -> Vec3 {
        self.up.cross(self.front)
    }

    /// Rotation matrix mapping local axes (right, up, front) to world space.
    pub fn rotation_matrix(&self) -> Mat3 {
        Mat3::from_cols(self.right(), self.up, self.front)
    }

    pub fn rotation(&self) -> Quat {
        Quat::from_mat3(&self.rotation_matrix())
    }

    /// Maps a local-space point into world space, applying `scale` first.
    pub fn transform_point(&self, local: Vec3, scale: Vec3) -> Vec3 {
        self.position + self.rotation_matrix() * (local * scale)
    }

    /// Maps a world-space point into this transform's local frame (no scale).
    pub fn inverse_transform_point(&self, world: Vec3) -> Vec3 {
        let d = world - self.position;
        Vec3::new(d.dot(self.right()), d.dot(self.up), d.dot(self.front))
    }

    pub fn distance(&self, other: &Self) -> f32 {
        self.position.distance(other.position)
    }

    /// Rejects non-finite positions and orientation vectors that are not an orthonormal pair.
    pub fn validate(&self) -> Result<()> {
        if !self.position.is_finite() || !self.front.is_finite() || !self.up.is_finite() {
            return Err(PropagationError::InvalidParameter(
                "transform contains non-finite values".into(),
            ));
        }
        if (self.front.length() - 1.0).abs() > ORIENTATION_TOLERANCE
            || (self.up.length() - 1.0).abs() > ORIENTATION_TOLERANCE
        {
            return Err(PropagationError::InvalidParameter(format!(
                "orientation vectors must be unit length (front: {}, up: {})",
                self.front.length(),
                self.up.length()
            )));
        }
        if self.front.dot(self.up).abs() > ORIENTATION_TOLERANCE {
            return Err(PropagationError::InvalidParameter(format!(
                "front and up vectors must be orthogonal (dot: {})",
                self.front.dot(self.up)
            )));
        }
        Ok(())
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// An inverted box that any `grow` call will replace.
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn from_points(points: &[Vec3]) -> Self {
        let mut aabb = Self::EMPTY;
        for p in points {
            aabb.grow(*p);
        }
        aabb
    }

    pub fn grow(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    pub fn union(&self, other: &Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn extent(&self) -> Vec3 {
        (self.max - self.min).max(Vec3::ZERO)
    }

    pub fn volume(&self) -> f32 {
        let e = self.extent();
        e.x * e.y * e.z
    }

    pub fn surface_area(&self) -> f32 {
        let e = self.extent();
        2.0 * (e.x * e.y + e.y * e.z + e.z * e.x)
    }

    pub fn contains(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    pub fn expanded(&self, margin: f32) -> Self {
        Self {
            min: self.min - Vec3::splat(margin),
            max: self.max + Vec3::splat(margin),
        }
    }

    /// Slab test. Returns the entry distance along the ray if it hits within `max_distance`.
    pub fn intersect_ray(&self, origin: Vec3, inv_direction: Vec3, max_distance: f32) -> Option<f32> {
        let t1 = (self.min - origin) * inv_direction;
        let t2 = (self.max - origin) * inv_direction;
        let t_near = t1.min(t2).max_element().max(0.0);
        let t_far = t1.max(t2).min_element().min(max_distance);
        if t_near <= t_far { Some(t_near) } else { None }
    }
}

/// Plane in Hessian normal form: `normal · p = distance`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub distance: f32,
}

impl Plane {
    pub fn from_point_normal(point: Vec3, normal: Vec3) -> Self {
        let normal = normal.normalize_or_zero();
        Self {
            normal,
            distance: normal.dot(point),
        }
    }

    pub fn signed_distance(&self, p: Vec3) -> f32 {
        self.normal.dot(p) - self.distance
    }

    /// Mirror image of `p` across the plane.
    pub fn mirror(&self, p: Vec3) -> Vec3 {
        p - 2.0 * self.signed_distance(p) * self.normal
    }

    /// Intersection of segment `a → b` with the plane, as a parameter in [0, 1].
    pub fn intersect_segment(&self, a: Vec3, b: Vec3) -> Option<f32> {
        let da = self.signed_distance(a);
        let db = self.signed_distance(b);
        if da * db > 0.0 || (da - db).abs() < f32::EPSILON {
            return None;
        }
        Some(da / (da - db))
    }
}

/// Angle in radians by which a path bends at `node` when going `from → node → to`.
///
/// Zero means the three points are collinear and the path goes straight through.
pub fn deviation_angle(from: Vec3, node: Vec3, to: Vec3) -> f32 {
    let incoming = (node - from).normalize_or_zero();
    let outgoing = (to - node).normalize_or_zero();
    if incoming == Vec3::ZERO || outgoing == Vec3::ZERO {
        return 0.0;
    }
    incoming.dot(outgoing).clamp(-1.0, 1.0).acos()
}

/// Closest point to `p` on segment `a → b`, and its parameter.
pub fn closest_point_on_segment(p: Vec3, a: Vec3, b: Vec3) -> (Vec3, f32) {
    let ab = b - a;
    let len2 = ab.length_squared();
    if len2 <= f32::EPSILON {
        return (a, 0.0);
    }
    let t = ((p - a).dot(ab) / len2).clamp(0.0, 1.0);
    (a + ab * t, t)
}

/// Length of the polyline through `points`.
pub fn polyline_length(points: &[Vec3]) -> f32 {
    points.windows(2).map(|w| w[0].distance(w[1])).sum()
}

/// Hermite smoothstep on [edge0, edge1].
pub fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    if edge1 <= edge0 {
        return if x < edge0 { 0.0 } else { 1.0 };
    }
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}
