//! Scoring of candidate paths: diffraction coefficient, gain taper, transmission loss,
//! prominence ranking and smoothing.

mod ranking;
mod smoothing;
mod transmission;

pub use ranking::{
    LENGTH_WEIGHT, compare_diffraction, compare_reflection, keep_most_prominent_diffraction,
    keep_most_prominent_reflections, limit_global_reflections, prominence,
};
pub use smoothing::{SmoothedValues, Smoother, smoothing_alpha};
pub use transmission::{combine_transmission, polyline_losses, segment_losses, surface_losses};

use crate::config::{PropagationDesc, TransmissionOperation};
use crate::geometry::RayTracer;
use crate::math::{Transform, Vec3, deviation_angle, smoothstep};
use crate::output::{DiffractionPath, ReflectionPath};
use crate::rooms::Portal;
use std::f32::consts::PI;

/// Slack allowed when comparing angle sums against the maximum.
const ANGLE_TOLERANCE: f32 = 1e-4;

/// Diffraction coefficient for a total deviation of `angle_sum` radians.
///
/// 0 for a straight path, 1 at 180° and beyond.
pub fn diffraction_coefficient(angle_sum: f32) -> f32 {
    (angle_sum / PI).clamp(0.0, 1.0)
}

/// Gain that fades a path out as its angle sum approaches `max_angle`.
///
/// 1 below `max_angle · (1 − taper_fraction)`, smoothly down to 0 at `max_angle`.
pub fn taper_gain(angle_sum: f32, max_angle: f32, taper_fraction: f32) -> f32 {
    let start = max_angle * (1.0 - taper_fraction.clamp(0.0, 1.0));
    1.0 - smoothstep(start, max_angle, angle_sum)
}

/// Wet diffraction of `portal` for a listener at `listener`.
pub fn wet_diffraction(portal: &Portal, listener: Vec3) -> f32 {
    if portal.volume_contains(listener) {
        return 0.0;
    }
    let normal = portal.normal_facing(listener);
    let offset = listener - portal.center();
    let lateral = match offset.try_normalize() {
        Some(direction) => direction.dot(normal).clamp(-1.0, 1.0).acos(),
        None => 0.0,
    };
    let extent = portal.params.extent;
    let radius = (extent.x * extent.y).max(0.0).sqrt();
    let distance = portal.plane().signed_distance(listener).abs();
    let aperture = distance.atan2(radius);
    diffraction_coefficient(lateral + aperture)
}

/// Scores candidate paths against the configured limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluator {
    pub operation: TransmissionOperation,
    /// Radians
    pub max_angle: f32,
    pub taper_fraction: f32,
    pub max_path_length: f32,
}

impl Evaluator {
    pub fn new(desc: &PropagationDesc, operation: TransmissionOperation) -> Self {
        Self {
            operation,
            max_angle: desc.max_diffraction_angle(),
            taper_fraction: desc.diffraction_taper_fraction,
            max_path_length: desc.max_path_length,
        }
    }

    fn angle_allowed(&self, angle_sum: f32) -> bool {
        angle_sum <= self.max_angle + ANGLE_TOLERANCE
    }

    /// Fills in angles, coefficient, transmission loss and gain of a diffraction path.
    ///
    /// `room_losses` are the losses of rooms crossed without a portal. Returns false when the
    /// path breaks the length or angle limit.
    pub fn evaluate_diffraction<T>(
        &self,
        tracer: &T,
        path: &mut DiffractionPath,
        room_losses: &[f32],
        emitter: &Transform,
    ) -> bool
    where
        T: RayTracer + ?Sized,
    {
        path.update_geometry(emitter);
        if path.length > self.max_path_length {
            return false;
        }
        let angle_sum = path.angle_sum();
        if !self.angle_allowed(angle_sum) {
            return false;
        }
        let mut losses = room_losses.to_vec();
        losses.extend(polyline_losses(tracer, &path.points()));
        path.diffraction = diffraction_coefficient(angle_sum);
        path.transmission_loss = combine_transmission(self.operation, losses);
        path.gain = taper_gain(angle_sum, self.max_angle, self.taper_fraction);
        true
    }

    /// Fills in end diffraction, transmission loss and gain of a reflection path.
    pub fn evaluate_reflection<T>(&self, tracer: &T, path: &mut ReflectionPath) -> bool
    where
        T: RayTracer + ?Sized,
    {
        path.update_geometry();
        if path.length > self.max_path_length {
            return false;
        }
        let positions = path.positions();
        let first_reflection = path.points.iter().position(|p| !p.feature.is_diffraction());
        let last_reflection = path.points.iter().rposition(|p| !p.feature.is_diffraction());
        let (Some(first), Some(last)) = (first_reflection, last_reflection) else {
            return false;
        };
        let mut emitter_side = 0.0;
        let mut listener_side = 0.0;
        for (i, point) in path.points.iter().enumerate() {
            if !point.feature.is_diffraction() {
                continue;
            }
            let angle = deviation_angle(positions[i], positions[i + 1], positions[i + 2]);
            if i < first {
                emitter_side += angle;
            } else if i > last {
                listener_side += angle;
            }
        }
        if !self.angle_allowed(emitter_side) || !self.angle_allowed(listener_side) {
            return false;
        }
        path.emitter_diffraction = diffraction_coefficient(emitter_side);
        path.listener_diffraction = diffraction_coefficient(listener_side);
        path.transmission_loss =
            combine_transmission(self.operation, polyline_losses(tracer, &positions));
        path.gain = taper_gain(emitter_side, self.max_angle, self.taper_fraction)
            * taper_gain(listener_side, self.max_angle, self.taper_fraction);
        true
    }
}
