use crate::error::{PropagationError, Result};

use super::TransmissionOperation;

/// Highest supported reflection order (bounces per image source).
pub const MAX_REFLECTION_ORDER: u32 = 4;

/// Highest supported diffraction order (nodes per diffraction path).
pub const MAX_DIFFRACTION_ORDER: u32 = 8;

/// Widest supported load-balancing window, in frames.
pub const MAX_LOAD_BALANCING_SPREAD: u32 = 64;

/// Closed-loop control of the load-balancing spread from measured tick cost.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveSpreadDesc {
    /// Tick cost the controller aims for, as a percentage of the frame duration
    pub target_cpu_percent: f32,
    /// Upper bound for the adapted spread
    pub max_spread: u32,
}

impl Default for AdaptiveSpreadDesc {
    fn default() -> Self {
        Self {
            target_cpu_percent: 10.0,
            max_spread: 8,
        }
    }
}

/// Configuration descriptor for a propagation engine.
///
/// Every field can be left at its default; [`PropagationDesc::validate`] is called by
/// [`PropagationEngine::new`](crate::PropagationEngine::new) and rejects out-of-range values.
#[derive(Debug, Clone, PartialEq)]
pub struct PropagationDesc {
    /// Sample rate of the audio frame driving the tick
    pub sample_rate: u32,
    /// Samples per audio frame. Together with `sample_rate` this defines the frame budget.
    pub frame_size: usize,
    /// Primary rays cast per listener per tick
    pub num_primary_rays: u32,
    /// Bounces per reflection path (0 disables reflections, at most [`MAX_REFLECTION_ORDER`])
    pub reflection_order: u32,
    /// Nodes per diffraction path (at most [`MAX_DIFFRACTION_ORDER`])
    pub diffraction_order: u32,
    /// Diffraction nodes allowed around a reflection (0 disables diffraction on reflection)
    pub diffraction_on_reflection_order: u32,
    /// Longest path considered, in meters
    pub max_path_length: f32,
    /// Largest accumulated deviation angle a diffraction path may have, in degrees (0, 360]
    pub max_diffraction_angle_degrees: f32,
    /// Fraction of the maximum angle over which path gain tapers to zero
    pub diffraction_taper_fraction: f32,
    /// Diffraction paths kept per emitter and listener
    pub max_diffraction_paths: usize,
    /// Reflection paths kept per emitter and listener
    pub max_emitter_reflection_paths: usize,
    /// Reflection paths kept across all emitters
    pub max_global_reflection_paths: usize,
    /// Frames over which emitter recomputation is spread (1 recomputes everything every tick)
    pub load_balancing_spread: u32,
    /// Adapt the spread to measured tick cost when set
    pub adaptive_spread: Option<AdaptiveSpreadDesc>,
    /// Movement below this distance (meters) never triggers recomputation
    pub movement_threshold: f32,
    /// Time constant of parameter smoothing in milliseconds (0 disables smoothing)
    pub smoothing_constant_ms: f32,
    /// How transmission losses of several surfaces and rooms combine
    pub transmission_operation: TransmissionOperation,
    /// Search diffraction around geometry edges, not only through portals
    pub enable_geometric_diffraction: bool,
    /// Edge chains cached per listener scan
    pub max_edge_chains: usize,
    /// Worker threads used for ray casting and path search (1 runs inline)
    pub max_job_workers: usize,
    /// Memory an instance's world-space triangles and BVH may use, in bytes (None is unbounded)
    pub max_instance_geometry_bytes: Option<usize>,
}

impl Default for PropagationDesc {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            frame_size: 1024,
            num_primary_rays: 35,
            reflection_order: 1,
            diffraction_order: 4,
            diffraction_on_reflection_order: 2,
            max_path_length: 100.0,
            max_diffraction_angle_degrees: 180.0,
            diffraction_taper_fraction: 0.1,
            max_diffraction_paths: 8,
            max_emitter_reflection_paths: 16,
            max_global_reflection_paths: 100,
            load_balancing_spread: 1,
            adaptive_spread: None,
            movement_threshold: 0.25,
            smoothing_constant_ms: 0.0,
            transmission_operation: TransmissionOperation::Max,
            enable_geometric_diffraction: true,
            max_edge_chains: 128,
            max_job_workers: 4,
            max_instance_geometry_bytes: None,
        }
    }
}

impl PropagationDesc {
    /// Duration of one audio frame in milliseconds.
    pub fn frame_duration_ms(&self) -> f32 {
        self.frame_size as f32 * 1000.0 / self.sample_rate as f32
    }

    pub fn max_diffraction_angle(&self) -> f32 {
        self.max_diffraction_angle_degrees.to_radians()
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 || self.frame_size == 0 {
            return Err(PropagationError::Configuration(
                "sample_rate and frame_size must be non-zero".into(),
            ));
        }
        if self.num_primary_rays == 0 {
            return Err(PropagationError::Configuration(
                "num_primary_rays must be at least 1".into(),
            ));
        }
        validate_reflection_order(self.reflection_order).map_err(as_configuration)?;
        validate_diffraction_order(self.diffraction_order).map_err(as_configuration)?;
        validate_diffraction_order(self.diffraction_on_reflection_order)
            .map_err(as_configuration)?;
        if !(self.max_path_length.is_finite() && self.max_path_length > 0.0) {
            return Err(PropagationError::Configuration(format!(
                "max_path_length must be positive, got {}",
                self.max_path_length
            )));
        }
        if !(self.max_diffraction_angle_degrees > 0.0 && self.max_diffraction_angle_degrees <= 360.0)
        {
            return Err(PropagationError::Configuration(format!(
                "max_diffraction_angle_degrees must be in (0, 360], got {}",
                self.max_diffraction_angle_degrees
            )));
        }
        if !(0.0..=1.0).contains(&self.diffraction_taper_fraction) {
            return Err(PropagationError::Configuration(format!(
                "diffraction_taper_fraction must be in [0, 1], got {}",
                self.diffraction_taper_fraction
            )));
        }
        validate_load_balancing_spread(self.load_balancing_spread).map_err(as_configuration)?;
        if let Some(adaptive) = &self.adaptive_spread {
            if !(adaptive.target_cpu_percent > 0.0 && adaptive.target_cpu_percent <= 100.0) {
                return Err(PropagationError::Configuration(format!(
                    "adaptive target_cpu_percent must be in (0, 100], got {}",
                    adaptive.target_cpu_percent
                )));
            }
            validate_load_balancing_spread(adaptive.max_spread).map_err(as_configuration)?;
        }
        if !(self.movement_threshold.is_finite() && self.movement_threshold >= 0.0) {
            return Err(PropagationError::Configuration(
                "movement_threshold must be non-negative".into(),
            ));
        }
        validate_smoothing_constant(self.smoothing_constant_ms).map_err(as_configuration)?;
        if self.max_job_workers == 0 {
            return Err(PropagationError::Configuration(
                "max_job_workers must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn as_configuration(e: PropagationError) -> PropagationError {
    match e {
        PropagationError::InvalidParameter(msg) => PropagationError::Configuration(msg),
        other => other,
    }
}

pub(crate) fn validate_reflection_order(order: u32) -> Result<()> {
    if order > MAX_REFLECTION_ORDER {
        return Err(PropagationError::InvalidParameter(format!(
            "reflection order {} exceeds maximum {}",
            order, MAX_REFLECTION_ORDER
        )));
    }
    Ok(())
}

pub(crate) fn validate_diffraction_order(order: u32) -> Result<()> {
    if order > MAX_DIFFRACTION_ORDER {
        return Err(PropagationError::InvalidParameter(format!(
            "diffraction order {} exceeds maximum {}",
            order, MAX_DIFFRACTION_ORDER
        )));
    }
    Ok(())
}

pub(crate) fn validate_load_balancing_spread(spread: u32) -> Result<()> {
    if !(1..=MAX_LOAD_BALANCING_SPREAD).contains(&spread) {
        return Err(PropagationError::InvalidParameter(format!(
            "load balancing spread must be in 1..={}, got {}",
            MAX_LOAD_BALANCING_SPREAD, spread
        )));
    }
    Ok(())
}

pub(crate) fn validate_smoothing_constant(ms: f32) -> Result<()> {
    if !(ms.is_finite() && ms >= 0.0) {
        return Err(PropagationError::InvalidParameter(format!(
            "smoothing constant must be a non-negative number of milliseconds, got {}",
            ms
        )));
    }
    Ok(())
}
