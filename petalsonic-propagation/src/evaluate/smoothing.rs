use crate::output::{PathKey, PropagationState};
use std::collections::HashMap;

/// Per-tick blend factor of an exponential moving average with time constant `time_ms`.
///
/// A time constant of zero disables smoothing (factor 1).
pub fn smoothing_alpha(frame_ms: f32, time_ms: f32) -> f32 {
    if time_ms <= 0.0 || frame_ms <= 0.0 {
        1.0
    } else {
        1.0 - (-frame_ms / time_ms).exp()
    }
}

/// Values published for one state after smoothing.
#[derive(Debug, Clone, PartialEq)]
pub struct SmoothedValues {
    pub diffraction: f32,
    pub transmission_loss: f32,
    /// One gain per diffraction path, in the state's order
    pub diffraction_gains: Vec<f32>,
    /// One gain per reflection path, in the state's order
    pub reflection_gains: Vec<f32>,
}

/// Smoothing filter state for one emitter position and listener.
#[derive(Debug, Clone, Default)]
pub struct Smoother {
    diffraction: Option<f32>,
    transmission_loss: Option<f32>,
    gains: HashMap<PathKey, f32>,
}

impl Smoother {
    /// Moves the filter toward the state's values by `alpha`.
    ///
    /// Paths new to the filter fade in from silence; paths gone from the state are forgotten.
    pub fn smooth(&mut self, state: &PropagationState, alpha: f32) -> SmoothedValues {
        let alpha = alpha.clamp(0.0, 1.0);
        let diffraction = blend(self.diffraction, state.diffraction, alpha);
        let transmission_loss = blend(self.transmission_loss, state.transmission_loss, alpha);
        self.diffraction = Some(diffraction);
        self.transmission_loss = Some(transmission_loss);

        let mut gains = HashMap::with_capacity(
            state.diffraction_paths.len() + state.reflection_paths.len(),
        );
        let mut step = |key: PathKey, target: f32| {
            let previous = self.gains.get(&key).copied().unwrap_or(0.0);
            let value = previous + (target - previous) * alpha;
            gains.insert(key, value);
            value
        };
        let diffraction_gains = state
            .diffraction_paths
            .iter()
            .map(|p| step(p.key(), p.gain))
            .collect();
        let reflection_gains = state
            .reflection_paths
            .iter()
            .map(|p| step(p.key(), p.gain))
            .collect();
        self.gains = gains;

        SmoothedValues {
            diffraction,
            transmission_loss,
            diffraction_gains,
            reflection_gains,
        }
    }
}

fn blend(previous: Option<f32>, target: f32, alpha: f32) -> f32 {
    match previous {
        Some(previous) => previous + (target - previous) * alpha,
        None => target,
    }
}
