//! Spreads path recomputation across frames.
//!
//! Every emitter gets a slot (its registration order). With a spread of `n`, an emitter is
//! due once every `n` frames, offset by its slot so the work is staggered. Between due
//! frames held paths are only moved to the new end points.

use crate::config::{AdaptiveSpreadDesc, MAX_LOAD_BALANCING_SPREAD, PropagationDesc};

/// What a tick does for one emitter/listener pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Search and evaluate from scratch
    Recompute,
    /// Keep the held paths and move their end points
    Extrapolate,
    /// Nothing moved; the held result stands
    Hold,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadBalancer {
    spread: u32,
    adaptive: Option<AdaptiveSpreadDesc>,
    movement_threshold: f32,
}

impl LoadBalancer {
    pub fn new(desc: &PropagationDesc) -> Self {
        Self {
            spread: desc.load_balancing_spread.clamp(1, MAX_LOAD_BALANCING_SPREAD),
            adaptive: desc.adaptive_spread.clone(),
            movement_threshold: desc.movement_threshold,
        }
    }

    pub fn spread(&self) -> u32 {
        self.spread
    }

    pub fn set_spread(&mut self, spread: u32) {
        self.spread = spread.clamp(1, MAX_LOAD_BALANCING_SPREAD);
    }

    /// Whether the emitter in `slot` is due at `frame`.
    pub fn is_due(&self, frame: u64, slot: usize) -> bool {
        let spread = u64::from(self.spread);
        (frame + slot as u64 % spread) % spread == 0
    }

    /// Decides what to do for a pair.
    ///
    /// * `forced` - The pair has no usable result (new pair, scene or limits changed)
    /// * `moved_since_search` - Largest end-point movement since the last search, in meters
    /// * `moved_since_tick` - Largest end-point movement since the previous tick, in meters
    pub fn decide(
        &self,
        frame: u64,
        slot: usize,
        forced: bool,
        moved_since_search: f32,
        moved_since_tick: f32,
    ) -> Decision {
        if forced {
            return Decision::Recompute;
        }
        if self.is_due(frame, slot) && moved_since_search >= self.movement_threshold {
            return Decision::Recompute;
        }
        if moved_since_tick > 0.0 {
            Decision::Extrapolate
        } else {
            Decision::Hold
        }
    }

    /// Feeds the measured cost of a tick to the adaptive controller.
    ///
    /// Returns the new spread when it changed. Without adaptive spreading this never changes
    /// anything.
    pub fn record_tick(&mut self, elapsed_ms: f32, frame_ms: f32) -> Option<u32> {
        let adaptive = self.adaptive.as_ref()?;
        if frame_ms <= 0.0 {
            return None;
        }
        let usage = elapsed_ms / frame_ms * 100.0;
        let max_spread = adaptive.max_spread.clamp(1, MAX_LOAD_BALANCING_SPREAD);
        let next = if usage > adaptive.target_cpu_percent && self.spread < max_spread {
            self.spread + 1
        } else if usage < adaptive.target_cpu_percent * 0.5 && self.spread > 1 {
            self.spread - 1
        } else {
            return None;
        };
        log::debug!(
            "Tick used {:.1}% of the frame (target {:.1}%), spread {} -> {}",
            usage,
            adaptive.target_cpu_percent,
            self.spread,
            next
        );
        self.spread = next;
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn balancer(spread: u32) -> LoadBalancer {
        LoadBalancer::new(&PropagationDesc {
            load_balancing_spread: spread,
            ..Default::default()
        })
    }

    #[test]
    fn test_spread_one_always_due() {
        let balancer = balancer(1);
        for frame in 0..5 {
            for slot in 0..3 {
                assert!(balancer.is_due(frame, slot));
            }
        }
    }

    #[test]
    fn test_slots_staggered() {
        let balancer = balancer(4);
        // Each slot is due exactly once per window, and slots 0..4 on different frames
        let due_frames: Vec<u64> = (0..4)
            .map(|slot| (0..4).filter(|f| balancer.is_due(*f, slot)).collect::<Vec<_>>())
            .map(|frames| {
                assert_eq!(frames.len(), 1);
                frames[0]
            })
            .collect();
        let mut unique = due_frames.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), 4);
        // Slot 4 shares slot 0's frame
        assert_eq!(balancer.is_due(0, 4), balancer.is_due(0, 0));
    }

    #[test]
    fn test_decisions() {
        let balancer = balancer(2);
        assert_eq!(balancer.decide(1, 0, true, 0.0, 0.0), Decision::Recompute);
        assert_eq!(balancer.decide(0, 0, false, 1.0, 0.1), Decision::Recompute);
        // Not due: moving pairs are extrapolated
        assert_eq!(balancer.decide(1, 0, false, 1.0, 0.1), Decision::Extrapolate);
        // Due, but below the movement threshold
        assert_eq!(balancer.decide(0, 0, false, 0.1, 0.1), Decision::Extrapolate);
        assert_eq!(balancer.decide(0, 0, false, 0.0, 0.0), Decision::Hold);
    }

    #[test]
    fn test_adaptive_spread() {
        let mut balancer = LoadBalancer::new(&PropagationDesc {
            adaptive_spread: Some(AdaptiveSpreadDesc {
                target_cpu_percent: 10.0,
                max_spread: 3,
            }),
            ..Default::default()
        });
        assert_eq!(balancer.spread(), 1);
        // 5 ms of a 10 ms frame is 50%: widen
        assert_eq!(balancer.record_tick(5.0, 10.0), Some(2));
        assert_eq!(balancer.record_tick(5.0, 10.0), Some(3));
        assert_eq!(balancer.record_tick(5.0, 10.0), None);
        // Within [target / 2, target]: hold
        assert_eq!(balancer.record_tick(0.8, 10.0), None);
        // Well under target: narrow
        assert_eq!(balancer.record_tick(0.1, 10.0), Some(2));
        assert_eq!(balancer.record_tick(0.1, 10.0), Some(1));
        assert_eq!(balancer.record_tick(0.1, 10.0), None);
    }

    #[test]
    fn test_fixed_spread_never_adapts() {
        let mut balancer = balancer(3);
        assert_eq!(balancer.record_tick(100.0, 10.0), None);
        balancer.set_spread(0);
        assert_eq!(balancer.spread(), 1);
        balancer.set_spread(1000);
        assert_eq!(balancer.spread(), MAX_LOAD_BALANCING_SPREAD);
    }
}
