//! Event types for PetalSonic propagation

use crate::id::SceneEntityId;

/// Cost of one tick, broken down by stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickTimingEvent {
    /// Tick counter, starting at 1
    pub frame: u64,
    pub scan_time_us: u64,
    pub search_time_us: u64,
    pub total_time_us: u64,
    /// Pairs searched from scratch
    pub recomputed: u32,
    /// Pairs whose held paths were moved to new end points
    pub extrapolated: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PropagationEvent {
    TickCompleted {
        timing: TickTimingEvent,
    },
    /// An emitter or listener moved to another room
    RoomChanged {
        game_object: SceneEntityId,
        from: SceneEntityId,
        to: SceneEntityId,
    },
    /// A geometry instance could not get storage for its triangles or BVH; it no longer
    /// takes part in ray queries
    GeometryDegraded {
        instance: SceneEntityId,
    },
    /// The adaptive load balancer changed the spread
    SpreadAdjusted {
        spread: u32,
    },
}

impl PropagationEvent {
    pub fn game_object(&self) -> Option<SceneEntityId> {
        match self {
            Self::RoomChanged { game_object, .. } => Some(*game_object),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::GeometryDegraded { .. })
    }

    pub fn timing(&self) -> Option<&TickTimingEvent> {
        match self {
            Self::TickCompleted { timing } => Some(timing),
            _ => None,
        }
    }
}
