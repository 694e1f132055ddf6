//! Commands queued by the public API and applied at the start of the next tick.

use crate::config::{
    GeometryInstanceParams, GeometryParams, PortalParams, RoomParams, TransmissionOperation,
};
use crate::id::{GeometrySetId, SceneEntityId};
use crate::math::Transform;

/// Mutation of the scene snapshot (geometry and room graph).
#[derive(Debug, Clone, PartialEq)]
pub enum SceneCommand {
    SetGeometry {
        id: GeometrySetId,
        params: Box<GeometryParams>,
    },
    RemoveGeometry(GeometrySetId),
    SetGeometryInstance {
        id: SceneEntityId,
        params: GeometryInstanceParams,
    },
    RemoveGeometryInstance(SceneEntityId),
    SetRoom {
        id: SceneEntityId,
        params: RoomParams,
        name: Option<String>,
    },
    RemoveRoom(SceneEntityId),
    SetPortal {
        id: SceneEntityId,
        params: PortalParams,
        name: Option<String>,
    },
    RemovePortal(SceneEntityId),
    SetReverbZone {
        zone: SceneEntityId,
        parent: SceneEntityId,
        transition_width: f32,
    },
    RemoveReverbZone(SceneEntityId),
}

impl SceneCommand {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetGeometry { .. } => "SetGeometry",
            Self::RemoveGeometry(_) => "RemoveGeometry",
            Self::SetGeometryInstance { .. } => "SetGeometryInstance",
            Self::RemoveGeometryInstance(_) => "RemoveGeometryInstance",
            Self::SetRoom { .. } => "SetRoom",
            Self::RemoveRoom(_) => "RemoveRoom",
            Self::SetPortal { .. } => "SetPortal",
            Self::RemovePortal(_) => "RemovePortal",
            Self::SetReverbZone { .. } => "SetReverbZone",
            Self::RemoveReverbZone(_) => "RemoveReverbZone",
        }
    }
}

/// Runtime tuning of the search, applied at the next tick boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamCommand {
    SetReflectionsOrder {
        order: u32,
        invalidate: bool,
    },
    SetDiffractionOrder {
        order: u32,
        invalidate: bool,
    },
    SetMaxDiffractionPaths {
        emitter: SceneEntityId,
        max_paths: usize,
    },
    SetMaxGlobalReflectionPaths(usize),
    SetNumberOfPrimaryRays(u32),
    SetLoadBalancingSpread(u32),
    /// `None` sets the global constant
    SetSmoothingConstant {
        emitter: Option<SceneEntityId>,
        time_ms: f32,
    },
    SetTransmissionOperation(TransmissionOperation),
}

/// Game-object bookkeeping: registration, positions and room overrides.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectCommand {
    RegisterEmitter(SceneEntityId),
    RegisterListener(SceneEntityId),
    Unregister(SceneEntityId),
    SetListeners {
        emitter: SceneEntityId,
        listeners: Vec<SceneEntityId>,
    },
    SetPositions {
        id: SceneEntityId,
        positions: Vec<Transform>,
    },
    SetInRoom {
        id: SceneEntityId,
        room: SceneEntityId,
    },
    UnsetInRoom(SceneEntityId),
}

/// Everything that travels through the engine's command channel, in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    Scene(SceneCommand),
    Param(ParamCommand),
    Object(ObjectCommand),
}

impl From<SceneCommand> for EngineCommand {
    fn from(command: SceneCommand) -> Self {
        Self::Scene(command)
    }
}

impl From<ParamCommand> for EngineCommand {
    fn from(command: ParamCommand) -> Self {
        Self::Param(command)
    }
}

impl From<ObjectCommand> for EngineCommand {
    fn from(command: ObjectCommand) -> Self {
        Self::Object(command)
    }
}
