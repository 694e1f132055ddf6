use crate::error::{PropagationError, Result};
use crate::geometry::{AcousticSurface, Triangle};
use crate::id::{GeometrySetId, SceneEntityId};
use crate::math::{Transform, Vec3};

/// How several transmission losses along one path combine into a single value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransmissionOperation {
    /// Sum of all losses, capped at 1
    Add,
    /// Successive multiplication of the complements: `1 - Π(1 - l)`
    Multiply,
    /// The single worst loss dominates
    #[default]
    Max,
}

/// How a room's bounds take part in containment and distance calculations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DistanceBehavior {
    /// The room carves its volume out of any enclosing room
    #[default]
    SubtractFromParent,
    /// The room is ignored when an enclosing room competes for the same point
    ExcludeFromDistance,
}

/// Parameters of a room.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomParams {
    /// Orientation of the room's reverb, front vector
    pub front: Vec3,
    /// Orientation of the room's reverb, up vector
    pub up: Vec3,
    /// Auxiliary bus carrying the room's reverb, if any
    pub reverb_aux_bus: Option<u64>,
    /// Send level into the reverb bus
    pub reverb_level: f32,
    /// Loss applied to sound passing through the room's walls without a portal (0.0 - 1.0)
    pub transmission_loss: f32,
    /// Geometry instance describing the room's bounds, used for automatic containment
    pub geometry_instance: Option<SceneEntityId>,
    /// Overlapping rooms with higher priority win containment
    pub priority: i32,
    pub distance_behavior: DistanceBehavior,
}

impl Default for RoomParams {
    fn default() -> Self {
        Self {
            front: Vec3::Z,
            up: Vec3::Y,
            reverb_aux_bus: None,
            reverb_level: 1.0,
            transmission_loss: 1.0,
            geometry_instance: None,
            priority: 100,
            distance_behavior: DistanceBehavior::SubtractFromParent,
        }
    }
}

impl RoomParams {
    pub fn validate(&self) -> Result<()> {
        Transform::new(Vec3::ZERO, self.front, self.up).validate()?;
        validate_unit_interval("room transmission loss", self.transmission_loss)?;
        if !(self.reverb_level.is_finite() && self.reverb_level >= 0.0) {
            return Err(PropagationError::InvalidParameter(format!(
                "reverb level must be non-negative, got {}",
                self.reverb_level
            )));
        }
        Ok(())
    }
}

/// Parameters of a portal.
#[derive(Debug, Clone, PartialEq)]
pub struct PortalParams {
    /// Centre and orientation. The front vector points into the front room.
    pub transform: Transform,
    /// Half-width, half-height and half-depth. Depth is the transition axis.
    pub extent: Vec3,
    /// Closed portals (doors) let no sound through
    pub enabled: bool,
    pub front_room: SceneEntityId,
    pub back_room: SceneEntityId,
    /// Scale on the gain of reverb bleeding into the adjacent room
    pub adjacent_room_bleed: f32,
}

impl Default for PortalParams {
    fn default() -> Self {
        Self {
            transform: Transform::identity(),
            extent: Vec3::new(1.0, 1.0, 0.25),
            enabled: true,
            front_room: SceneEntityId::OUTDOORS,
            back_room: SceneEntityId::OUTDOORS,
            adjacent_room_bleed: 1.0,
        }
    }
}

impl PortalParams {
    pub fn validate(&self) -> Result<()> {
        self.transform.validate()?;
        if !self.extent.is_finite() || self.extent.cmplt(Vec3::ZERO).any() {
            return Err(PropagationError::InvalidParameter(format!(
                "portal extent must be non-negative, got {}",
                self.extent
            )));
        }
        if self.front_room == self.back_room {
            return Err(PropagationError::InvalidParameter(format!(
                "portal front and back room must differ (both {})",
                self.front_room
            )));
        }
        if !(self.adjacent_room_bleed.is_finite() && self.adjacent_room_bleed >= 0.0) {
            return Err(PropagationError::InvalidParameter(format!(
                "adjacent room bleed must be non-negative, got {}",
                self.adjacent_room_bleed
            )));
        }
        Ok(())
    }
}

/// Triangle mesh submitted for a geometry set. All data is copied into the engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeometryParams {
    pub vertices: Vec<Vec3>,
    pub triangles: Vec<Triangle>,
    pub surfaces: Vec<AcousticSurface>,
    /// Treat edges between non-coplanar triangles as diffraction edges
    pub enable_diffraction: bool,
    /// Also treat edges used by a single triangle as diffraction edges
    pub enable_diffraction_on_boundary_edges: bool,
}

impl GeometryParams {
    pub fn validate(&self) -> Result<()> {
        if let Some(v) = self.vertices.iter().find(|v| !v.is_finite()) {
            return Err(PropagationError::InvalidParameter(format!(
                "vertex {} is not finite",
                v
            )));
        }
        let vertex_count = self.vertices.len();
        for (i, triangle) in self.triangles.iter().enumerate() {
            if let Some(index) = triangle
                .vertices
                .iter()
                .find(|index| **index as usize >= vertex_count)
            {
                return Err(PropagationError::InvalidParameter(format!(
                    "triangle {} references vertex {} but only {} vertices were given",
                    i, index, vertex_count
                )));
            }
            if let Some(surface) = triangle.surface {
                if surface as usize >= self.surfaces.len() {
                    return Err(PropagationError::InvalidParameter(format!(
                        "triangle {} references surface {} but only {} surfaces were given",
                        i,
                        surface,
                        self.surfaces.len()
                    )));
                }
            }
        }
        for surface in &self.surfaces {
            surface.validate()?;
        }
        Ok(())
    }
}

/// Placement of a geometry set in the scene.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryInstanceParams {
    pub geometry_set: GeometrySetId,
    pub transform: Transform,
    /// Per-axis scale applied in local space before rotation
    pub scale: Vec3,
    /// Whether rays reflect and diffract off this instance (it always transmits)
    pub use_for_reflection_and_diffraction: bool,
    /// Keep triangles inside portal volumes instead of carving the opening out
    pub bypass_portal_subtraction: bool,
    /// Closed mesh: an entry hit and the matching exit hit apply loss once
    pub solid: bool,
}

impl GeometryInstanceParams {
    pub fn new(geometry_set: GeometrySetId) -> Self {
        Self {
            geometry_set,
            transform: Transform::identity(),
            scale: Vec3::ONE,
            use_for_reflection_and_diffraction: true,
            bypass_portal_subtraction: false,
            solid: false,
        }
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    pub fn solid(mut self, solid: bool) -> Self {
        self.solid = solid;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.transform.validate()?;
        if !self.scale.is_finite() || self.scale.abs().min_element() <= f32::EPSILON {
            return Err(PropagationError::InvalidParameter(format!(
                "instance scale must be finite and non-zero, got {}",
                self.scale
            )));
        }
        Ok(())
    }
}

pub(crate) fn validate_unit_interval(what: &str, value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(PropagationError::InvalidParameter(format!(
            "{} must be between 0.0 and 1.0, got {}",
            what, value
        )));
    }
    Ok(())
}
