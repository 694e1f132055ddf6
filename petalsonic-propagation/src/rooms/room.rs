use crate::config::RoomParams;
use crate::id::SceneEntityId;

/// Link from a reverb zone to the room it sits in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReverbZoneLink {
    pub parent: SceneEntityId,
    /// Width of the region over which the zone fades into its parent, in meters
    pub transition_width: f32,
}

/// A logical acoustic space.
#[derive(Debug, Clone, PartialEq)]
pub struct Room {
    pub id: SceneEntityId,
    pub params: RoomParams,
    pub name: Option<String>,
    pub reverb_zone: Option<ReverbZoneLink>,
    /// Created implicitly because a portal or reverb zone referenced it
    pub auto_created: bool,
}

impl Room {
    pub fn new(id: SceneEntityId, params: RoomParams, name: Option<String>) -> Self {
        Self {
            id,
            params,
            name,
            reverb_zone: None,
            auto_created: false,
        }
    }

    pub fn outdoors() -> Self {
        Self::new(
            SceneEntityId::OUTDOORS,
            RoomParams::default(),
            Some("Outdoors".to_string()),
        )
    }

    pub(crate) fn with_defaults(id: SceneEntityId) -> Self {
        Self {
            auto_created: true,
            ..Self::new(id, RoomParams::default(), None)
        }
    }

    pub fn transmission_loss(&self) -> f32 {
        self.params.transmission_loss
    }

    pub fn is_reverb_zone(&self) -> bool {
        self.reverb_zone.is_some()
    }
}
