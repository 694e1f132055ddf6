//! What the API has accepted so far.
//!
//! The scene itself only changes at tick boundaries, so calls are validated against this
//! mirror instead. Every check runs before anything is recorded: a rejected call leaves the
//! registry untouched.

use crate::config::{GeometryInstanceParams, GeometryParams, PortalParams, RoomParams};
use crate::error::{PropagationError, Result};
use crate::id::{EntityKind, GeometrySetId, IdRegistry, SceneEntityId};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
pub(super) struct Registry {
    ids: IdRegistry,
    geometry_sets: HashSet<GeometrySetId>,
    instances: HashMap<SceneEntityId, GeometrySetId>,
    /// Rooms set through `set_room`, as opposed to rooms only referenced by portals or zones
    explicit_rooms: HashSet<SceneEntityId>,
    portals: HashMap<SceneEntityId, [SceneEntityId; 2]>,
    zone_parents: HashMap<SceneEntityId, SceneEntityId>,
    emitters: HashSet<SceneEntityId>,
    listeners: HashSet<SceneEntityId>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            ids: IdRegistry::new(),
            ..Default::default()
        }
    }

    pub fn set_geometry(&mut self, id: GeometrySetId, params: &GeometryParams) -> Result<()> {
        params.validate()?;
        self.geometry_sets.insert(id);
        Ok(())
    }

    /// Returns the instances that go with the set.
    pub fn remove_geometry(&mut self, id: GeometrySetId) -> Result<Vec<SceneEntityId>> {
        if !self.geometry_sets.remove(&id) {
            return Err(PropagationError::NotFound(format!("geometry set {}", id)));
        }
        let mut dependents: Vec<SceneEntityId> = self
            .instances
            .iter()
            .filter(|(_, set)| **set == id)
            .map(|(instance, _)| *instance)
            .collect();
        dependents.sort_unstable();
        for instance in &dependents {
            self.instances.remove(instance);
            self.ids.release(*instance, EntityKind::GeometryInstance);
        }
        Ok(dependents)
    }

    pub fn set_instance(&mut self, id: SceneEntityId, params: &GeometryInstanceParams) -> Result<()> {
        params.validate()?;
        if !self.geometry_sets.contains(&params.geometry_set) {
            return Err(PropagationError::NotFound(format!(
                "geometry set {} for instance {}",
                params.geometry_set, id
            )));
        }
        self.ids.claim(id, EntityKind::GeometryInstance)?;
        self.instances.insert(id, params.geometry_set);
        Ok(())
    }

    pub fn remove_instance(&mut self, id: SceneEntityId) -> Result<()> {
        if self.instances.remove(&id).is_none() {
            return Err(PropagationError::NotFound(format!("geometry instance {}", id)));
        }
        self.ids.release(id, EntityKind::GeometryInstance);
        Ok(())
    }

    pub fn set_room(&mut self, id: SceneEntityId, params: &RoomParams) -> Result<()> {
        params.validate()?;
        if let Some(bounds) = params.geometry_instance {
            if !self.instances.contains_key(&bounds) {
                return Err(PropagationError::NotFound(format!(
                    "geometry instance {} for the bounds of room {}",
                    bounds, id
                )));
            }
        }
        self.ids.claim(id, EntityKind::Room)?;
        self.explicit_rooms.insert(id);
        Ok(())
    }

    pub fn remove_room(&mut self, id: SceneEntityId) -> Result<()> {
        if id.is_outdoors() {
            return Err(PropagationError::InvalidParameter(
                "the outdoors room cannot be removed".into(),
            ));
        }
        if !self.ids.is(id, EntityKind::Room) {
            return Err(PropagationError::NotFound(format!("room {}", id)));
        }
        self.explicit_rooms.remove(&id);
        self.release_room(id);
        Ok(())
    }

    pub fn set_portal(&mut self, id: SceneEntityId, params: &PortalParams) -> Result<()> {
        params.validate()?;
        self.ids.check(id, EntityKind::Portal)?;
        self.ids.check(params.front_room, EntityKind::Room)?;
        self.ids.check(params.back_room, EntityKind::Room)?;
        self.ids.claim(id, EntityKind::Portal)?;
        self.ids.claim(params.front_room, EntityKind::Room)?;
        self.ids.claim(params.back_room, EntityKind::Room)?;
        if let Some(previous) = self
            .portals
            .insert(id, [params.front_room, params.back_room])
        {
            previous.into_iter().for_each(|room| self.release_room(room));
        }
        Ok(())
    }

    pub fn remove_portal(&mut self, id: SceneEntityId) -> Result<()> {
        let rooms = self
            .portals
            .remove(&id)
            .ok_or_else(|| PropagationError::NotFound(format!("portal {}", id)))?;
        self.ids.release(id, EntityKind::Portal);
        rooms.into_iter().for_each(|room| self.release_room(room));
        Ok(())
    }

    pub fn set_reverb_zone(
        &mut self,
        zone: SceneEntityId,
        parent: SceneEntityId,
        transition_width: f32,
    ) -> Result<()> {
        if zone == parent {
            return Err(PropagationError::InvalidParameter(format!(
                "room {} cannot be its own reverb-zone parent",
                zone
            )));
        }
        if zone.is_outdoors() {
            return Err(PropagationError::InvalidParameter(
                "the outdoors room cannot be a reverb zone".into(),
            ));
        }
        if !(transition_width.is_finite() && transition_width >= 0.0) {
            return Err(PropagationError::InvalidParameter(format!(
                "transition width must be non-negative, got {}",
                transition_width
            )));
        }
        self.ids.check(zone, EntityKind::Room)?;
        self.ids.check(parent, EntityKind::Room)?;
        if self.would_cycle(zone, parent) {
            return Err(PropagationError::InvalidParameter(format!(
                "linking reverb zone {} under {} would form a cycle",
                zone, parent
            )));
        }
        self.ids.claim(zone, EntityKind::Room)?;
        self.ids.claim(parent, EntityKind::Room)?;
        if let Some(previous) = self.zone_parents.insert(zone, parent) {
            self.release_room(previous);
        }
        Ok(())
    }

    pub fn remove_reverb_zone(&mut self, zone: SceneEntityId) -> Result<()> {
        let parent = self
            .zone_parents
            .remove(&zone)
            .ok_or_else(|| PropagationError::NotFound(format!("reverb zone {}", zone)))?;
        self.release_room(zone);
        self.release_room(parent);
        Ok(())
    }

    pub fn register_emitter(&mut self, id: SceneEntityId) -> Result<()> {
        self.ids.claim(id, EntityKind::GameObject)?;
        self.emitters.insert(id);
        Ok(())
    }

    pub fn register_listener(&mut self, id: SceneEntityId) -> Result<()> {
        self.ids.claim(id, EntityKind::GameObject)?;
        self.listeners.insert(id);
        Ok(())
    }

    pub fn unregister(&mut self, id: SceneEntityId) -> Result<()> {
        self.check_game_object(id)?;
        self.ids.release(id, EntityKind::GameObject);
        self.emitters.remove(&id);
        self.listeners.remove(&id);
        Ok(())
    }

    pub fn check_game_object(&self, id: SceneEntityId) -> Result<()> {
        if self.ids.is(id, EntityKind::GameObject) {
            Ok(())
        } else {
            Err(PropagationError::NotFound(format!("game object {}", id)))
        }
    }

    pub fn check_emitter(&self, id: SceneEntityId) -> Result<()> {
        if self.emitters.contains(&id) {
            Ok(())
        } else {
            Err(PropagationError::NotFound(format!("emitter {}", id)))
        }
    }

    pub fn check_listener(&self, id: SceneEntityId) -> Result<()> {
        if self.listeners.contains(&id) {
            Ok(())
        } else {
            Err(PropagationError::NotFound(format!("listener {}", id)))
        }
    }

    pub fn check_room(&self, id: SceneEntityId) -> Result<()> {
        if self.ids.is(id, EntityKind::Room) {
            Ok(())
        } else {
            Err(PropagationError::NotFound(format!("room {}", id)))
        }
    }

    pub fn check_portal(&self, id: SceneEntityId) -> Result<()> {
        if self.portals.contains_key(&id) {
            Ok(())
        } else {
            Err(PropagationError::NotFound(format!("portal {}", id)))
        }
    }

    fn would_cycle(&self, zone: SceneEntityId, parent: SceneEntityId) -> bool {
        let mut current = Some(parent);
        let mut steps = 0;
        while let Some(room) = current {
            if room == zone {
                return true;
            }
            steps += 1;
            if steps > self.zone_parents.len() {
                break;
            }
            current = self.zone_parents.get(&room).copied();
        }
        false
    }

    /// Frees a room ID once nothing keeps the room alive.
    fn release_room(&mut self, room: SceneEntityId) {
        let referenced = self.explicit_rooms.contains(&room)
            || self.portals.values().any(|rooms| rooms.contains(&room))
            || self.zone_parents.contains_key(&room)
            || self.zone_parents.values().any(|parent| *parent == room);
        if !referenced {
            self.ids.release(room, EntityKind::Room);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::quad_params;

    fn portal(front: u64, back: u64) -> PortalParams {
        PortalParams {
            front_room: SceneEntityId(front),
            back_room: SceneEntityId(back),
            ..Default::default()
        }
    }

    #[test]
    fn test_instance_needs_geometry_set() {
        let mut registry = Registry::new();
        let params = GeometryInstanceParams::new(GeometrySetId(1));
        assert!(
            registry
                .set_instance(SceneEntityId(10), &params)
                .unwrap_err()
                .is_not_found()
        );
        registry
            .set_geometry(GeometrySetId(1), &quad_params(1.0, 1.0))
            .unwrap();
        registry.set_instance(SceneEntityId(10), &params).unwrap();
        assert_eq!(
            registry.remove_geometry(GeometrySetId(1)).unwrap(),
            vec![SceneEntityId(10)]
        );
        assert!(
            registry
                .remove_instance(SceneEntityId(10))
                .unwrap_err()
                .is_not_found()
        );
    }

    #[test]
    fn test_shared_id_space() {
        let mut registry = Registry::new();
        registry
            .set_room(SceneEntityId(5), &RoomParams::default())
            .unwrap();
        let err = registry.register_emitter(SceneEntityId(5)).unwrap_err();
        assert!(matches!(err, PropagationError::IdCollision { .. }));

        registry.register_listener(SceneEntityId(6)).unwrap();
        // A portal may not point at a game object
        let err = registry
            .set_portal(SceneEntityId(7), &portal(5, 6))
            .unwrap_err();
        assert!(err.is_invalid_parameter());
        // Nothing was recorded for the rejected portal
        assert!(registry.check_portal(SceneEntityId(7)).is_err());
    }

    #[test]
    fn test_portal_keeps_rooms_alive() {
        let mut registry = Registry::new();
        registry
            .set_portal(SceneEntityId(100), &portal(1, 2))
            .unwrap();
        registry.check_room(SceneEntityId(1)).unwrap();
        registry.check_room(SceneEntityId(2)).unwrap();

        registry.remove_room(SceneEntityId(1)).unwrap();
        // Still referenced by the portal
        registry.check_room(SceneEntityId(1)).unwrap();

        registry.remove_portal(SceneEntityId(100)).unwrap();
        assert!(registry.check_room(SceneEntityId(1)).is_err());
        assert!(registry.check_room(SceneEntityId(2)).is_err());
    }

    #[test]
    fn test_outdoors_cannot_be_removed() {
        let mut registry = Registry::new();
        let err = registry.remove_room(SceneEntityId::OUTDOORS).unwrap_err();
        assert!(err.is_invalid_parameter());
        registry.check_room(SceneEntityId::OUTDOORS).unwrap();
    }

    #[test]
    fn test_reverb_zone_cycles_rejected() {
        let mut registry = Registry::new();
        registry
            .set_reverb_zone(SceneEntityId(1), SceneEntityId(2), 1.0)
            .unwrap();
        registry
            .set_reverb_zone(SceneEntityId(2), SceneEntityId(3), 1.0)
            .unwrap();
        let err = registry
            .set_reverb_zone(SceneEntityId(3), SceneEntityId(1), 1.0)
            .unwrap_err();
        assert!(err.is_invalid_parameter());
        assert!(
            registry
                .set_reverb_zone(SceneEntityId(4), SceneEntityId(4), 1.0)
                .is_err()
        );

        registry.remove_reverb_zone(SceneEntityId(1)).unwrap();
        assert!(
            registry
                .remove_reverb_zone(SceneEntityId(1))
                .unwrap_err()
                .is_not_found()
        );
        // The cycle is gone with the first link
        registry
            .set_reverb_zone(SceneEntityId(3), SceneEntityId(1), 1.0)
            .unwrap();
    }

    #[test]
    fn test_room_bounds_must_exist() {
        let mut registry = Registry::new();
        let params = RoomParams {
            geometry_instance: Some(SceneEntityId(10)),
            ..Default::default()
        };
        assert!(
            registry
                .set_room(SceneEntityId(1), &params)
                .unwrap_err()
                .is_not_found()
        );
        // Rejected calls claim nothing
        registry.register_emitter(SceneEntityId(1)).unwrap();

        registry
            .set_geometry(GeometrySetId(1), &quad_params(1.0, 1.0))
            .unwrap();
        registry
            .set_instance(SceneEntityId(10), &GeometryInstanceParams::new(GeometrySetId(1)))
            .unwrap();
        registry.set_room(SceneEntityId(2), &params).unwrap();
    }

    #[test]
    fn test_game_object_roles() {
        let mut registry = Registry::new();
        registry.register_emitter(SceneEntityId(1)).unwrap();
        registry.register_listener(SceneEntityId(1)).unwrap();
        registry.check_emitter(SceneEntityId(1)).unwrap();
        registry.check_listener(SceneEntityId(1)).unwrap();

        registry.unregister(SceneEntityId(1)).unwrap();
        assert!(registry.check_emitter(SceneEntityId(1)).is_err());
        assert!(registry.unregister(SceneEntityId(1)).unwrap_err().is_not_found());
    }
}
