//! The scene snapshot read by ray casts and path searches.
//!
//! A tick works on an `Arc<Scene>`; queued [`SceneCommand`]s are applied to it before the
//! tick starts, so every job in the tick sees the same consistent scene.

use crate::commands::SceneCommand;
use crate::geometry::{GeometryInstance, GeometryStore, RayHit, RayTracer};
use crate::id::SceneEntityId;
use crate::math::Vec3;
use crate::rooms::{Portal, RoomGraph};

#[derive(Debug, Clone, Default)]
pub struct Scene {
    geometry: GeometryStore,
    rooms: RoomGraph,
    version: u64,
}

/// Side effects of applying a command that the engine reports.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppliedCommand {
    /// Instances whose world-space storage could not be built
    pub degraded: Vec<SceneEntityId>,
    /// Instances removed along with their geometry set
    pub removed_instances: Vec<SceneEntityId>,
    /// Rooms created because a portal or reverb zone referenced them
    pub created_rooms: Vec<SceneEntityId>,
}

impl Scene {
    pub fn new(memory_budget: Option<usize>) -> Self {
        Self {
            geometry: GeometryStore::new(memory_budget),
            rooms: RoomGraph::new(),
            version: 0,
        }
    }

    pub fn geometry(&self) -> &GeometryStore {
        &self.geometry
    }

    pub fn rooms(&self) -> &RoomGraph {
        &self.rooms
    }

    /// Incremented by every applied command.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Applies one mutation. Commands were validated when queued, so this cannot fail.
    ///
    /// Call [`commit`](Self::commit) after a batch.
    pub fn apply(&mut self, command: SceneCommand) -> AppliedCommand {
        log::debug!("Applying {}", command.name());
        let mut applied = AppliedCommand::default();
        match command {
            SceneCommand::SetGeometry { id, params } => {
                let rebuilt = self.geometry.set_geometry(id, &params);
                applied.degraded = rebuilt
                    .into_iter()
                    .filter(|i| self.geometry.instance(*i).is_some_and(|i| i.is_degraded()))
                    .collect();
            }
            SceneCommand::RemoveGeometry(id) => {
                applied.removed_instances = self.geometry.remove_geometry(id);
            }
            SceneCommand::SetGeometryInstance { id, params } => {
                match self.geometry.set_instance(id, params) {
                    Ok(true) => applied.degraded.push(id),
                    Ok(false) => {}
                    // The set was removed by an earlier command in the same batch
                    Err(e) => log::warn!("Dropping geometry instance {}: {}", id, e),
                }
            }
            SceneCommand::RemoveGeometryInstance(id) => {
                self.geometry.remove_instance(id);
            }
            SceneCommand::SetRoom { id, params, name } => {
                self.rooms.set_room(id, params, name);
            }
            SceneCommand::RemoveRoom(id) => {
                self.rooms.remove_room(id);
            }
            SceneCommand::SetPortal { id, params, name } => {
                applied.created_rooms = self.rooms.set_portal(id, params, name);
            }
            SceneCommand::RemovePortal(id) => {
                self.rooms.remove_portal(id);
            }
            SceneCommand::SetReverbZone {
                zone,
                parent,
                transition_width,
            } => {
                if self.rooms.would_cycle(zone, parent) {
                    log::warn!(
                        "Ignoring reverb zone {} under {}: the link would form a cycle",
                        zone,
                        parent
                    );
                } else {
                    applied.created_rooms =
                        self.rooms.set_reverb_zone(zone, parent, transition_width);
                }
            }
            SceneCommand::RemoveReverbZone(zone) => {
                self.rooms.remove_reverb_zone(zone);
            }
        }
        self.version += 1;
        applied
    }

    /// Rebuilds the scene-level geometry index after a batch of commands.
    pub fn commit(&mut self) {
        self.geometry.commit();
    }

    /// Whether a hit on `instance` at `point` counts, after carving portal openings out.
    pub fn accepts_hit(&self, instance: &GeometryInstance, point: Vec3) -> bool {
        instance.params.bypass_portal_subtraction || self.portal_at(point).is_none()
    }

    /// A portal whose volume contains `point`.
    pub fn portal_at(&self, point: Vec3) -> Option<&Portal> {
        self.rooms.portals().find(|p| p.volume_contains(point))
    }

    /// Whether diffraction edge `index` of `instance` survives portal subtraction.
    pub fn edge_usable(&self, instance: &GeometryInstance, index: u32) -> bool {
        if instance.params.bypass_portal_subtraction {
            return true;
        }
        let [a, b] = instance.edge(index);
        self.portal_at((a + b) * 0.5).is_none()
    }

    /// Room containing `point` from room bounds geometry.
    pub fn room_at(&self, point: Vec3) -> SceneEntityId {
        self.rooms.room_at(point, &self.geometry)
    }
}

impl RayTracer for Scene {
    fn cast_ray(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> RayHit {
        self.geometry
            .cast_ray_filtered(origin, direction, max_distance, |instance, point| {
                self.accepts_hit(instance, point)
            })
    }

    fn segment_hits(&self, from: Vec3, to: Vec3, hits: &mut Vec<RayHit>) {
        self.geometry.segment_hits_filtered(
            from,
            to,
            |instance, point| self.accepts_hit(instance, point),
            hits,
        )
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{GeometryInstanceParams, PortalParams};
    use crate::geometry::quad_params;
    use crate::id::GeometrySetId;
    use crate::math::Transform;

    /// A wall in the plane x = 5 (10 m square) with a door-sized portal cut into it,
    /// between room 1 (x < 5) and room 2 (x > 5).
    pub(crate) fn wall_with_door() -> Scene {
        let mut scene = Scene::new(None);
        scene.apply(SceneCommand::SetGeometry {
            id: GeometrySetId(1),
            params: Box::new(quad_params(5.0, 5.0)),
        });
        scene.apply(SceneCommand::SetGeometryInstance {
            id: SceneEntityId(50),
            params: GeometryInstanceParams::new(GeometrySetId(1)).with_transform(Transform::new(
                Vec3::new(5.0, 0.0, 0.0),
                Vec3::X,
                Vec3::Y,
            )),
        });
        scene.apply(SceneCommand::SetPortal {
            id: SceneEntityId(100),
            params: PortalParams {
                transform: Transform::new(Vec3::new(5.0, 0.0, 0.0), Vec3::X, Vec3::Y),
                extent: Vec3::new(1.0, 1.5, 0.5),
                front_room: SceneEntityId(2),
                back_room: SceneEntityId(1),
                ..Default::default()
            },
            name: Some("door".into()),
        });
        scene.commit();
        scene
    }

    #[test]
    fn test_portal_carves_opening() {
        let scene = wall_with_door();
        // Through the door: nothing in the way
        assert!(!scene.is_occluded(Vec3::new(0.0, 0.2, 0.1), Vec3::new(10.0, 0.2, 0.1)));
        // Beside the door: the wall blocks
        assert!(scene.is_occluded(Vec3::new(0.0, 3.0, 3.1), Vec3::new(10.0, 3.0, 3.1)));
        // The raw store still sees the wall in the door
        assert!(
            scene
                .geometry()
                .is_occluded(Vec3::new(0.0, 0.2, 0.1), Vec3::new(10.0, 0.2, 0.1))
        );
    }

    #[test]
    fn test_bypass_keeps_wall() {
        let mut scene = wall_with_door();
        let mut params = GeometryInstanceParams::new(GeometrySetId(1)).with_transform(
            Transform::new(Vec3::new(5.0, 0.0, 0.0), Vec3::X, Vec3::Y),
        );
        params.bypass_portal_subtraction = true;
        scene.apply(SceneCommand::SetGeometryInstance {
            id: SceneEntityId(50),
            params,
        });
        scene.commit();
        assert!(scene.is_occluded(Vec3::new(0.0, 0.2, 0.1), Vec3::new(10.0, 0.2, 0.1)));
    }

    #[test]
    fn test_version_and_auto_rooms() {
        let scene = wall_with_door();
        assert_eq!(scene.version(), 3);
        assert!(scene.rooms().room(SceneEntityId(1)).is_some());
        assert!(scene.rooms().room(SceneEntityId(2)).is_some());
    }

    #[test]
    fn test_remove_geometry_reports_instances() {
        let mut scene = wall_with_door();
        let applied = scene.apply(SceneCommand::RemoveGeometry(GeometrySetId(1)));
        assert_eq!(applied.removed_instances, vec![SceneEntityId(50)]);
        scene.commit();
        assert!(scene.geometry().instance(SceneEntityId(50)).is_none());
    }
}
