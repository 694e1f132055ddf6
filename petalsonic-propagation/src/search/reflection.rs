use crate::geometry::{RayTracer, SurfaceKey};
use crate::id::{AcousticTextureId, SceneEntityId};
use crate::math::{Plane, SURFACE_EPSILON, Vec3};
use crate::output::{DiffractionPath, MAX_REFLECTION_POINTS, PathFeature, PathPoint};
use crate::scene::Scene;

/// A planar reflector resolved against the current scene.
struct Reflector {
    key: SurfaceKey,
    plane: Plane,
    texture: AcousticTextureId,
}

fn resolve(scene: &Scene, key: SurfaceKey) -> Option<Reflector> {
    let instance = scene.geometry().instance(key.instance)?;
    if !instance.is_reflective() {
        return None;
    }
    let plane = instance.face_group_plane(key.face_group)?;
    let first = *instance.set().face_group_triangles(key.face_group).first()?;
    Some(Reflector {
        key,
        plane,
        texture: instance.hit_surface(first).texture,
    })
}

/// Where the reflection of `source` off `reflector` toward `target` lands, if it lands on
/// the reflector's faces.
fn reflection_point(scene: &Scene, reflector: &Reflector, source: Vec3, target: Vec3) -> Option<Vec3> {
    let image = reflector.plane.mirror(source);
    let t = reflector.plane.intersect_segment(target, image)?;
    let point = target + (image - target) * t;
    let instance = scene.geometry().instance(reflector.key.instance)?;
    instance
        .face_group_contains(reflector.key.face_group, point)
        .then_some(point)
}

fn legs_clear(scene: &Scene, positions: &[Vec3]) -> bool {
    positions
        .windows(2)
        .all(|leg| leg[0].distance(leg[1]) > SURFACE_EPSILON && !scene.is_occluded(leg[0], leg[1]))
}

/// Follows `positions` from `start_room` through the enabled portals the legs cross and
/// returns the room the last position ends up in.
fn room_after(scene: &Scene, positions: &[Vec3], start_room: SceneEntityId) -> SceneEntityId {
    let mut room = start_room;
    for leg in positions.windows(2) {
        let (a, b) = (leg[0], leg[1]);
        let last_crossing = scene
            .rooms()
            .portals()
            .filter(|p| p.is_enabled())
            .filter_map(|p| p.crossing(a, b).map(|point| (a.distance(point), p)))
            .max_by(|x, y| x.0.total_cmp(&y.0));
        if let Some((_, portal)) = last_crossing {
            room = portal.room_on_side(b);
        }
    }
    room
}

/// Validates an image-source path through `sequence` (ordered from the listener outward).
///
/// Mirrors the emitter across each reflector plane, then walks back from the listener
/// intersecting each plane with the line toward the matching image. Every reflection point
/// must lie on its face group, every leg must be unobstructed, and the path may only change
/// acoustic space through a portal opening. Returns the points ordered from the emitter.
pub(crate) fn image_source_points(
    scene: &Scene,
    sequence: &[SurfaceKey],
    emitter: Vec3,
    emitter_room: SceneEntityId,
    listener: Vec3,
    listener_room: SceneEntityId,
) -> Option<Vec<PathPoint>> {
    if sequence.is_empty() || sequence.len() > MAX_REFLECTION_POINTS {
        return None;
    }
    let reflectors: Vec<Reflector> = sequence
        .iter()
        .rev()
        .map(|key| resolve(scene, *key))
        .collect::<Option<_>>()?;

    // images[k] is the emitter mirrored across the first k reflectors
    let mut images = Vec::with_capacity(reflectors.len() + 1);
    images.push(emitter);
    for reflector in &reflectors {
        let previous = images[images.len() - 1];
        images.push(reflector.plane.mirror(previous));
    }

    let mut positions = vec![Vec3::ZERO; reflectors.len()];
    let mut target = listener;
    for (k, reflector) in reflectors.iter().enumerate().rev() {
        let image = images[k + 1];
        let t = reflector.plane.intersect_segment(target, image)?;
        let point = target + (image - target) * t;
        let instance = scene.geometry().instance(reflector.key.instance)?;
        if !instance.face_group_contains(reflector.key.face_group, point) {
            return None;
        }
        positions[k] = point;
        target = point;
    }

    let mut all = Vec::with_capacity(positions.len() + 2);
    all.push(emitter);
    all.extend_from_slice(&positions);
    all.push(listener);
    if !legs_clear(scene, &all) {
        return None;
    }
    if !scene
        .rooms()
        .same_space(room_after(scene, &all, emitter_room), listener_room)
    {
        return None;
    }

    Some(
        reflectors
            .iter()
            .zip(positions)
            .map(|(reflector, position)| PathPoint {
                position,
                feature: PathFeature::Reflector(reflector.key),
                texture: Some(reflector.texture),
            })
            .collect(),
    )
}

/// Inserts a reflection off `key` into `path` between path points `gap` and `gap + 1`, where
/// point 0 is the emitter and the last point is the listener.
///
/// Only the two new legs are checked; the rest of the path was validated when it was found.
pub(crate) fn splice_reflection(
    scene: &Scene,
    path: &DiffractionPath,
    key: SurfaceKey,
    gap: usize,
) -> Option<Vec<PathPoint>> {
    if path.nodes.is_empty()
        || gap > path.nodes.len()
        || path.nodes.len() + 1 > MAX_REFLECTION_POINTS
    {
        return None;
    }
    let reflector = resolve(scene, key)?;
    let points = path.points();
    let (source, target) = (points[gap], points[gap + 1]);
    let position = reflection_point(scene, &reflector, source, target)?;
    if !legs_clear(scene, &[source, position, target]) {
        return None;
    }

    let gap_room = if gap == 0 {
        path.nodes[0].emitter_side_room
    } else {
        path.nodes[gap - 1].listener_side_room
    };
    let nudged = position + (source - position).normalize_or_zero() * SURFACE_EPSILON;
    let arrival = room_after(scene, &[source, nudged, target], gap_room);
    if !scene.rooms().same_space(arrival, gap_room) {
        return None;
    }

    let mut spliced: Vec<PathPoint> = path
        .nodes
        .iter()
        .map(|node| PathPoint {
            position: node.position,
            feature: node.feature,
            texture: None,
        })
        .collect();
    spliced.insert(
        gap,
        PathPoint {
            position,
            feature: PathFeature::Reflector(key),
            texture: Some(reflector.texture),
        },
    );
    Some(spliced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::SceneCommand;
    use crate::config::{GeometryInstanceParams, PortalParams};
    use crate::geometry::{AcousticSurface, box_params, quad_params};
    use crate::id::GeometrySetId;
    use crate::math::Transform;
    use crate::output::DiffractionNode;
    use crate::scene::tests::wall_with_door;

    /// A floor slab whose top face is the plane y = 0, spanning x and z in [-10, 10].
    fn floor_scene() -> Scene {
        let mut scene = Scene::new(None);
        scene.apply(SceneCommand::SetGeometry {
            id: GeometrySetId(1),
            params: Box::new(box_params(
                Vec3::new(-10.0, -1.0, -10.0),
                Vec3::new(10.0, 0.0, 10.0),
                AcousticSurface::CONCRETE,
            )),
        });
        scene.apply(SceneCommand::SetGeometryInstance {
            id: SceneEntityId(10),
            params: GeometryInstanceParams::new(GeometrySetId(1)),
        });
        scene.commit();
        scene
    }

    fn floor_key(scene: &Scene) -> SurfaceKey {
        let hit = scene.cast_ray(Vec3::new(0.0, 2.0, 0.0), -Vec3::Y, 10.0);
        assert!(hit.hit);
        hit.surface.key()
    }

    #[test]
    fn test_floor_bounce() {
        let scene = floor_scene();
        let key = floor_key(&scene);
        let emitter = Vec3::new(-2.0, 1.0, 0.0);
        let listener = Vec3::new(2.0, 1.0, 0.0);
        let outdoors = SceneEntityId::OUTDOORS;
        let points = image_source_points(&scene, &[key], emitter, outdoors, listener, outdoors).unwrap();
        assert_eq!(points.len(), 1);
        assert!(points[0].position.abs_diff_eq(Vec3::ZERO, 1e-4));
        assert_eq!(points[0].feature, PathFeature::Reflector(key));
        assert_eq!(points[0].texture, Some(AcousticTextureId::default()));
    }

    #[test]
    fn test_reflection_off_the_faces_is_rejected() {
        let scene = floor_scene();
        let key = floor_key(&scene);
        let outdoors = SceneEntityId::OUTDOORS;
        // The mirror point (15, 0, 0) is beyond the slab
        let points = image_source_points(
            &scene,
            &[key],
            Vec3::new(13.0, 1.0, 0.0),
            outdoors,
            Vec3::new(17.0, 1.0, 0.0),
            outdoors,
        );
        assert!(points.is_none());
        // Both ends below the floor plane cannot reflect off its top face
        let below = image_source_points(
            &scene,
            &[key],
            Vec3::new(-2.0, -3.0, 0.0),
            outdoors,
            Vec3::new(2.0, -3.0, 0.0),
            outdoors,
        );
        assert!(below.is_none());
    }

    #[test]
    fn test_reflection_needs_portal_between_rooms() {
        // Wall at x = 5 with a door; a second quad at z = -3 to reflect off
        let mut scene = wall_with_door();
        scene.apply(SceneCommand::SetGeometry {
            id: GeometrySetId(2),
            params: Box::new(quad_params(20.0, 5.0)),
        });
        scene.apply(SceneCommand::SetGeometryInstance {
            id: SceneEntityId(60),
            params: GeometryInstanceParams::new(GeometrySetId(2)).with_transform(Transform::new(
                Vec3::new(5.0, 0.0, -3.0),
                Vec3::Z,
                Vec3::Y,
            )),
        });
        scene.commit();
        let hit = scene.cast_ray(Vec3::new(7.0, 0.0, 0.0), -Vec3::Z, 10.0);
        assert!(hit.hit);
        let key = hit.surface.key();

        // Both in room 2, bounce point (7, 0, -3) stays on the room 2 side
        let points = image_source_points(
            &scene,
            &[key],
            Vec3::new(6.0, 0.0, 0.0),
            SceneEntityId(2),
            Vec3::new(8.0, 0.0, 0.0),
            SceneEntityId(2),
        );
        assert!(points.is_some());

        // Same geometry, but the rooms claim the listener is elsewhere with no portal crossed
        let points = image_source_points(
            &scene,
            &[key],
            Vec3::new(6.0, 0.0, 0.0),
            SceneEntityId(2),
            Vec3::new(8.0, 0.0, 0.0),
            SceneEntityId(1),
        );
        assert!(points.is_none());
    }

    #[test]
    fn test_splice_into_portal_path() {
        let mut scene = floor_scene();
        scene.apply(SceneCommand::SetPortal {
            id: SceneEntityId(100),
            params: PortalParams {
                transform: Transform::new(Vec3::new(0.0, 2.0, 0.0), Vec3::X, Vec3::Y),
                extent: Vec3::new(1.0, 1.5, 0.25),
                front_room: SceneEntityId(2),
                back_room: SceneEntityId(1),
                ..Default::default()
            },
            name: None,
        });
        scene.commit();
        let key = floor_key(&scene);

        let node = DiffractionNode {
            position: Vec3::new(0.0, 2.0, 0.0),
            feature: PathFeature::Portal(SceneEntityId(100)),
            angle: 0.0,
            emitter_side_room: SceneEntityId(1),
            listener_side_room: SceneEntityId(2),
        };
        let path = DiffractionPath::new(Vec3::new(-2.0, 2.0, 0.0), Vec3::new(2.0, 2.0, 0.0), vec![node]);

        // Bounce between the door and the listener: (0,2,0) -> (1,0,0) -> (2,2,0)
        let spliced = splice_reflection(&scene, &path, key, 1).unwrap();
        assert_eq!(spliced.len(), 2);
        assert_eq!(spliced[0].feature, PathFeature::Portal(SceneEntityId(100)));
        assert_eq!(spliced[0].texture, None);
        assert_eq!(spliced[1].feature, PathFeature::Reflector(key));
        assert!(spliced[1].position.abs_diff_eq(Vec3::new(1.0, 0.0, 0.0), 1e-4));

        assert!(splice_reflection(&scene, &path, key, 2).is_none());
    }
}
