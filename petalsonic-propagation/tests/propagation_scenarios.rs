use petalsonic_propagation::*;

const KITCHEN: SceneEntityId = SceneEntityId(1);
const HALL: SceneEntityId = SceneEntityId(2);
const DOOR: SceneEntityId = SceneEntityId(100);
const EMITTER: SceneEntityId = SceneEntityId(10);
const LISTENER: SceneEntityId = SceneEntityId(11);

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn engine() -> PropagationEngine {
    init_logger();
    PropagationEngine::with_executor(PropagationDesc::default(), Box::new(InlineExecutor))
        .expect("default desc is valid")
}

fn place(engine: &PropagationEngine, id: SceneEntityId, position: Vec3) {
    engine
        .set_position(id, Transform::from_position(position))
        .unwrap();
}

/// Axis-aligned box, two triangles per face.
fn box_mesh(min: Vec3, max: Vec3, surface: AcousticSurface) -> GeometryParams {
    let vertices = vec![
        Vec3::new(min.x, min.y, min.z),
        Vec3::new(max.x, min.y, min.z),
        Vec3::new(max.x, max.y, min.z),
        Vec3::new(min.x, max.y, min.z),
        Vec3::new(min.x, min.y, max.z),
        Vec3::new(max.x, min.y, max.z),
        Vec3::new(max.x, max.y, max.z),
        Vec3::new(min.x, max.y, max.z),
    ];
    let faces: [[u32; 4]; 6] = [
        [0, 3, 2, 1],
        [4, 5, 6, 7],
        [0, 1, 5, 4],
        [3, 7, 6, 2],
        [0, 4, 7, 3],
        [1, 2, 6, 5],
    ];
    let triangles = faces
        .iter()
        .flat_map(|[a, b, c, d]| {
            [
                Triangle::new([*a, *b, *c], Some(0)),
                Triangle::new([*a, *c, *d], Some(0)),
            ]
        })
        .collect();
    GeometryParams {
        vertices,
        triangles,
        surfaces: vec![surface],
        enable_diffraction: true,
        enable_diffraction_on_boundary_edges: false,
    }
}

/// A square in the XY plane at z = 0.
fn wall_mesh(half_size: f32) -> GeometryParams {
    let s = half_size;
    GeometryParams {
        vertices: vec![
            Vec3::new(-s, -s, 0.0),
            Vec3::new(s, -s, 0.0),
            Vec3::new(s, s, 0.0),
            Vec3::new(-s, s, 0.0),
        ],
        triangles: vec![
            Triangle::new([0, 1, 2], Some(0)),
            Triangle::new([0, 2, 3], Some(0)),
        ],
        surfaces: vec![AcousticSurface::CONCRETE.with_texture(AcousticTextureId(7))],
        enable_diffraction: true,
        enable_diffraction_on_boundary_edges: false,
    }
}

fn door_params(enabled: bool) -> PortalParams {
    PortalParams {
        transform: Transform::new(Vec3::new(5.0, 0.0, 0.0), Vec3::X, Vec3::Y),
        extent: Vec3::new(1.0, 1.5, 0.5),
        enabled,
        front_room: HALL,
        back_room: KITCHEN,
        ..Default::default()
    }
}

/// Kitchen (x < 5) and hall (x > 5) joined by a door, emitter in the kitchen, listener in
/// the hall.
fn two_rooms() -> PropagationEngine {
    let engine = engine();
    engine.set_room(KITCHEN, RoomParams::default(), Some("kitchen")).unwrap();
    engine.set_room(HALL, RoomParams::default(), Some("hall")).unwrap();
    engine.set_portal(DOOR, door_params(true), Some("door")).unwrap();

    engine.register_emitter(EMITTER).unwrap();
    engine.register_listener(LISTENER).unwrap();
    place(&engine, EMITTER, Vec3::new(2.0, 0.0, 0.0));
    engine.set_game_object_in_room(EMITTER, KITCHEN).unwrap();
    place(&engine, LISTENER, Vec3::new(8.0, 0.0, 0.5));
    engine.set_game_object_in_room(LISTENER, HALL).unwrap();
    engine
}

/// Emitter and listener outdoors on either side of a solid box.
fn solid_box(surface: AcousticSurface) -> PropagationEngine {
    let engine = engine();
    engine
        .set_geometry(
            GeometrySetId(1),
            box_mesh(Vec3::splat(-1.0), Vec3::splat(1.0), surface),
        )
        .unwrap();
    engine
        .set_geometry_instance(
            SceneEntityId(50),
            GeometryInstanceParams::new(GeometrySetId(1)).solid(true),
        )
        .unwrap();
    engine.register_emitter(EMITTER).unwrap();
    engine.register_listener(LISTENER).unwrap();
    place(&engine, EMITTER, Vec3::new(-5.0, 0.2, 0.3));
    place(&engine, LISTENER, Vec3::new(5.0, 0.2, 0.3));
    engine
}

#[test]
fn test_same_room_direct_path() {
    let engine = engine();
    engine.register_emitter(EMITTER).unwrap();
    engine.register_listener(LISTENER).unwrap();
    place(&engine, EMITTER, Vec3::new(0.0, 0.0, 0.0));
    place(&engine, LISTENER, Vec3::new(3.0, 0.0, 4.0));
    engine.tick().unwrap();

    let query = engine.query_diffraction_paths(EMITTER, 0).unwrap();
    assert_eq!(query.listener, LISTENER);
    assert_eq!(query.paths.len(), 1);
    let path = &query.paths[0];
    assert!(path.is_direct());
    assert!(path.nodes.is_empty());
    assert_eq!(path.transmission_loss, 0.0);
    assert_eq!(path.diffraction, 0.0);
    assert!((path.length - 5.0).abs() < 1e-4);
}

#[test]
fn test_path_through_open_door() {
    let engine = two_rooms();
    engine.tick().unwrap();

    assert_eq!(engine.room_of(EMITTER).unwrap(), KITCHEN);
    assert_eq!(engine.room_of(LISTENER).unwrap(), HALL);

    // The rooms' walls block everything but the door
    let query = engine.query_diffraction_paths(EMITTER, 0).unwrap();
    assert_eq!(query.paths.len(), 1);
    let path = &query.paths[0];
    assert_eq!(path.nodes.len(), 1);
    assert_eq!(path.nodes[0].feature.portal(), Some(DOOR));
    assert_eq!(path.nodes[0].emitter_side_room, KITCHEN);
    assert_eq!(path.nodes[0].listener_side_room, HALL);
    assert!(path.diffraction >= 0.0 && path.diffraction < 1.0);

    let wet = engine.query_wet_diffraction(DOOR).unwrap();
    assert!(wet > 0.0 && wet <= 1.0);
    assert_eq!(engine.portal_name(DOOR).unwrap().as_deref(), Some("door"));
    assert_eq!(engine.room_name(HALL).unwrap().as_deref(), Some("hall"));
}

#[test]
fn test_closed_door_blocks_sound() {
    let engine = two_rooms();
    engine.tick().unwrap();
    assert_eq!(engine.query_diffraction_paths(EMITTER, 0).unwrap().paths.len(), 1);

    engine.set_portal(DOOR, door_params(false), Some("door")).unwrap();
    engine.tick().unwrap();
    assert!(engine.query_diffraction_paths(EMITTER, 0).unwrap().paths.is_empty());

    engine.set_portal(DOOR, door_params(true), Some("door")).unwrap();
    engine.tick().unwrap();
    assert_eq!(engine.query_diffraction_paths(EMITTER, 0).unwrap().paths.len(), 1);
}

#[test]
fn test_wall_transmission_between_rooms() {
    let engine = two_rooms();
    let thin_walls = RoomParams {
        transmission_loss: 0.4,
        ..Default::default()
    };
    engine.set_room(KITCHEN, thin_walls.clone(), Some("kitchen")).unwrap();
    engine.set_room(HALL, thin_walls, Some("hall")).unwrap();
    engine.tick().unwrap();

    let query = engine.query_diffraction_paths(EMITTER, 0).unwrap();
    let direct = query.paths.iter().find(|p| p.is_direct()).unwrap();
    assert!((direct.transmission_loss - 0.4).abs() < 1e-5);
    assert!(query.paths.iter().any(|p| p.portals().any(|portal| portal == DOOR)));
}

#[test]
fn test_solid_box_transmission() {
    let engine = solid_box(AcousticSurface::new(0.5));
    engine.set_max_diffraction_paths(EMITTER, 64).unwrap();
    engine.set_transmission_operation(TransmissionOperation::Max).unwrap();
    let (sink, updates) = ChannelSink::channel();
    engine.set_output_sink(Box::new(sink)).unwrap();
    engine.tick().unwrap();

    let query = engine.query_diffraction_paths(EMITTER, 0).unwrap();
    let direct = query.paths.iter().find(|p| p.is_direct()).unwrap();
    // Entry and exit of the solid count once
    assert!((direct.transmission_loss - 0.5).abs() < 1e-5);

    let pushed: Vec<EmitterPropagation> = updates
        .try_iter()
        .filter_map(|update| match update {
            OutputUpdate::Emitter(propagation) => Some(propagation),
            _ => None,
        })
        .collect();
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0].emitter, EMITTER);
    assert_eq!(pushed[0].listener, LISTENER);
    assert!(pushed[0].recomputed);
    assert!((pushed[0].transmission_loss - 0.5).abs() < 1e-5);
    assert!(!pushed[0].virtual_sources.is_empty());
}

#[test]
fn test_diffraction_path_ceiling() {
    let engine = engine();
    let mut screen = wall_mesh(1.0);
    screen.enable_diffraction_on_boundary_edges = true;
    engine.set_geometry(GeometrySetId(1), screen).unwrap();
    engine
        .set_geometry_instance(SceneEntityId(50), GeometryInstanceParams::new(GeometrySetId(1)))
        .unwrap();
    engine.register_emitter(EMITTER).unwrap();
    engine.register_listener(LISTENER).unwrap();
    place(&engine, EMITTER, Vec3::new(0.2, 0.3, -3.0));
    place(&engine, LISTENER, Vec3::new(0.2, 0.3, 1.0));
    engine.set_number_of_primary_rays(200).unwrap();
    engine.set_max_diffraction_paths(EMITTER, 64).unwrap();
    engine.tick().unwrap();

    // Through the screen, plus around its rim
    let unlimited = engine.query_diffraction_paths(EMITTER, 0).unwrap().paths;
    assert!(unlimited.len() > 1);
    assert!(unlimited.iter().any(|p| p.is_direct()));
    assert!(unlimited.iter().any(|p| !p.nodes.is_empty()));

    engine.set_max_diffraction_paths(EMITTER, 1).unwrap();
    engine.tick().unwrap();
    let limited = engine.query_diffraction_paths(EMITTER, 0).unwrap().paths;
    assert_eq!(limited.len(), 1);
    // The survivor is the most prominent one
    assert_eq!(limited[0].key(), unlimited[0].key());
}

#[test]
fn test_global_reflection_ceiling() {
    let engine = engine();
    engine.set_geometry(GeometrySetId(1), wall_mesh(20.0)).unwrap();
    engine
        .set_geometry_instance(SceneEntityId(50), GeometryInstanceParams::new(GeometrySetId(1)))
        .unwrap();
    engine.register_emitter(EMITTER).unwrap();
    engine.register_listener(LISTENER).unwrap();
    place(&engine, EMITTER, Vec3::new(-2.0, 0.0, 3.0));
    place(&engine, LISTENER, Vec3::new(2.0, 0.0, 3.0));
    engine.tick().unwrap();

    let before = engine.query_reflection_paths(EMITTER, 0).unwrap().paths;
    for path in &before {
        assert!(path.reflection_count() >= 1);
        assert!(path.length >= 4.0);
    }

    engine.set_max_global_reflection_paths(0).unwrap();
    engine.set_reflections_order(1, true).unwrap();
    engine.tick().unwrap();
    assert!(engine.query_reflection_paths(EMITTER, 0).unwrap().paths.is_empty());
}

#[test]
fn test_remove_geometry_drops_instances() {
    let engine = solid_box(AcousticSurface::CONCRETE);
    engine.tick().unwrap();
    assert_eq!(engine.scene_snapshot().unwrap().geometry().instance_count(), 1);

    engine.remove_geometry(GeometrySetId(1)).unwrap();
    // The instance ID is free again
    engine.register_emitter(SceneEntityId(50)).unwrap();
    engine.tick().unwrap();

    let scene = engine.scene_snapshot().unwrap();
    assert_eq!(scene.geometry().instance_count(), 0);
    assert_eq!(scene.geometry().geometry_count(), 0);

    // Nothing left between emitter and listener
    let query = engine.query_diffraction_paths(EMITTER, 0).unwrap();
    assert_eq!(query.paths.len(), 1);
    assert_eq!(query.paths[0].transmission_loss, 0.0);
}

#[test]
fn test_room_added_then_removed() {
    let engine = engine();
    engine.tick().unwrap();
    let rooms_before = engine.scene_snapshot().unwrap().rooms().room_count();

    engine.set_room(SceneEntityId(5), RoomParams::default(), None).unwrap();
    engine.remove_room(SceneEntityId(5)).unwrap();
    engine.tick().unwrap();

    assert_eq!(engine.scene_snapshot().unwrap().rooms().room_count(), rooms_before);
    assert!(engine.room_name(SceneEntityId(5)).unwrap_err().is_not_found());
}

#[test]
fn test_multiple_positions() {
    let engine = engine();
    engine.register_emitter(EMITTER).unwrap();
    engine.register_listener(LISTENER).unwrap();
    engine
        .set_multiple_positions(
            EMITTER,
            &[
                Transform::from_position(Vec3::new(1.0, 0.0, 0.0)),
                Transform::from_position(Vec3::new(0.0, 0.0, 4.0)),
            ],
        )
        .unwrap();
    place(&engine, LISTENER, Vec3::ZERO);
    engine.tick().unwrap();

    let first = engine.query_diffraction_paths(EMITTER, 0).unwrap();
    let second = engine.query_diffraction_paths(EMITTER, 1).unwrap();
    assert!((first.paths[0].length - 1.0).abs() < 1e-4);
    assert!((second.paths[0].length - 4.0).abs() < 1e-4);
    assert_eq!(second.emitter_position, Vec3::new(0.0, 0.0, 4.0));
    assert!(
        engine
            .query_diffraction_paths(EMITTER, 2)
            .unwrap_err()
            .is_not_found()
    );
}

#[test]
fn test_id_collisions_and_unknown_ids() {
    let engine = engine();
    engine.set_room(KITCHEN, RoomParams::default(), None).unwrap();
    assert!(matches!(
        engine.register_emitter(KITCHEN),
        Err(PropagationError::IdCollision { .. })
    ));
    engine.register_emitter(EMITTER).unwrap();
    assert!(matches!(
        engine.set_room(EMITTER, RoomParams::default(), None),
        Err(PropagationError::IdCollision { .. })
    ));

    assert!(engine.remove_room(SceneEntityId(77)).unwrap_err().is_not_found());
    assert!(engine.remove_portal(SceneEntityId(77)).unwrap_err().is_not_found());
    assert!(engine.remove_geometry(GeometrySetId(9)).unwrap_err().is_not_found());
    assert!(
        engine
            .set_position(SceneEntityId(77), Transform::identity())
            .unwrap_err()
            .is_not_found()
    );
    assert!(
        engine
            .query_wet_diffraction(SceneEntityId(77))
            .unwrap_err()
            .is_not_found()
    );
    assert!(
        engine
            .remove_room(SceneEntityId::OUTDOORS)
            .unwrap_err()
            .is_invalid_parameter()
    );
}

#[test]
fn test_unregistered_listener_stops_pushes() {
    let engine = engine();
    engine.register_emitter(EMITTER).unwrap();
    engine.register_listener(LISTENER).unwrap();
    place(&engine, EMITTER, Vec3::ZERO);
    place(&engine, LISTENER, Vec3::new(2.0, 0.0, 0.0));
    let (sink, updates) = ChannelSink::channel();
    engine.set_output_sink(Box::new(sink)).unwrap();
    engine.tick().unwrap();
    assert!(
        updates
            .try_iter()
            .any(|u| matches!(u, OutputUpdate::Emitter(_)))
    );

    engine.unregister_game_object(LISTENER).unwrap();
    engine.tick().unwrap();
    let after: Vec<OutputUpdate> = updates.try_iter().collect();
    assert!(!after.iter().any(|u| matches!(u, OutputUpdate::Emitter(_))));
    assert!(after.contains(&OutputUpdate::TickFinished(2)));
    assert!(engine.query_diffraction_paths(EMITTER, 0).unwrap_err().is_not_found());
}
