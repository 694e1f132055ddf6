use anyhow::Result;
use petalsonic_propagation::*;
use std::time::Duration;

const KITCHEN: SceneEntityId = SceneEntityId(1);
const HALL: SceneEntityId = SceneEntityId(2);
const DOOR: SceneEntityId = SceneEntityId(100);
const WALL: SceneEntityId = SceneEntityId(50);
const RADIO: SceneEntityId = SceneEntityId(10);
const PLAYER: SceneEntityId = SceneEntityId(11);

/// A 10 x 4 m wall in the plane x = 5 with the door cut out by the portal.
fn wall() -> GeometryParams {
    GeometryParams {
        vertices: vec![
            Vec3::new(0.0, -2.0, -5.0),
            Vec3::new(0.0, -2.0, 5.0),
            Vec3::new(0.0, 2.0, 5.0),
            Vec3::new(0.0, 2.0, -5.0),
        ],
        triangles: vec![
            Triangle::new([0, 1, 2], Some(0)),
            Triangle::new([0, 2, 3], Some(0)),
        ],
        surfaces: vec![AcousticSurface::BRICK.with_name("brick")],
        enable_diffraction: true,
        enable_diffraction_on_boundary_edges: true,
    }
}

fn build_scene(engine: &PropagationEngine) -> Result<()> {
    engine.set_room(KITCHEN, RoomParams::default(), Some("kitchen"))?;
    engine.set_room(HALL, RoomParams::default(), Some("hall"))?;
    engine.set_geometry(GeometrySetId(1), wall())?;
    engine.set_geometry_instance(
        WALL,
        GeometryInstanceParams::new(GeometrySetId(1))
            .with_transform(Transform::from_position(Vec3::new(5.0, 0.0, 0.0))),
    )?;
    engine.set_portal(
        DOOR,
        PortalParams {
            transform: Transform::new(Vec3::new(5.0, 0.0, 0.0), Vec3::X, Vec3::Y),
            extent: Vec3::new(1.0, 1.5, 0.5),
            front_room: HALL,
            back_room: KITCHEN,
            ..Default::default()
        },
        Some("door"),
    )?;

    engine.register_emitter(RADIO)?;
    engine.register_listener(PLAYER)?;
    engine.set_position(RADIO, Transform::from_position(Vec3::new(2.0, 0.0, 1.0)))?;
    engine.set_game_object_in_room(RADIO, KITCHEN)?;
    engine.set_smoothing_constant(None, 50.0)?;
    Ok(())
}

/// Where the player stands at `step`: walking from the hall through the door into the
/// kitchen.
fn player_position(step: u32) -> Vec3 {
    let x = 9.0 - step as f32 * 0.5;
    Vec3::new(x, 0.0, 0.5)
}

fn player_room(position: Vec3) -> SceneEntityId {
    if position.x > 5.0 { HALL } else { KITCHEN }
}

fn log_paths(engine: &PropagationEngine) -> Result<()> {
    let query = engine.query_diffraction_paths(RADIO, 0)?;
    log::info!(
        "Player at {:?} hears the radio over {} paths",
        query.listener_position,
        query.paths.len()
    );
    for path in &query.paths {
        let via: Vec<String> = path
            .nodes
            .iter()
            .map(|node| match node.feature.portal() {
                Some(portal) => format!("portal {}", portal),
                None => "edge".to_string(),
            })
            .collect();
        log::info!(
            "  {:.2} m, diffraction {:.2}, transmission loss {:.2}, via [{}]",
            path.length,
            path.diffraction,
            path.transmission_loss,
            via.join(", ")
        );
    }
    let reflections = engine.query_reflection_paths(RADIO, 0)?;
    log::info!("  {} reflection paths", reflections.paths.len());
    Ok(())
}

fn log_events(engine: &PropagationEngine) {
    for event in engine.poll_events() {
        match event {
            PropagationEvent::RoomChanged {
                game_object,
                from,
                to,
            } => log::info!("Game object {} moved from room {} to {}", game_object, from, to),
            PropagationEvent::GeometryDegraded { instance } => {
                log::error!("Geometry instance {} degraded", instance)
            }
            PropagationEvent::SpreadAdjusted { spread } => {
                log::info!("Load balancing spread is now {}", spread)
            }
            PropagationEvent::TickCompleted { timing } => log::debug!(
                "Tick {}: {} us ({} recomputed, {} extrapolated)",
                timing.frame,
                timing.total_time_us,
                timing.recomputed,
                timing.extrapolated
            ),
        }
    }
}

/// Ticks on this thread, one step of the walk per tick.
pub fn run_walkthrough() -> Result<()> {
    log::info!("=== Walking from the hall into the kitchen ===");
    let engine = PropagationEngine::new(PropagationDesc::default())?;
    build_scene(&engine)?;

    let (sink, updates) = ChannelSink::channel();
    engine.set_output_sink(Box::new(sink))?;

    for step in 0..=12 {
        let position = player_position(step);
        engine.set_position(PLAYER, Transform::from_position(position))?;
        engine.set_game_object_in_room(PLAYER, player_room(position))?;
        engine.tick()?;

        log_events(&engine);
        log_paths(&engine)?;
        for update in updates.try_iter() {
            match update {
                OutputUpdate::Emitter(propagation) => log::info!(
                    "  mixer: {} virtual sources, direct transmission loss {:.2}",
                    propagation.virtual_sources.len(),
                    propagation.transmission_loss
                ),
                OutputUpdate::Portal(portal) => log::info!(
                    "  mixer: portal {} wet diffraction {:.2}, bleed {:.2}",
                    portal.portal,
                    portal.wet_diffraction,
                    portal.bleed_gain
                ),
                OutputUpdate::TickFinished(_) => {}
            }
        }
    }

    log::info!("Closing the door");
    engine.set_portal(
        DOOR,
        PortalParams {
            transform: Transform::new(Vec3::new(5.0, 0.0, 0.0), Vec3::X, Vec3::Y),
            extent: Vec3::new(1.0, 1.5, 0.5),
            enabled: false,
            front_room: HALL,
            back_room: KITCHEN,
            ..Default::default()
        },
        Some("door"),
    )?;
    engine.set_position(PLAYER, Transform::from_position(player_position(0)))?;
    engine.set_game_object_in_room(PLAYER, HALL)?;
    engine.tick()?;
    log_events(&engine);
    log_paths(&engine)?;
    Ok(())
}

/// Lets the engine tick on its own thread while this thread moves the player.
pub fn run_threaded() -> Result<()> {
    log::info!("=== Ticking on the engine thread ===");
    let mut engine = PropagationEngine::new(PropagationDesc::default())?;
    build_scene(&engine)?;
    engine.set_position(PLAYER, Transform::from_position(player_position(0)))?;
    engine.set_game_object_in_room(PLAYER, HALL)?;
    engine.start()?;

    for step in 0..=12 {
        let position = player_position(step);
        engine.set_position(PLAYER, Transform::from_position(position))?;
        engine.set_game_object_in_room(PLAYER, player_room(position))?;
        std::thread::sleep(Duration::from_millis(100));
        log_events(&engine);
    }

    engine.stop()?;
    log_paths(&engine)?;
    log::info!("Ran {} ticks", engine.frame()?);
    Ok(())
}
