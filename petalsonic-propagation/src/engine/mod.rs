//! The public propagation API.

mod registry;
mod tick;

use crate::commands::{EngineCommand, ObjectCommand, ParamCommand, SceneCommand};
use crate::config::{
    GeometryInstanceParams, GeometryParams, PortalParams, PropagationDesc, RoomParams,
    TransmissionOperation, validate_diffraction_order, validate_load_balancing_spread,
    validate_reflection_order, validate_smoothing_constant,
};
use crate::error::{PropagationError, Result};
use crate::events::{PropagationEvent, TickTimingEvent};
use crate::id::{GeometrySetId, SceneEntityId};
use crate::jobs::{InlineExecutor, JobExecutor, ThreadPoolExecutor};
use crate::math::{Transform, Vec3};
use crate::output::{DiffractionPath, OutputSink, ReflectionPath};
use crate::scene::Scene;
use crossbeam_channel::{Receiver, Sender};
use registry::Registry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tick::TickState;

/// Events kept for the host between polls; older ones are dropped when it falls behind.
const EVENT_CAPACITY: usize = 1024;

/// Snapshot returned by the debug path queries.
#[derive(Debug, Clone, PartialEq)]
pub struct PathQuery<T> {
    /// Listener the paths were computed for
    pub listener: SceneEntityId,
    pub emitter_position: Vec3,
    pub listener_position: Vec3,
    pub paths: Vec<T>,
}

struct Shared {
    registry: Mutex<Registry>,
    command_sender: Sender<EngineCommand>,
    command_receiver: Receiver<EngineCommand>,
    event_sender: Sender<PropagationEvent>,
    event_receiver: Receiver<PropagationEvent>,
    /// Held for the duration of a tick; debug queries lock it to synchronize with tick
    /// boundaries
    tick: Mutex<TickState>,
}

impl Shared {
    fn lock_tick(&self) -> Result<MutexGuard<'_, TickState>> {
        self.tick
            .lock()
            .map_err(|_| PropagationError::Engine("Tick state lock poisoned".into()))
    }

    fn tick(&self) -> Result<TickTimingEvent> {
        let mut state = self.lock_tick()?;
        let commands: Vec<EngineCommand> = self.command_receiver.try_iter().collect();
        let mut events = Vec::new();
        let timing = state.run(commands, &mut events);
        drop(state);
        for event in events {
            if self.event_sender.try_send(event).is_err() {
                log::trace!("Event queue full; dropping event");
            }
        }
        Ok(timing)
    }
}

/// The geometric sound-propagation engine.
///
/// `PropagationEngine` owns the scene (geometry, rooms and portals), the registered emitters
/// and listeners, and the per-pair propagation state. Mutating calls are validated at once
/// and applied at the start of the next tick, so every tick works on one consistent scene.
///
/// # Threading
///
/// - **API callers**: any thread; calls only take the short registry lock and queue a command
/// - **Tick**: either [`tick`](Self::tick) called by the host once per audio frame, or a
///   dedicated thread started with [`start`](Self::start)
/// - **Jobs**: listener scans and pair searches run on the [`JobExecutor`]
///
/// Several engines can coexist; nothing is global.
pub struct PropagationEngine {
    desc: PropagationDesc,
    shared: Arc<Shared>,
    is_running: Arc<AtomicBool>,
    tick_thread: Option<thread::JoinHandle<()>>,
}

impl PropagationEngine {
    /// Creates an engine with a worker pool of `desc.max_job_workers` threads.
    ///
    /// # Errors
    ///
    /// Returns [`PropagationError::Configuration`] when `desc` is invalid.
    pub fn new(desc: PropagationDesc) -> Result<Self> {
        desc.validate()?;
        let executor: Box<dyn JobExecutor> = if desc.max_job_workers > 1 {
            Box::new(ThreadPoolExecutor::new(desc.max_job_workers)?)
        } else {
            Box::new(InlineExecutor)
        };
        Self::with_executor(desc, executor)
    }

    /// Creates an engine that runs its jobs on `executor`, for example a
    /// [`HostJobExecutor`](crate::jobs::HostJobExecutor) borrowing the host's threads.
    pub fn with_executor(desc: PropagationDesc, executor: Box<dyn JobExecutor>) -> Result<Self> {
        desc.validate()?;
        let (command_sender, command_receiver) = crossbeam_channel::unbounded();
        let (event_sender, event_receiver) = crossbeam_channel::bounded(EVENT_CAPACITY);
        log::info!(
            "Propagation engine: {} Hz, {} frames, {} rays, reflection order {}, diffraction order {}",
            desc.sample_rate,
            desc.frame_size,
            desc.num_primary_rays,
            desc.reflection_order,
            desc.diffraction_order
        );
        let shared = Shared {
            registry: Mutex::new(Registry::new()),
            command_sender,
            command_receiver,
            event_sender,
            event_receiver,
            tick: Mutex::new(TickState::new(desc.clone(), executor)),
        };
        Ok(Self {
            desc,
            shared: Arc::new(shared),
            is_running: Arc::new(AtomicBool::new(false)),
            tick_thread: None,
        })
    }

    /// The settings the engine was created with. Runtime tuning calls do not change them.
    pub fn desc(&self) -> &PropagationDesc {
        &self.desc
    }

    fn registry(&self) -> Result<MutexGuard<'_, Registry>> {
        self.shared
            .registry
            .lock()
            .map_err(|_| PropagationError::Engine("Registry lock poisoned".into()))
    }

    fn send(&self, command: impl Into<EngineCommand>) -> Result<()> {
        self.shared
            .command_sender
            .send(command.into())
            .map_err(|e| PropagationError::Engine(format!("Failed to queue command: {}", e)))
    }

    /// Validates a call against the registry and queues its command, both under the registry
    /// lock so commands reach the tick in call order.
    fn submit<F>(&self, command: impl Into<EngineCommand>, validate: F) -> Result<()>
    where
        F: FnOnce(&mut Registry) -> Result<()>,
    {
        let mut registry = self.registry()?;
        validate(&mut registry)?;
        self.send(command)
    }

    // Geometry

    /// Creates or replaces a geometry set. Its data is copied; instances of a replaced set
    /// are rebuilt.
    ///
    /// # Errors
    ///
    /// Returns [`PropagationError::InvalidParameter`] for out-of-range indices or invalid
    /// surfaces.
    pub fn set_geometry(&self, id: GeometrySetId, params: GeometryParams) -> Result<()> {
        let mut registry = self.registry()?;
        registry.set_geometry(id, &params)?;
        self.send(SceneCommand::SetGeometry {
            id,
            params: Box::new(params),
        })
    }

    /// Removes a geometry set and every instance placed from it.
    pub fn remove_geometry(&self, id: GeometrySetId) -> Result<()> {
        self.submit(SceneCommand::RemoveGeometry(id), |r| {
            r.remove_geometry(id).map(|instances| {
                log::debug!(
                    "Geometry set {} removed with {} instances",
                    id,
                    instances.len()
                );
            })
        })
    }

    /// Places a geometry set in the scene, or updates the placement.
    ///
    /// # Errors
    ///
    /// - [`PropagationError::NotFound`] if the geometry set does not exist
    /// - [`PropagationError::IdCollision`] if `id` is used by a room, portal or game object
    pub fn set_geometry_instance(
        &self,
        id: SceneEntityId,
        params: GeometryInstanceParams,
    ) -> Result<()> {
        let mut registry = self.registry()?;
        registry.set_instance(id, &params)?;
        self.send(SceneCommand::SetGeometryInstance { id, params })
    }

    pub fn remove_geometry_instance(&self, id: SceneEntityId) -> Result<()> {
        self.submit(SceneCommand::RemoveGeometryInstance(id), |r| {
            r.remove_instance(id)
        })
    }

    // Rooms and portals

    /// Creates or updates a room. Setting [`SceneEntityId::OUTDOORS`] re-parameterises the
    /// outdoors room.
    pub fn set_room(&self, id: SceneEntityId, params: RoomParams, name: Option<&str>) -> Result<()> {
        let mut registry = self.registry()?;
        registry.set_room(id, &params)?;
        self.send(SceneCommand::SetRoom {
            id,
            params,
            name: name.map(str::to_owned),
        })
    }

    /// Removes a room. A room still referenced by a portal or reverb zone falls back to
    /// default parameters instead of disappearing.
    ///
    /// # Errors
    ///
    /// - [`PropagationError::InvalidParameter`] for the outdoors room
    /// - [`PropagationError::NotFound`] if no such room exists
    pub fn remove_room(&self, id: SceneEntityId) -> Result<()> {
        self.submit(SceneCommand::RemoveRoom(id), |r| r.remove_room(id))
    }

    /// Creates or updates a portal. Missing front or back rooms are created with defaults.
    pub fn set_portal(
        &self,
        id: SceneEntityId,
        params: PortalParams,
        name: Option<&str>,
    ) -> Result<()> {
        let mut registry = self.registry()?;
        registry.set_portal(id, &params)?;
        self.send(SceneCommand::SetPortal {
            id,
            params,
            name: name.map(str::to_owned),
        })
    }

    pub fn remove_portal(&self, id: SceneEntityId) -> Result<()> {
        self.submit(SceneCommand::RemovePortal(id), |r| r.remove_portal(id))
    }

    /// Links `zone` into `parent` so sound and reverb flow between them without a portal.
    ///
    /// # Errors
    ///
    /// Returns [`PropagationError::InvalidParameter`] when the link would form a cycle.
    pub fn set_reverb_zone(
        &self,
        zone: SceneEntityId,
        parent: SceneEntityId,
        transition_width: f32,
    ) -> Result<()> {
        self.submit(
            SceneCommand::SetReverbZone {
                zone,
                parent,
                transition_width,
            },
            |r| r.set_reverb_zone(zone, parent, transition_width),
        )
    }

    pub fn remove_reverb_zone(&self, zone: SceneEntityId) -> Result<()> {
        self.submit(SceneCommand::RemoveReverbZone(zone), |r| {
            r.remove_reverb_zone(zone)
        })
    }

    // Game objects

    /// Registers an emitter. Its load-balancing slot is its registration order.
    pub fn register_emitter(&self, id: SceneEntityId) -> Result<()> {
        self.submit(ObjectCommand::RegisterEmitter(id), |r| r.register_emitter(id))
    }

    /// Registers a listener. The first listener registered is the spatial audio listener,
    /// used for wet diffraction.
    pub fn register_listener(&self, id: SceneEntityId) -> Result<()> {
        self.submit(ObjectCommand::RegisterListener(id), |r| {
            r.register_listener(id)
        })
    }

    pub fn unregister_game_object(&self, id: SceneEntityId) -> Result<()> {
        self.submit(ObjectCommand::Unregister(id), |r| r.unregister(id))
    }

    /// Restricts the listeners an emitter is heard by. Without a call the emitter is heard by
    /// every registered listener.
    pub fn set_listeners(&self, emitter: SceneEntityId, listeners: &[SceneEntityId]) -> Result<()> {
        self.submit(
            ObjectCommand::SetListeners {
                emitter,
                listeners: listeners.to_vec(),
            },
            |r| {
                r.check_emitter(emitter)?;
                listeners.iter().try_for_each(|l| r.check_listener(*l))
            },
        )
    }

    /// Sets the position and orientation of a game object.
    pub fn set_position(&self, id: SceneEntityId, transform: Transform) -> Result<()> {
        self.set_multiple_positions(id, &[transform])
    }

    /// Gives an emitter several positions; each gets its own paths. Listeners use the first.
    ///
    /// # Errors
    ///
    /// - [`PropagationError::InvalidParameter`] for an empty list or an invalid orientation
    /// - [`PropagationError::NotFound`] if `id` is not a registered game object
    pub fn set_multiple_positions(&self, id: SceneEntityId, transforms: &[Transform]) -> Result<()> {
        if transforms.is_empty() {
            return Err(PropagationError::InvalidParameter(format!(
                "game object {} needs at least one position",
                id
            )));
        }
        transforms.iter().try_for_each(Transform::validate)?;
        self.submit(
            ObjectCommand::SetPositions {
                id,
                positions: transforms.to_vec(),
            },
            |r| r.check_game_object(id),
        )
    }

    /// Pins a game object to `room`, overriding containment from room bounds.
    pub fn set_game_object_in_room(&self, id: SceneEntityId, room: SceneEntityId) -> Result<()> {
        self.submit(ObjectCommand::SetInRoom { id, room }, |r| {
            r.check_game_object(id)?;
            r.check_room(room)
        })
    }

    pub fn unset_game_object_in_room(&self, id: SceneEntityId) -> Result<()> {
        self.submit(ObjectCommand::UnsetInRoom(id), |r| r.check_game_object(id))
    }

    /// Room the game object was in at the last tick. Outdoors before its first tick.
    pub fn room_of(&self, id: SceneEntityId) -> Result<SceneEntityId> {
        self.registry()?.check_game_object(id)?;
        let state = self.shared.lock_tick()?;
        Ok(state.room_of(id).unwrap_or(SceneEntityId::OUTDOORS))
    }

    // Runtime tuning, applied at the next tick

    /// Sets the reflection order. With `invalidate`, every pair is searched again at the next
    /// tick instead of waiting for its slot.
    pub fn set_reflections_order(&self, order: u32, invalidate: bool) -> Result<()> {
        validate_reflection_order(order)?;
        self.send(ParamCommand::SetReflectionsOrder { order, invalidate })
    }

    pub fn set_diffraction_order(&self, order: u32, invalidate: bool) -> Result<()> {
        validate_diffraction_order(order)?;
        self.send(ParamCommand::SetDiffractionOrder { order, invalidate })
    }

    /// Caps the diffraction paths kept for one emitter.
    pub fn set_max_diffraction_paths(&self, emitter: SceneEntityId, max_paths: usize) -> Result<()> {
        self.submit(
            ParamCommand::SetMaxDiffractionPaths { emitter, max_paths },
            |r| r.check_emitter(emitter),
        )
    }

    /// Caps the reflection paths kept across all emitters.
    pub fn set_max_global_reflection_paths(&self, max_paths: usize) -> Result<()> {
        self.send(ParamCommand::SetMaxGlobalReflectionPaths(max_paths))
    }

    pub fn set_number_of_primary_rays(&self, rays: u32) -> Result<()> {
        if rays == 0 {
            return Err(PropagationError::InvalidParameter(
                "number of primary rays must be at least 1".into(),
            ));
        }
        self.send(ParamCommand::SetNumberOfPrimaryRays(rays))
    }

    pub fn set_load_balancing_spread(&self, spread: u32) -> Result<()> {
        validate_load_balancing_spread(spread)?;
        self.send(ParamCommand::SetLoadBalancingSpread(spread))
    }

    /// Sets the smoothing time constant in milliseconds for one emitter, or the global one
    /// when `emitter` is `None`. Zero disables smoothing.
    pub fn set_smoothing_constant(&self, emitter: Option<SceneEntityId>, time_ms: f32) -> Result<()> {
        validate_smoothing_constant(time_ms)?;
        self.submit(
            ParamCommand::SetSmoothingConstant { emitter, time_ms },
            |r| match emitter {
                Some(emitter) => r.check_emitter(emitter),
                None => Ok(()),
            },
        )
    }

    pub fn set_transmission_operation(&self, operation: TransmissionOperation) -> Result<()> {
        self.send(ParamCommand::SetTransmissionOperation(operation))
    }

    // Output

    /// Installs the receiver of per-tick results, replacing any previous one.
    pub fn set_output_sink(&self, sink: Box<dyn OutputSink>) -> Result<()> {
        self.shared.lock_tick()?.sink = Some(sink);
        Ok(())
    }

    /// Replaces the executor that runs scans and searches.
    pub fn set_job_executor(&self, executor: Box<dyn JobExecutor>) -> Result<()> {
        self.shared.lock_tick()?.executor = executor;
        Ok(())
    }

    /// Drains the events raised since the last poll.
    pub fn poll_events(&self) -> Vec<PropagationEvent> {
        self.shared.event_receiver.try_iter().collect()
    }

    // Ticking

    /// Runs one tick on the calling thread: applies queued commands, then recomputes,
    /// extrapolates and publishes propagation.
    pub fn tick(&self) -> Result<TickTimingEvent> {
        self.shared.tick()
    }

    /// Ticks once per audio frame on a dedicated thread until [`stop`](Self::stop).
    pub fn start(&mut self) -> Result<()> {
        if self.is_running.load(Ordering::Relaxed) {
            return Ok(());
        }
        self.is_running.store(true, Ordering::Relaxed);
        let shared = Arc::clone(&self.shared);
        let is_running = Arc::clone(&self.is_running);
        let frame = Duration::from_secs_f32(self.desc.frame_duration_ms() / 1000.0);

        let handle = thread::Builder::new()
            .name("propagation-tick".into())
            .spawn(move || {
                while is_running.load(Ordering::Relaxed) {
                    let started = Instant::now();
                    if let Err(e) = shared.tick() {
                        log::error!("Propagation tick failed: {}", e);
                        break;
                    }
                    if let Some(rest) = frame.checked_sub(started.elapsed()) {
                        thread::sleep(rest);
                    }
                }
                is_running.store(false, Ordering::Relaxed);
            })
            .map_err(|e| {
                self.is_running.store(false, Ordering::Relaxed);
                PropagationError::Engine(format!("Failed to spawn tick thread: {}", e))
            })?;
        self.tick_thread = Some(handle);
        log::info!("Propagation tick thread started ({:?} per frame)", frame);
        Ok(())
    }

    /// Stops the dedicated tick thread and waits for its last tick.
    pub fn stop(&mut self) -> Result<()> {
        self.is_running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.tick_thread.take() {
            handle
                .join()
                .map_err(|_| PropagationError::Engine("Tick thread panicked".into()))?;
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }

    /// Number of ticks run so far.
    pub fn frame(&self) -> Result<u64> {
        Ok(self.shared.lock_tick()?.frame)
    }

    /// Current load-balancing spread, as adjusted by the adaptive controller.
    pub fn load_balancing_spread(&self) -> Result<u32> {
        Ok(self.shared.lock_tick()?.spread())
    }

    // Debug queries. They wait for a running tick to finish; never call them from a sink.

    /// Diffraction paths of one emitter position for the first registered listener that
    /// hears it, ranked best first.
    ///
    /// # Errors
    ///
    /// Returns [`PropagationError::NotFound`] if `emitter` is not registered or nothing has
    /// been computed for that position yet.
    pub fn query_diffraction_paths(
        &self,
        emitter: SceneEntityId,
        position_index: usize,
    ) -> Result<PathQuery<DiffractionPath>> {
        self.registry()?.check_emitter(emitter)?;
        self.shared
            .lock_tick()?
            .query_diffraction(emitter, position_index)
            .ok_or_else(|| not_computed(emitter, position_index))
    }

    pub fn query_reflection_paths(
        &self,
        emitter: SceneEntityId,
        position_index: usize,
    ) -> Result<PathQuery<ReflectionPath>> {
        self.registry()?.check_emitter(emitter)?;
        self.shared
            .lock_tick()?
            .query_reflection(emitter, position_index)
            .ok_or_else(|| not_computed(emitter, position_index))
    }

    /// Wet diffraction of a portal for the spatial audio listener: 0 inside the portal,
    /// growing as the listener leaves the opening's axis.
    pub fn query_wet_diffraction(&self, portal: SceneEntityId) -> Result<f32> {
        self.registry()?.check_portal(portal)?;
        self.shared
            .lock_tick()?
            .wet_diffraction(portal)
            .ok_or_else(|| {
                PropagationError::NotFound(format!(
                    "wet diffraction of portal {}: no positioned listener, or not ticked yet",
                    portal
                ))
            })
    }

    /// Name given to a room, once applied.
    pub fn room_name(&self, id: SceneEntityId) -> Result<Option<String>> {
        self.registry()?.check_room(id)?;
        let state = self.shared.lock_tick()?;
        Ok(state.scene.rooms().room(id).and_then(|r| r.name.clone()))
    }

    pub fn portal_name(&self, id: SceneEntityId) -> Result<Option<String>> {
        self.registry()?.check_portal(id)?;
        let state = self.shared.lock_tick()?;
        Ok(state.scene.rooms().portal(id).and_then(|p| p.name.clone()))
    }

    /// The scene as of the last tick.
    pub fn scene_snapshot(&self) -> Result<Arc<Scene>> {
        Ok(Arc::clone(&self.shared.lock_tick()?.scene))
    }
}

impl Drop for PropagationEngine {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::warn!("{}", e);
        }
        // A sink may hold a channel whose receiver is gone by now
        let mut state = self.shared.tick.lock().unwrap_or_else(PoisonError::into_inner);
        state.sink = None;
    }
}

fn not_computed(emitter: SceneEntityId, position_index: usize) -> PropagationError {
    PropagationError::NotFound(format!(
        "no propagation computed for emitter {} position {}",
        emitter, position_index
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::quad_params;

    fn engine() -> PropagationEngine {
        PropagationEngine::with_executor(PropagationDesc::default(), Box::new(InlineExecutor))
            .unwrap()
    }

    #[test]
    fn test_invalid_desc_rejected() {
        let result = PropagationEngine::new(PropagationDesc {
            reflection_order: 9,
            ..Default::default()
        });
        assert!(matches!(result, Err(PropagationError::Configuration(_))));
    }

    #[test]
    fn test_mutations_apply_at_next_tick() {
        let engine = engine();
        engine
            .set_room(SceneEntityId(1), RoomParams::default(), Some("kitchen"))
            .unwrap();
        assert!(engine.scene_snapshot().unwrap().rooms().room(SceneEntityId(1)).is_none());
        // Known to the API already
        assert_eq!(engine.room_name(SceneEntityId(1)).unwrap(), None);

        engine.tick().unwrap();
        assert!(engine.scene_snapshot().unwrap().rooms().room(SceneEntityId(1)).is_some());
        assert_eq!(
            engine.room_name(SceneEntityId(1)).unwrap().as_deref(),
            Some("kitchen")
        );
    }

    #[test]
    fn test_rejections_are_synchronous() {
        let engine = engine();
        let err = engine
            .set_geometry_instance(
                SceneEntityId(3),
                GeometryInstanceParams::new(GeometrySetId(1)),
            )
            .unwrap_err();
        assert!(err.is_not_found());

        engine
            .set_geometry(GeometrySetId(1), quad_params(1.0, 1.0))
            .unwrap();
        engine.register_emitter(SceneEntityId(3)).unwrap();
        let err = engine
            .set_geometry_instance(
                SceneEntityId(3),
                GeometryInstanceParams::new(GeometrySetId(1)),
            )
            .unwrap_err();
        assert!(err.is_invalid_parameter());

        let skewed = Transform::new(Vec3::ZERO, Vec3::Z, Vec3::Z);
        assert!(
            engine
                .set_position(SceneEntityId(3), skewed)
                .unwrap_err()
                .is_invalid_parameter()
        );
        assert!(engine.set_position(SceneEntityId(4), Transform::identity()).is_err());
        assert!(engine.set_multiple_positions(SceneEntityId(3), &[]).is_err());
        assert!(engine.set_reflections_order(5, false).is_err());
        assert!(engine.set_diffraction_order(9, false).is_err());
        assert!(engine.set_load_balancing_spread(0).is_err());
        assert!(engine.set_number_of_primary_rays(0).is_err());
        let missing_bounds = RoomParams {
            geometry_instance: Some(SceneEntityId(999)),
            ..Default::default()
        };
        assert!(
            engine
                .set_room(SceneEntityId(1), missing_bounds, None)
                .unwrap_err()
                .is_not_found()
        );
        assert!(engine.set_smoothing_constant(None, -1.0).is_err());
        assert!(
            engine
                .set_max_diffraction_paths(SceneEntityId(99), 4)
                .unwrap_err()
                .is_not_found()
        );
    }

    #[test]
    fn test_queries_before_any_tick() {
        let engine = engine();
        engine.register_emitter(SceneEntityId(1)).unwrap();
        assert!(
            engine
                .query_diffraction_paths(SceneEntityId(1), 0)
                .unwrap_err()
                .is_not_found()
        );
        assert!(
            engine
                .query_reflection_paths(SceneEntityId(2), 0)
                .unwrap_err()
                .is_not_found()
        );
        assert_eq!(engine.room_of(SceneEntityId(1)).unwrap(), SceneEntityId::OUTDOORS);
    }

    #[test]
    fn test_events_after_tick() {
        let engine = engine();
        engine.tick().unwrap();
        engine.tick().unwrap();
        let frames: Vec<u64> = engine
            .poll_events()
            .iter()
            .filter_map(|e| e.timing().map(|t| t.frame))
            .collect();
        assert_eq!(frames, vec![1, 2]);
        assert!(engine.poll_events().is_empty());
        assert_eq!(engine.frame().unwrap(), 2);
    }

    #[test]
    fn test_dedicated_tick_thread() {
        let mut engine = engine();
        engine.start().unwrap();
        assert!(engine.is_running());
        let deadline = Instant::now() + Duration::from_secs(5);
        while engine.frame().unwrap() < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        engine.stop().unwrap();
        assert!(!engine.is_running());
        assert!(engine.frame().unwrap() >= 3);
    }
}
