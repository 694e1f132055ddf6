//! One propagation tick: apply queued commands, resolve rooms, scan listeners, search the
//! pairs that are due, then publish.

use super::PathQuery;
use crate::balance::{Decision, LoadBalancer};
use crate::commands::{EngineCommand, ObjectCommand, ParamCommand};
use crate::config::PropagationDesc;
use crate::evaluate::{
    Evaluator, SmoothedValues, Smoother, keep_most_prominent_diffraction,
    keep_most_prominent_reflections, limit_global_reflections, smoothing_alpha, wet_diffraction,
};
use crate::events::{PropagationEvent, TickTimingEvent};
use crate::id::SceneEntityId;
use crate::jobs::{JobExecutor, run_batch};
use crate::math::{Transform, Vec3};
use crate::output::{
    DiffractionPath, EmitterPropagation, ImageSource, OutputSink, PortalPropagation,
    PropagationState, ReflectionPath, VirtualSource,
};
use crate::raycast::{ListenerScan, RayCaster};
use crate::scene::Scene;
use crate::search::{PathSearch, SearchParams, SearchRequest};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

/// Smoothed values closer than this to their targets count as settled.
const SETTLED: f32 = 1e-4;

/// Engine-side record of a registered game object.
#[derive(Debug, Clone, Default)]
pub(super) struct GameObject {
    pub emitter: bool,
    pub listener: bool,
    pub positions: Vec<Transform>,
    /// Explicit listener set; `None` means every registered listener
    pub listeners: Option<Vec<SceneEntityId>>,
    pub room_override: Option<SceneEntityId>,
    /// Room of each position, resolved at the last tick
    pub rooms: Vec<SceneEntityId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(super) struct PairKey {
    pub emitter: SceneEntityId,
    pub listener: SceneEntityId,
    pub position_index: usize,
}

struct Pair {
    state: PropagationState,
    smoother: Smoother,
    searched_emitter: Vec3,
    searched_listener: Vec3,
}

impl Pair {
    fn new(key: PairKey) -> Self {
        Self {
            state: PropagationState::empty(key.emitter, key.listener, key.position_index),
            smoother: Smoother::default(),
            searched_emitter: Vec3::ZERO,
            searched_listener: Vec3::ZERO,
        }
    }
}

/// A pair visited this tick and what the balancer decided for it.
#[derive(Debug, Clone, Copy)]
struct PlannedPair {
    key: PairKey,
    request: SearchRequest,
    decision: Decision,
}

pub(super) struct TickState {
    pub desc: PropagationDesc,
    pub frame: u64,
    pub scene: Arc<Scene>,
    pub executor: Box<dyn JobExecutor>,
    pub sink: Option<Box<dyn OutputSink>>,
    balancer: LoadBalancer,
    objects: HashMap<SceneEntityId, GameObject>,
    /// Registration order; an emitter's index is its load-balancing slot
    emitter_order: Vec<SceneEntityId>,
    /// Registration order; the first one is the spatial audio listener
    listener_order: Vec<SceneEntityId>,
    max_diffraction_paths: HashMap<SceneEntityId, usize>,
    smoothing_constants: HashMap<SceneEntityId, f32>,
    pairs: HashMap<PairKey, Pair>,
    invalidate_all: bool,
    invalidated_emitters: HashSet<SceneEntityId>,
}

impl TickState {
    pub fn new(desc: PropagationDesc, executor: Box<dyn JobExecutor>) -> Self {
        Self {
            balancer: LoadBalancer::new(&desc),
            scene: Arc::new(Scene::new(desc.max_instance_geometry_bytes)),
            desc,
            frame: 0,
            executor,
            sink: None,
            objects: HashMap::new(),
            emitter_order: Vec::new(),
            listener_order: Vec::new(),
            max_diffraction_paths: HashMap::new(),
            smoothing_constants: HashMap::new(),
            pairs: HashMap::new(),
            invalidate_all: false,
            invalidated_emitters: HashSet::new(),
        }
    }

    pub fn spread(&self) -> u32 {
        self.balancer.spread()
    }

    /// Runs one tick over the commands queued since the previous one.
    pub fn run(
        &mut self,
        commands: Vec<EngineCommand>,
        events: &mut Vec<PropagationEvent>,
    ) -> TickTimingEvent {
        let started = Instant::now();
        self.frame += 1;
        let frame = self.frame;

        self.apply_commands(commands, events);
        self.resolve_rooms(events);
        let plan = self.plan();

        let scan_started = Instant::now();
        let scans = self.scan_listeners(&plan);
        let scan_time_us = scan_started.elapsed().as_micros() as u64;

        let search_started = Instant::now();
        let recomputed = self.search(&plan, &scans);
        let search_time_us = search_started.elapsed().as_micros() as u64;

        let mut extrapolated = 0;
        for planned in &plan {
            if planned.decision == Decision::Extrapolate {
                if let Some(pair) = self.pairs.get_mut(&planned.key) {
                    pair.state
                        .extrapolate(planned.request.emitter, planned.request.listener);
                    extrapolated += 1;
                }
            }
        }
        let live: HashSet<PairKey> = plan.iter().map(|p| p.key).collect();
        self.pairs.retain(|key, _| live.contains(key));
        self.enforce_global_reflection_limit();
        self.invalidate_all = false;
        self.invalidated_emitters.clear();

        self.publish(&plan);
        self.publish_portals();
        if let Some(sink) = self.sink.as_mut() {
            sink.tick_finished(frame);
        }

        let total_time_us = started.elapsed().as_micros() as u64;
        let frame_ms = self.desc.frame_duration_ms();
        if let Some(spread) = self
            .balancer
            .record_tick(total_time_us as f32 / 1000.0, frame_ms)
        {
            self.desc.load_balancing_spread = spread;
            events.push(PropagationEvent::SpreadAdjusted { spread });
        }

        let timing = TickTimingEvent {
            frame,
            scan_time_us,
            search_time_us,
            total_time_us,
            recomputed,
            extrapolated,
        };
        log::debug!(
            "Tick {}: {} pairs, {} recomputed, {} extrapolated in {} us",
            frame,
            plan.len(),
            recomputed,
            extrapolated,
            total_time_us
        );
        events.push(PropagationEvent::TickCompleted { timing });
        timing
    }

    fn apply_commands(&mut self, commands: Vec<EngineCommand>, events: &mut Vec<PropagationEvent>) {
        let mut scene_changed = false;
        for command in commands {
            match command {
                EngineCommand::Scene(command) => {
                    let applied = Arc::make_mut(&mut self.scene).apply(command);
                    for instance in applied.degraded {
                        log::error!(
                            "Geometry instance {} could not get storage; it is excluded from ray queries",
                            instance
                        );
                        events.push(PropagationEvent::GeometryDegraded { instance });
                    }
                    if !applied.removed_instances.is_empty() {
                        log::debug!(
                            "Removed {} instances with their geometry set",
                            applied.removed_instances.len()
                        );
                    }
                    for room in applied.created_rooms {
                        log::debug!("Room {} created with default parameters", room);
                    }
                    scene_changed = true;
                }
                EngineCommand::Param(command) => self.apply_param(command),
                EngineCommand::Object(command) => self.apply_object(command),
            }
        }
        if scene_changed {
            Arc::make_mut(&mut self.scene).commit();
        }
    }

    fn apply_param(&mut self, command: ParamCommand) {
        log::debug!("Applying {:?}", command);
        match command {
            ParamCommand::SetReflectionsOrder { order, invalidate } => {
                self.desc.reflection_order = order;
                self.invalidate_all |= invalidate;
            }
            ParamCommand::SetDiffractionOrder { order, invalidate } => {
                self.desc.diffraction_order = order;
                self.invalidate_all |= invalidate;
            }
            ParamCommand::SetMaxDiffractionPaths { emitter, max_paths } => {
                self.max_diffraction_paths.insert(emitter, max_paths);
                self.invalidated_emitters.insert(emitter);
            }
            ParamCommand::SetMaxGlobalReflectionPaths(limit) => {
                self.desc.max_global_reflection_paths = limit;
            }
            ParamCommand::SetNumberOfPrimaryRays(rays) => {
                self.desc.num_primary_rays = rays;
            }
            ParamCommand::SetLoadBalancingSpread(spread) => {
                self.desc.load_balancing_spread = spread;
                self.balancer.set_spread(spread);
            }
            ParamCommand::SetSmoothingConstant { emitter, time_ms } => match emitter {
                Some(emitter) => {
                    self.smoothing_constants.insert(emitter, time_ms);
                }
                None => self.desc.smoothing_constant_ms = time_ms,
            },
            ParamCommand::SetTransmissionOperation(operation) => {
                self.desc.transmission_operation = operation;
                self.invalidate_all = true;
            }
        }
    }

    fn apply_object(&mut self, command: ObjectCommand) {
        match command {
            ObjectCommand::RegisterEmitter(id) => {
                self.objects.entry(id).or_default().emitter = true;
                if !self.emitter_order.contains(&id) {
                    self.emitter_order.push(id);
                }
            }
            ObjectCommand::RegisterListener(id) => {
                self.objects.entry(id).or_default().listener = true;
                if !self.listener_order.contains(&id) {
                    self.listener_order.push(id);
                }
            }
            ObjectCommand::Unregister(id) => {
                self.objects.remove(&id);
                self.emitter_order.retain(|e| *e != id);
                self.listener_order.retain(|l| *l != id);
                self.max_diffraction_paths.remove(&id);
                self.smoothing_constants.remove(&id);
            }
            ObjectCommand::SetListeners { emitter, listeners } => {
                if let Some(object) = self.objects.get_mut(&emitter) {
                    object.listeners = Some(listeners);
                }
            }
            ObjectCommand::SetPositions { id, positions } => {
                if let Some(object) = self.objects.get_mut(&id) {
                    object.positions = positions;
                }
            }
            ObjectCommand::SetInRoom { id, room } => {
                if let Some(object) = self.objects.get_mut(&id) {
                    object.room_override = Some(room);
                }
            }
            ObjectCommand::UnsetInRoom(id) => {
                if let Some(object) = self.objects.get_mut(&id) {
                    object.room_override = None;
                }
            }
        }
    }

    /// Resolves the room of every positioned game object and reports transitions.
    fn resolve_rooms(&mut self, events: &mut Vec<PropagationEvent>) {
        let scene = Arc::clone(&self.scene);
        let mut ids: Vec<SceneEntityId> = self.objects.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            let Some(object) = self.objects.get_mut(&id) else {
                continue;
            };
            // An override naming a room that no longer exists falls back to containment
            let forced = object
                .room_override
                .filter(|room| scene.rooms().room(*room).is_some());
            let rooms: Vec<SceneEntityId> = object
                .positions
                .iter()
                .map(|t| forced.unwrap_or_else(|| scene.room_at(t.position)))
                .collect();
            if let (Some(&from), Some(&to)) = (object.rooms.first(), rooms.first()) {
                if from != to {
                    log::debug!("Game object {} moved from room {} to {}", id, from, to);
                    events.push(PropagationEvent::RoomChanged {
                        game_object: id,
                        from,
                        to,
                    });
                }
            }
            object.rooms = rooms;
        }
    }

    fn listeners_of(&self, emitter: SceneEntityId) -> Vec<SceneEntityId> {
        let candidates = self
            .objects
            .get(&emitter)
            .and_then(|o| o.listeners.clone())
            .unwrap_or_else(|| self.listener_order.clone());
        candidates
            .into_iter()
            .filter(|l| *l != emitter)
            .filter(|l| {
                self.objects
                    .get(l)
                    .is_some_and(|o| o.listener && !o.positions.is_empty())
            })
            .collect()
    }

    /// Every emitter position/listener pair of this tick, with the balancer's decision.
    fn plan(&self) -> Vec<PlannedPair> {
        let mut plan = Vec::new();
        let version = self.scene.version();
        for (slot, emitter_id) in self.emitter_order.iter().enumerate() {
            let Some(emitter) = self.objects.get(emitter_id) else {
                continue;
            };
            let invalidated = self.invalidate_all || self.invalidated_emitters.contains(emitter_id);
            for listener_id in self.listeners_of(*emitter_id) {
                let Some(listener) = self.objects.get(&listener_id) else {
                    continue;
                };
                let Some(listener_transform) = listener.positions.first().copied() else {
                    continue;
                };
                let listener_room = first_room(&listener.rooms);
                for (position_index, emitter_transform) in emitter.positions.iter().enumerate() {
                    let key = PairKey {
                        emitter: *emitter_id,
                        listener: listener_id,
                        position_index,
                    };
                    let request = SearchRequest {
                        emitter: *emitter_transform,
                        emitter_room: emitter
                            .rooms
                            .get(position_index)
                            .copied()
                            .unwrap_or(SceneEntityId::OUTDOORS),
                        listener: listener_transform,
                        listener_room,
                    };
                    let decision = match self.pairs.get(&key) {
                        Some(pair) => {
                            let state = &pair.state;
                            let forced = invalidated
                                || state.scene_version != version
                                || state.emitter_room != request.emitter_room
                                || state.listener_room != request.listener_room;
                            let moved_since_search = pair
                                .searched_emitter
                                .distance(request.emitter.position)
                                .max(pair.searched_listener.distance(request.listener.position));
                            let moved_since_tick = movement(&state.emitter_transform, &request.emitter)
                                .max(movement(&state.listener_transform, &request.listener));
                            self.balancer.decide(
                                self.frame,
                                slot,
                                forced,
                                moved_since_search,
                                moved_since_tick,
                            )
                        }
                        None => Decision::Recompute,
                    };
                    plan.push(PlannedPair {
                        key,
                        request,
                        decision,
                    });
                }
            }
        }
        plan
    }

    /// Scans each listener that takes part in a recomputation. One scan serves every emitter
    /// heard by that listener.
    fn scan_listeners(&self, plan: &[PlannedPair]) -> HashMap<SceneEntityId, Arc<ListenerScan>> {
        let mut listeners: Vec<(SceneEntityId, Vec3)> = Vec::new();
        for planned in plan.iter().filter(|p| p.decision == Decision::Recompute) {
            if !listeners.iter().any(|(id, _)| *id == planned.key.listener) {
                listeners.push((planned.key.listener, planned.request.listener.position));
            }
        }
        let caster = RayCaster::new(&self.desc);
        let frame = self.frame;
        let tasks: Vec<_> = listeners
            .iter()
            .map(|&(listener, position)| {
                let scene = Arc::clone(&self.scene);
                move || caster.scan(&scene, listener, position, frame)
            })
            .collect();
        let results = run_batch(self.executor.as_ref(), tasks);
        listeners
            .into_iter()
            .zip(results)
            .filter_map(|((listener, _), scan)| match scan {
                Some(scan) => Some((listener, Arc::new(scan))),
                None => {
                    log::warn!("Scan of listener {} failed; searching without it", listener);
                    None
                }
            })
            .collect()
    }

    fn max_paths_of(&self, emitter: SceneEntityId) -> usize {
        self.max_diffraction_paths
            .get(&emitter)
            .copied()
            .unwrap_or(self.desc.max_diffraction_paths)
    }

    /// Searches every pair due for recomputation; returns how many got new paths.
    fn search(
        &mut self,
        plan: &[PlannedPair],
        scans: &HashMap<SceneEntityId, Arc<ListenerScan>>,
    ) -> u32 {
        let due: Vec<&PlannedPair> = plan
            .iter()
            .filter(|p| p.decision == Decision::Recompute)
            .collect();
        let evaluator = Evaluator::new(&self.desc, self.desc.transmission_operation);
        let tasks: Vec<_> = due
            .iter()
            .map(|planned| {
                let scene = Arc::clone(&self.scene);
                let scan = scans.get(&planned.key.listener).cloned().unwrap_or_default();
                let params = SearchParams::new(&self.desc, self.max_paths_of(planned.key.emitter));
                let request = planned.request;
                move || PathSearch::new(&scene, params, evaluator).run(&request, &scan)
            })
            .collect();
        let results = run_batch(self.executor.as_ref(), tasks);

        let max_length = self.desc.max_path_length;
        let max_reflections = self.desc.max_emitter_reflection_paths;
        let version = self.scene.version();
        let mut recomputed = 0;
        for (planned, result) in due.into_iter().zip(results) {
            let Some(mut result) = result else {
                log::warn!(
                    "Search for emitter {} and listener {} failed; keeping the previous paths",
                    planned.key.emitter,
                    planned.key.listener
                );
                continue;
            };
            let limit = self.max_paths_of(planned.key.emitter);
            keep_most_prominent_diffraction(&mut result.diffraction_paths, limit, max_length);
            keep_most_prominent_reflections(&mut result.reflection_paths, max_reflections, max_length);

            let pair = self
                .pairs
                .entry(planned.key)
                .or_insert_with(|| Pair::new(planned.key));
            let state = &mut pair.state;
            state.emitter_transform = planned.request.emitter;
            state.listener_transform = planned.request.listener;
            state.emitter_room = planned.request.emitter_room;
            state.listener_room = planned.request.listener_room;
            state.diffraction_paths = result.diffraction_paths;
            state.reflection_paths = result.reflection_paths;
            state.computed_frame = self.frame;
            state.scene_version = version;
            state.update_built_ins();
            pair.searched_emitter = planned.request.emitter.position;
            pair.searched_listener = planned.request.listener.position;
            recomputed += 1;
        }
        recomputed
    }

    fn enforce_global_reflection_limit(&mut self) {
        let mut pairs: Vec<(&PairKey, &mut Pair)> = self.pairs.iter_mut().collect();
        pairs.sort_by_key(|(key, _)| **key);
        let mut sets: Vec<&mut Vec<ReflectionPath>> = pairs
            .into_iter()
            .map(|(_, pair)| &mut pair.state.reflection_paths)
            .collect();
        limit_global_reflections(
            &mut sets,
            self.desc.max_global_reflection_paths,
            self.desc.max_path_length,
        );
    }

    /// Smooths every pair and pushes the ones that changed or are still settling.
    fn publish(&mut self, plan: &[PlannedPair]) {
        let frame_ms = self.desc.frame_duration_ms();
        for planned in plan {
            let time_ms = self
                .smoothing_constants
                .get(&planned.key.emitter)
                .copied()
                .unwrap_or(self.desc.smoothing_constant_ms);
            let Some(pair) = self.pairs.get_mut(&planned.key) else {
                continue;
            };
            let values = pair
                .smoother
                .smooth(&pair.state, smoothing_alpha(frame_ms, time_ms));
            if planned.decision == Decision::Hold && is_settled(&values, &pair.state) {
                continue;
            }
            if let Some(sink) = self.sink.as_mut() {
                let update =
                    emitter_propagation(&pair.state, &values, planned.decision == Decision::Recompute);
                sink.emitter_propagation(&update);
            }
        }
    }

    /// Pushes wet diffraction and bleed of the portals around the spatial audio listener.
    fn publish_portals(&mut self) {
        let Some((listener, position, room)) = self.spatial_listener() else {
            return;
        };
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        let mut portals: Vec<_> = self.scene.rooms().portals_of(room).collect();
        portals.sort_by_key(|p| p.id);
        for portal in portals {
            let wet_diffraction = wet_diffraction(portal, position);
            sink.portal_propagation(&PortalPropagation {
                portal: portal.id,
                listener,
                wet_diffraction,
                bleed_gain: portal.params.adjacent_room_bleed * (1.0 - wet_diffraction),
            });
        }
    }

    /// The first registered listener that has a position, with its position and room.
    pub fn spatial_listener(&self) -> Option<(SceneEntityId, Vec3, SceneEntityId)> {
        self.listener_order.iter().find_map(|id| {
            let object = self.objects.get(id)?;
            let transform = object.positions.first()?;
            Some((*id, transform.position, first_room(&object.rooms)))
        })
    }

    pub fn room_of(&self, id: SceneEntityId) -> Option<SceneEntityId> {
        self.objects.get(&id).and_then(|o| o.rooms.first().copied())
    }

    /// Wet diffraction of `portal` for the spatial audio listener.
    pub fn wet_diffraction(&self, portal: SceneEntityId) -> Option<f32> {
        let (_, position, _) = self.spatial_listener()?;
        let portal = self.scene.rooms().portal(portal)?;
        Some(wet_diffraction(portal, position))
    }

    /// The pair a debug query reports: the emitter position heard by the earliest registered
    /// listener that has a result.
    fn queried_pair(&self, emitter: SceneEntityId, position_index: usize) -> Option<&Pair> {
        self.listener_order.iter().find_map(|listener| {
            self.pairs.get(&PairKey {
                emitter,
                listener: *listener,
                position_index,
            })
        })
    }

    pub fn query_diffraction(
        &self,
        emitter: SceneEntityId,
        position_index: usize,
    ) -> Option<PathQuery<DiffractionPath>> {
        let pair = self.queried_pair(emitter, position_index)?;
        Some(PathQuery {
            listener: pair.state.listener,
            emitter_position: pair.state.emitter_transform.position,
            listener_position: pair.state.listener_transform.position,
            paths: pair.state.diffraction_paths.clone(),
        })
    }

    pub fn query_reflection(
        &self,
        emitter: SceneEntityId,
        position_index: usize,
    ) -> Option<PathQuery<ReflectionPath>> {
        let pair = self.queried_pair(emitter, position_index)?;
        Some(PathQuery {
            listener: pair.state.listener,
            emitter_position: pair.state.emitter_transform.position,
            listener_position: pair.state.listener_transform.position,
            paths: pair.state.reflection_paths.clone(),
        })
    }
}

fn first_room(rooms: &[SceneEntityId]) -> SceneEntityId {
    rooms.first().copied().unwrap_or(SceneEntityId::OUTDOORS)
}

/// Distance moved, counting a pure rotation as a tiny movement so it is extrapolated.
fn movement(previous: &Transform, current: &Transform) -> f32 {
    let distance = previous.distance(current);
    if distance == 0.0 && previous != current {
        f32::EPSILON
    } else {
        distance
    }
}

fn is_settled(values: &SmoothedValues, state: &PropagationState) -> bool {
    (values.diffraction - state.diffraction).abs() < SETTLED
        && (values.transmission_loss - state.transmission_loss).abs() < SETTLED
        && values
            .diffraction_gains
            .iter()
            .zip(&state.diffraction_paths)
            .all(|(gain, path)| (gain - path.gain).abs() < SETTLED)
        && values
            .reflection_gains
            .iter()
            .zip(&state.reflection_paths)
            .all(|(gain, path)| (gain - path.gain).abs() < SETTLED)
}

fn emitter_propagation(
    state: &PropagationState,
    values: &SmoothedValues,
    recomputed: bool,
) -> EmitterPropagation {
    EmitterPropagation {
        emitter: state.emitter,
        listener: state.listener,
        position_index: state.position_index,
        emitter_room: state.emitter_room,
        listener_room: state.listener_room,
        diffraction: values.diffraction,
        transmission_loss: values.transmission_loss,
        virtual_sources: state
            .diffraction_paths
            .iter()
            .zip(&values.diffraction_gains)
            .map(|(path, gain)| VirtualSource {
                transform: path.virtual_emitter,
                gain: *gain,
                diffraction: path.diffraction,
                transmission_loss: path.transmission_loss,
                node_count: path.nodes.len(),
            })
            .collect(),
        image_sources: state
            .reflection_paths
            .iter()
            .zip(&values.reflection_gains)
            .map(|(path, gain)| ImageSource {
                position: path.image_source,
                gain: *gain,
                textures: path.textures(),
                emitter_diffraction: path.emitter_diffraction,
                listener_diffraction: path.listener_diffraction,
            })
            .collect(),
        recomputed,
    }
}
