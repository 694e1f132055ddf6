use super::{Portal, ReverbZoneLink, Room};
use crate::config::{DistanceBehavior, PortalParams, RoomParams};
use crate::geometry::GeometryStore;
use crate::id::SceneEntityId;
use crate::math::Vec3;
use std::collections::{HashMap, HashSet, VecDeque};

/// Longest reverb-zone parent chain followed before giving up.
const MAX_ZONE_DEPTH: usize = 64;

/// A sequence of portals leading from one room to another.
#[derive(Debug, Clone, PartialEq)]
pub struct PortalRoute {
    pub portals: Vec<SceneEntityId>,
    /// For each portal, the room on the start side and the room on the end side
    pub sides: Vec<(SceneEntityId, SceneEntityId)>,
}

/// Rooms as nodes, portals and reverb-zone links as edges.
///
/// The outdoors room is always present. Rooms joined by reverb-zone links form one acoustic
/// space: sound moves freely inside a space and needs a portal (or transmission) between spaces.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomGraph {
    rooms: HashMap<SceneEntityId, Room>,
    portals: HashMap<SceneEntityId, Portal>,
}

impl Default for RoomGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomGraph {
    pub fn new() -> Self {
        let mut rooms = HashMap::new();
        rooms.insert(SceneEntityId::OUTDOORS, Room::outdoors());
        Self {
            rooms,
            portals: HashMap::new(),
        }
    }

    pub fn room(&self, id: SceneEntityId) -> Option<&Room> {
        self.rooms.get(&id)
    }

    pub fn portal(&self, id: SceneEntityId) -> Option<&Portal> {
        self.portals.get(&id)
    }

    pub fn rooms(&self) -> impl Iterator<Item = &Room> {
        self.rooms.values()
    }

    pub fn portals(&self) -> impl Iterator<Item = &Portal> {
        self.portals.values()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn portal_count(&self) -> usize {
        self.portals.len()
    }

    /// Creates or updates a room. A reverb-zone link on the room is kept.
    pub fn set_room(&mut self, id: SceneEntityId, params: RoomParams, name: Option<String>) {
        let room = self
            .rooms
            .entry(id)
            .or_insert_with(|| Room::with_defaults(id));
        room.params = params;
        if name.is_some() || !id.is_outdoors() {
            room.name = name;
        }
        room.auto_created = false;
    }

    /// Removes a room.
    ///
    /// Outdoors is reset to defaults instead. A room still used by a portal or as a reverb-zone
    /// parent reverts to default parameters so the graph stays consistent.
    pub fn remove_room(&mut self, id: SceneEntityId) -> bool {
        if id.is_outdoors() {
            if let Some(room) = self.rooms.get_mut(&id) {
                room.params = RoomParams::default();
            }
            return false;
        }
        if !self.rooms.contains_key(&id) {
            return false;
        }
        if self.is_referenced(id) {
            if let Some(room) = self.rooms.get_mut(&id) {
                room.params = RoomParams::default();
                room.name = None;
                room.reverb_zone = None;
                room.auto_created = true;
            }
        } else {
            self.rooms.remove(&id);
        }
        true
    }

    /// Auto-creates a room with default parameters; returns whether it was missing.
    pub fn ensure_room(&mut self, id: SceneEntityId) -> bool {
        if self.rooms.contains_key(&id) {
            return false;
        }
        log::debug!("Auto-creating room {} with default parameters", id);
        self.rooms.insert(id, Room::with_defaults(id));
        true
    }

    /// Creates or updates a portal, auto-creating missing rooms. Returns the created rooms.
    pub fn set_portal(
        &mut self,
        id: SceneEntityId,
        params: PortalParams,
        name: Option<String>,
    ) -> Vec<SceneEntityId> {
        let mut created = Vec::new();
        for room in [params.front_room, params.back_room] {
            if self.ensure_room(room) {
                created.push(room);
            }
        }
        let previous = self.portals.insert(id, Portal::new(id, params, name));
        if let Some(previous) = previous {
            self.release_auto_rooms([previous.params.front_room, previous.params.back_room]);
        }
        created
    }

    pub fn remove_portal(&mut self, id: SceneEntityId) -> bool {
        match self.portals.remove(&id) {
            Some(portal) => {
                self.release_auto_rooms([portal.params.front_room, portal.params.back_room]);
                true
            }
            None => false,
        }
    }

    /// Links `zone` into `parent` without a portal. Returns the auto-created rooms.
    ///
    /// The caller guarantees the link creates no cycle.
    pub fn set_reverb_zone(
        &mut self,
        zone: SceneEntityId,
        parent: SceneEntityId,
        transition_width: f32,
    ) -> Vec<SceneEntityId> {
        let mut created = Vec::new();
        for room in [zone, parent] {
            if self.ensure_room(room) {
                created.push(room);
            }
        }
        let previous_parent = self.zone_parent(zone);
        if let Some(room) = self.rooms.get_mut(&zone) {
            room.reverb_zone = Some(ReverbZoneLink {
                parent,
                transition_width,
            });
        }
        if let Some(previous) = previous_parent {
            if previous != parent {
                self.release_auto_rooms([previous]);
            }
        }
        created
    }

    pub fn remove_reverb_zone(&mut self, zone: SceneEntityId) -> bool {
        let parent = match self.rooms.get_mut(&zone).and_then(|r| r.reverb_zone.take()) {
            Some(link) => link.parent,
            None => return false,
        };
        self.release_auto_rooms([zone, parent]);
        true
    }

    pub fn zone_parent(&self, room: SceneEntityId) -> Option<SceneEntityId> {
        self.rooms
            .get(&room)
            .and_then(|r| r.reverb_zone)
            .map(|link| link.parent)
    }

    /// Whether linking `zone` under `parent` would close a loop of reverb-zone links.
    pub fn would_cycle(&self, zone: SceneEntityId, parent: SceneEntityId) -> bool {
        self.zone_chain(parent).contains(&zone)
    }

    fn zone_chain(&self, room: SceneEntityId) -> Vec<SceneEntityId> {
        let mut chain = vec![room];
        let mut current = room;
        while let Some(parent) = self.zone_parent(current) {
            if chain.contains(&parent) || chain.len() >= MAX_ZONE_DEPTH {
                break;
            }
            chain.push(parent);
            current = parent;
        }
        chain
    }

    /// Representative of the acoustic space containing `room`: the top of its reverb-zone chain.
    pub fn space_of(&self, room: SceneEntityId) -> SceneEntityId {
        self.zone_chain(room).last().copied().unwrap_or(room)
    }

    pub fn same_space(&self, a: SceneEntityId, b: SceneEntityId) -> bool {
        a == b || self.space_of(a) == self.space_of(b)
    }

    /// Portals touching `room`, enabled or not.
    pub fn portals_of(&self, room: SceneEntityId) -> impl Iterator<Item = &Portal> {
        self.portals.values().filter(move |p| p.connects(room))
    }

    /// Enabled portals reachable from `room` by crossing at most `hops` portals.
    ///
    /// Reverb-zone links are free. The result is sorted by hop count, then ID.
    pub fn portals_within_hops(&self, room: SceneEntityId, hops: u32) -> Vec<SceneEntityId> {
        let mut found: Vec<(u32, SceneEntityId)> = Vec::new();
        let mut seen_portals: HashSet<SceneEntityId> = HashSet::new();
        let mut visited: HashSet<SceneEntityId> = HashSet::new();
        let mut queue: VecDeque<(SceneEntityId, u32)> = VecDeque::new();
        let start = self.space_of(room);
        visited.insert(start);
        queue.push_back((start, 0));

        while let Some((space, depth)) = queue.pop_front() {
            if depth >= hops {
                continue;
            }
            for (portal, _, far) in self.space_exits(space) {
                let next = self.space_of(far);
                if seen_portals.insert(portal) {
                    found.push((depth + 1, portal));
                }
                if visited.insert(next) {
                    queue.push_back((next, depth + 1));
                }
            }
        }
        found.sort_unstable();
        found.into_iter().map(|(_, id)| id).collect()
    }

    /// Enabled portals leaving the acoustic space `space`, as `(portal, room on this side,
    /// room on the other side)`.
    fn space_exits(&self, space: SceneEntityId) -> Vec<(SceneEntityId, SceneEntityId, SceneEntityId)> {
        let mut exits: Vec<(SceneEntityId, SceneEntityId, SceneEntityId)> = self
            .portals
            .values()
            .filter(|p| p.is_enabled())
            .filter_map(|p| {
                let (front, back) = (p.front_room(), p.back_room());
                let front_space = self.space_of(front);
                let back_space = self.space_of(back);
                if front_space == back_space {
                    None
                } else if front_space == space {
                    Some((p.id, front, back))
                } else if back_space == space {
                    Some((p.id, back, front))
                } else {
                    None
                }
            })
            .collect();
        exits.sort_unstable();
        exits
    }

    /// Every sequence of enabled portals leading from room `from` to room `to`, crossing at most
    /// `max_portals` portals and never re-entering an acoustic space.
    pub fn portal_routes(
        &self,
        from: SceneEntityId,
        to: SceneEntityId,
        max_portals: u32,
        max_routes: usize,
    ) -> Vec<PortalRoute> {
        let mut routes = Vec::new();
        let target = self.space_of(to);
        let start = self.space_of(from);
        if start == target || max_portals == 0 || max_routes == 0 {
            return routes;
        }
        let mut search = RouteSearch {
            graph: self,
            target,
            max_routes,
            current: PortalRoute {
                portals: Vec::new(),
                sides: Vec::new(),
            },
            visited: vec![start],
            routes: &mut routes,
        };
        search.expand(start, max_portals);
        routes
    }

    /// Room containing `point`, from the rooms' bounding geometry instances.
    ///
    /// Highest priority wins; ties go to the innermost room (smallest bounds), rooms excluded
    /// from distance calculations lose ties, then lowest ID. Outdoors if nothing contains it.
    pub fn room_at(&self, point: Vec3, geometry: &GeometryStore) -> SceneEntityId {
        let mut best: Option<(&Room, f32)> = None;
        for room in self.rooms.values() {
            let Some(instance_id) = room.params.geometry_instance else {
                continue;
            };
            let Some(instance) = geometry.instance(instance_id) else {
                continue;
            };
            if !instance.contains_point(point) {
                continue;
            }
            let volume = instance.bounds().volume();
            let better = match best {
                None => true,
                Some((current, current_volume)) => {
                    containment_rank(room, volume) < containment_rank(current, current_volume)
                }
            };
            if better {
                best = Some((room, volume));
            }
        }
        best.map_or(SceneEntityId::OUTDOORS, |(room, _)| room.id)
    }

    fn is_referenced(&self, room: SceneEntityId) -> bool {
        self.portals.values().any(|p| p.connects(room))
            || self
                .rooms
                .values()
                .any(|r| r.reverb_zone.is_some_and(|link| link.parent == room))
    }

    /// Drops auto-created rooms nothing refers to any more.
    fn release_auto_rooms<const N: usize>(&mut self, candidates: [SceneEntityId; N]) {
        for id in candidates {
            let releasable = !id.is_outdoors()
                && self
                    .rooms
                    .get(&id)
                    .is_some_and(|r| r.auto_created && r.reverb_zone.is_none());
            if releasable && !self.is_referenced(id) {
                log::debug!("Releasing auto-created room {}", id);
                self.rooms.remove(&id);
            }
        }
    }
}

/// Depth-first enumeration state for [`RoomGraph::portal_routes`].
struct RouteSearch<'a> {
    graph: &'a RoomGraph,
    target: SceneEntityId,
    max_routes: usize,
    current: PortalRoute,
    visited: Vec<SceneEntityId>,
    routes: &'a mut Vec<PortalRoute>,
}

impl RouteSearch<'_> {
    fn expand(&mut self, space: SceneEntityId, remaining: u32) {
        if remaining == 0 {
            return;
        }
        for (portal, near, far) in self.graph.space_exits(space) {
            if self.routes.len() >= self.max_routes {
                return;
            }
            let next = self.graph.space_of(far);
            if self.visited.contains(&next) {
                continue;
            }
            self.current.portals.push(portal);
            self.current.sides.push((near, far));
            if next == self.target {
                self.routes.push(self.current.clone());
            } else {
                self.visited.push(next);
                self.expand(next, remaining - 1);
                self.visited.pop();
            }
            self.current.portals.pop();
            self.current.sides.pop();
        }
    }
}

/// Sort key for containment candidates; smaller wins.
fn containment_rank(room: &Room, volume: f32) -> (i64, u8, u32, SceneEntityId) {
    let excluded = u8::from(room.params.distance_behavior == DistanceBehavior::ExcludeFromDistance);
    // Volumes are non-negative, so their bit patterns order like the values
    (
        -(room.params.priority as i64),
        excluded,
        volume.max(0.0).to_bits(),
        room.id,
    )
}
