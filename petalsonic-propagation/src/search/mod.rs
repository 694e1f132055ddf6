//! Candidate path search for one emitter and one listener.
//!
//! The search is two-sided. The listener's [`ListenerScan`] supplies what its rays found
//! (reflector sequences and edge chains); the emitter side tests those candidates against
//! its own position. Portal routes come straight from the room graph.

mod edge;
mod portal;
mod reflection;

use crate::config::PropagationDesc;
use crate::evaluate::Evaluator;
use crate::geometry::RayTracer;
use crate::id::SceneEntityId;
use crate::math::Transform;
use crate::output::{DiffractionNode, DiffractionPath, PathKey, ReflectionPath};
use crate::raycast::ListenerScan;
use crate::scene::Scene;
use std::collections::HashSet;

/// Limits of one search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchParams {
    pub diffraction_order: u32,
    pub reflection_order: u32,
    pub diffraction_on_reflection_order: u32,
    /// Portal routes enumerated before ranking
    pub max_routes: usize,
    pub enable_edges: bool,
}

impl SearchParams {
    /// Search limits for an emitter that keeps `max_diffraction_paths` paths.
    pub fn new(desc: &PropagationDesc, max_diffraction_paths: usize) -> Self {
        Self {
            diffraction_order: desc.diffraction_order,
            reflection_order: desc.reflection_order,
            diffraction_on_reflection_order: desc.diffraction_on_reflection_order,
            max_routes: (max_diffraction_paths * 2).max(4),
            enable_edges: desc.enable_geometric_diffraction,
        }
    }
}

/// The two ends of a search and the rooms they were resolved to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchRequest {
    pub emitter: Transform,
    pub emitter_room: SceneEntityId,
    pub listener: Transform,
    pub listener_room: SceneEntityId,
}

/// Evaluated candidates, unranked.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResult {
    pub diffraction_paths: Vec<DiffractionPath>,
    pub reflection_paths: Vec<ReflectionPath>,
}

/// Builds and evaluates every candidate path for one emitter/listener pair.
pub struct PathSearch<'a> {
    scene: &'a Scene,
    params: SearchParams,
    evaluator: Evaluator,
}

impl<'a> PathSearch<'a> {
    pub fn new(scene: &'a Scene, params: SearchParams, evaluator: Evaluator) -> Self {
        Self {
            scene,
            params,
            evaluator,
        }
    }

    pub fn run(&self, request: &SearchRequest, scan: &ListenerScan) -> SearchResult {
        let mut result = SearchResult::default();
        let rooms = self.scene.rooms();
        let same_space = rooms.same_space(request.emitter_room, request.listener_room);

        self.direct_path(request, same_space, &mut result.diffraction_paths);
        if self.params.diffraction_order > 0 {
            if same_space {
                if self.params.enable_edges
                    && self
                        .scene
                        .is_occluded(request.emitter.position, request.listener.position)
                {
                    self.edge_paths(request, scan, &mut result.diffraction_paths);
                }
            } else {
                self.portal_paths(request, &mut result.diffraction_paths);
            }
        }
        if self.params.reflection_order > 0 {
            let mut seen: HashSet<PathKey> = HashSet::new();
            self.reflection_paths(request, scan, &mut seen, &mut result.reflection_paths);
            if self.params.diffraction_on_reflection_order > 0 {
                self.diffracted_reflections(
                    &result.diffraction_paths,
                    scan,
                    &mut seen,
                    &mut result.reflection_paths,
                );
            }
        }

        log::trace!(
            "Search {} -> {}: {} diffraction, {} reflection candidates",
            request.emitter_room,
            request.listener_room,
            result.diffraction_paths.len(),
            result.reflection_paths.len()
        );
        result
    }

    /// The zero-node path: direct inside one space, transmission through walls otherwise.
    fn direct_path(
        &self,
        request: &SearchRequest,
        same_space: bool,
        paths: &mut Vec<DiffractionPath>,
    ) {
        let mut path = DiffractionPath::new(
            request.emitter.position,
            request.listener.position,
            Vec::new(),
        );
        let room_losses: Vec<f32> = if same_space {
            Vec::new()
        } else {
            [request.emitter_room, request.listener_room]
                .iter()
                .map(|id| {
                    self.scene
                        .rooms()
                        .room(*id)
                        .map_or(1.0, |room| room.transmission_loss())
                })
                .collect()
        };
        if !self
            .evaluator
            .evaluate_diffraction(self.scene, &mut path, &room_losses, &request.emitter)
        {
            return;
        }
        if same_space || path.transmission_loss < 1.0 {
            paths.push(path);
        }
    }

    fn portal_paths(&self, request: &SearchRequest, paths: &mut Vec<DiffractionPath>) {
        let routes = self.scene.rooms().portal_routes(
            request.emitter_room,
            request.listener_room,
            self.params.diffraction_order,
            self.params.max_routes,
        );
        for route in &routes {
            let Some(nodes) = portal::route_nodes(
                self.scene,
                route,
                request.emitter.position,
                request.listener.position,
            ) else {
                continue;
            };
            let mut path = DiffractionPath::new(
                request.emitter.position,
                request.listener.position,
                nodes,
            );
            if self
                .evaluator
                .evaluate_diffraction(self.scene, &mut path, &[], &request.emitter)
            {
                paths.push(path);
            }
        }
    }

    fn edge_paths(
        &self,
        request: &SearchRequest,
        scan: &ListenerScan,
        paths: &mut Vec<DiffractionPath>,
    ) {
        let order = self.params.diffraction_order as usize;
        for chain in scan.edge_chains().iter().filter(|c| c.len() <= order) {
            let Some(found) = edge::chain_nodes(
                self.scene,
                chain,
                request.emitter.position,
                request.listener.position,
            ) else {
                continue;
            };
            let nodes = found
                .into_iter()
                .map(|(edge, position)| {
                    let room = if request.emitter_room == request.listener_room {
                        request.emitter_room
                    } else {
                        self.scene.room_at(position)
                    };
                    DiffractionNode {
                        position,
                        feature: edge.feature(),
                        angle: 0.0,
                        emitter_side_room: room,
                        listener_side_room: room,
                    }
                })
                .collect();
            let mut path = DiffractionPath::new(
                request.emitter.position,
                request.listener.position,
                nodes,
            );
            if self
                .evaluator
                .evaluate_diffraction(self.scene, &mut path, &[], &request.emitter)
            {
                paths.push(path);
            }
        }
    }

    fn reflection_paths(
        &self,
        request: &SearchRequest,
        scan: &ListenerScan,
        seen: &mut HashSet<PathKey>,
        paths: &mut Vec<ReflectionPath>,
    ) {
        let order = self.params.reflection_order as usize;
        for sequence in scan.reflector_sequences().iter().filter(|s| s.len() <= order) {
            let Some(points) = reflection::image_source_points(
                self.scene,
                sequence,
                request.emitter.position,
                request.emitter_room,
                request.listener.position,
                request.listener_room,
            ) else {
                continue;
            };
            let mut path = ReflectionPath::new(
                request.emitter.position,
                request.listener.position,
                points,
            );
            if self.evaluator.evaluate_reflection(self.scene, &mut path) && seen.insert(path.key()) {
                paths.push(path);
            }
        }
    }

    /// Splices single reflections into diffraction paths that bend at most
    /// `diffraction_on_reflection_order` times.
    fn diffracted_reflections(
        &self,
        diffraction_paths: &[DiffractionPath],
        scan: &ListenerScan,
        seen: &mut HashSet<PathKey>,
        paths: &mut Vec<ReflectionPath>,
    ) {
        let max_nodes = self.params.diffraction_on_reflection_order as usize;
        let reflectors: Vec<_> = scan
            .reflector_sequences()
            .iter()
            .filter(|s| s.len() == 1)
            .map(|s| s[0])
            .collect();
        for base in diffraction_paths
            .iter()
            .filter(|p| !p.nodes.is_empty() && p.nodes.len() <= max_nodes)
        {
            for key in &reflectors {
                for gap in 0..=base.nodes.len() {
                    let Some(points) = reflection::splice_reflection(self.scene, base, *key, gap) else {
                        continue;
                    };
                    let mut path = ReflectionPath::new(
                        base.emitter_position,
                        base.listener_position,
                        points,
                    );
                    if self.evaluator.evaluate_reflection(self.scene, &mut path)
                        && seen.insert(path.key())
                    {
                        paths.push(path);
                    }
                }
            }
        }
    }
}
