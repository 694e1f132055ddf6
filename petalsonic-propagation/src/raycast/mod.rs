//! Listener-side ray casting.
//!
//! Every tick each listener fires a fan of primary rays. What they find (reflector sequences,
//! diffraction edges near the listener and the portals they pass through) is cached in a
//! [`ListenerScan`], which every emitter heard by that listener then searches against.

mod sampling;

pub use sampling::fibonacci_directions;

use crate::config::PropagationDesc;
use crate::geometry::{RayTracer, SurfaceKey};
use crate::id::SceneEntityId;
use crate::math::{SURFACE_EPSILON, Vec3};
use crate::output::PathFeature;
use crate::scene::Scene;
use std::collections::BTreeSet;

/// Most distinct reflector sequences kept per scan.
pub const MAX_REFLECTOR_SEQUENCES: usize = 256;

/// Transparent (non-reflective) surfaces a ray may pass before it is abandoned.
const MAX_PASS_THROUGH: u32 = 16;

/// A diffraction edge of a geometry instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeRef {
    pub instance: SceneEntityId,
    /// Index into the instance's diffraction edges
    pub edge: u32,
}

impl EdgeRef {
    pub fn feature(self) -> PathFeature {
        PathFeature::Edge {
            instance: self.instance,
            edge: self.edge,
        }
    }
}

/// Everything one listener's rays found this tick.
#[derive(Debug, Clone, PartialEq)]
pub struct ListenerScan {
    pub listener: SceneEntityId,
    pub position: Vec3,
    pub frame: u64,
    reflectors: Vec<Vec<SurfaceKey>>,
    edges: Vec<EdgeRef>,
    chains: Vec<Vec<EdgeRef>>,
    portals: Vec<SceneEntityId>,
    pub rays_cast: u32,
    pub surface_hits: u32,
}

impl Default for ListenerScan {
    /// A scan that found nothing, standing in for listeners not scanned this tick.
    fn default() -> Self {
        Self {
            listener: SceneEntityId::OUTDOORS,
            position: Vec3::ZERO,
            frame: 0,
            reflectors: Vec::new(),
            edges: Vec::new(),
            chains: Vec::new(),
            portals: Vec::new(),
            rays_cast: 0,
            surface_hits: 0,
        }
    }
}

impl ListenerScan {
    /// Reflector sequences, each ordered from the listener outward.
    pub fn reflector_sequences(&self) -> &[Vec<SurfaceKey>] {
        &self.reflectors
    }

    /// Diffraction edges of the surfaces the primary rays hit.
    pub fn edges(&self) -> &[EdgeRef] {
        &self.edges
    }

    /// Candidate edge sequences, each ordered from the listener outward.
    pub fn edge_chains(&self) -> &[Vec<EdgeRef>] {
        &self.chains
    }

    /// Portals any ray passed through.
    pub fn portals(&self) -> &[SceneEntityId] {
        &self.portals
    }
}

/// Casts the per-listener ray fan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayCaster {
    pub num_rays: u32,
    pub reflection_order: u32,
    pub diffraction_order: u32,
    pub max_path_length: f32,
    pub enable_edges: bool,
    pub max_edge_chains: usize,
}

impl RayCaster {
    pub fn new(desc: &PropagationDesc) -> Self {
        Self {
            num_rays: desc.num_primary_rays,
            reflection_order: desc.reflection_order,
            diffraction_order: desc.diffraction_order,
            max_path_length: desc.max_path_length,
            enable_edges: desc.enable_geometric_diffraction,
            max_edge_chains: desc.max_edge_chains,
        }
    }

    pub fn scan(&self, scene: &Scene, listener: SceneEntityId, position: Vec3, frame: u64) -> ListenerScan {
        let mut reflectors: BTreeSet<Vec<SurfaceKey>> = BTreeSet::new();
        let mut edges: BTreeSet<EdgeRef> = BTreeSet::new();
        let mut portals: BTreeSet<SceneEntityId> = BTreeSet::new();
        let mut surface_hits = 0;

        for direction in fibonacci_directions(self.num_rays, frame) {
            surface_hits += self.trace(
                scene,
                position,
                direction,
                &mut reflectors,
                &mut edges,
                &mut portals,
            );
        }

        let edges: Vec<EdgeRef> = edges.into_iter().collect();
        let chains = self.build_chains(scene, &edges);
        log::debug!(
            "Listener {} scan: {} reflector sequences, {} edges, {} chains, {} portals",
            listener,
            reflectors.len(),
            edges.len(),
            chains.len(),
            portals.len()
        );
        ListenerScan {
            listener,
            position,
            frame,
            reflectors: reflectors.into_iter().collect(),
            edges,
            chains,
            portals: portals.into_iter().collect(),
            rays_cast: self.num_rays,
            surface_hits,
        }
    }

    /// Follows one ray through its specular bounces. Returns the number of surfaces hit.
    fn trace(
        &self,
        scene: &Scene,
        start: Vec3,
        initial_direction: Vec3,
        reflectors: &mut BTreeSet<Vec<SurfaceKey>>,
        edges: &mut BTreeSet<EdgeRef>,
        portals: &mut BTreeSet<SceneEntityId>,
    ) -> u32 {
        let mut origin = start;
        let mut direction = initial_direction;
        let mut travelled = 0.0;
        let mut sequence: Vec<SurfaceKey> = Vec::new();
        let mut pass_through = 0;
        let mut hits = 0;

        loop {
            let remaining = self.max_path_length - travelled;
            if remaining <= SURFACE_EPSILON {
                break;
            }
            let hit = scene.cast_ray(origin, direction, remaining);
            let end = if hit.hit {
                hit.point
            } else {
                origin + direction * remaining
            };
            for portal in scene.rooms().portals().filter(|p| p.is_enabled()) {
                if portal.crossing(origin, end).is_some() {
                    portals.insert(portal.id);
                }
            }
            if !hit.hit {
                break;
            }
            hits += 1;
            travelled += hit.distance;

            if !hit.surface.reflective {
                // Transmission-only geometry; the ray carries on through it
                pass_through += 1;
                if pass_through > MAX_PASS_THROUGH {
                    break;
                }
                origin = hit.point + direction * SURFACE_EPSILON;
                continue;
            }

            if sequence.is_empty() && self.enable_edges && self.diffraction_order > 0 {
                if let Some(instance) = scene.geometry().instance(hit.surface.instance) {
                    for edge in instance.triangle_edges(hit.surface.triangle) {
                        if scene.edge_usable(instance, edge) {
                            edges.insert(EdgeRef {
                                instance: instance.id,
                                edge,
                            });
                        }
                    }
                }
            }

            if sequence.len() as u32 >= self.reflection_order {
                break;
            }
            sequence.push(hit.surface.key());
            if reflectors.len() < MAX_REFLECTOR_SEQUENCES {
                reflectors.insert(sequence.clone());
            }
            direction = direction - 2.0 * direction.dot(hit.normal) * hit.normal;
            origin = hit.point + hit.normal * SURFACE_EPSILON;
        }
        hits
    }

    /// Extends scanned edges into chains of up to the diffraction order, breadth first.
    ///
    /// Chains grow first through edges one face away on the same mesh, then edges sharing a
    /// vertex, then any other scanned edge, until the chain budget is used up.
    fn build_chains(&self, scene: &Scene, edges: &[EdgeRef]) -> Vec<Vec<EdgeRef>> {
        let budget = self.max_edge_chains;
        let mut chains: Vec<Vec<EdgeRef>> = edges.iter().take(budget).map(|e| vec![*e]).collect();
        let mut level_start = 0;
        let mut length = 1;
        while length < self.diffraction_order as usize && chains.len() < budget {
            let level_end = chains.len();
            for index in level_start..level_end {
                if chains.len() >= budget {
                    break;
                }
                let chain = chains[index].clone();
                for next in self.next_edges(scene, &chain, edges) {
                    if chains.len() >= budget {
                        break;
                    }
                    let mut extended = chain.clone();
                    extended.push(next);
                    chains.push(extended);
                }
            }
            if chains.len() == level_end {
                break;
            }
            level_start = level_end;
            length += 1;
        }
        chains
    }

    fn next_edges(&self, scene: &Scene, chain: &[EdgeRef], scanned: &[EdgeRef]) -> Vec<EdgeRef> {
        let Some(last) = chain.last().copied() else {
            return Vec::new();
        };
        let mut next: Vec<EdgeRef> = Vec::new();
        if let Some(instance) = scene.geometry().instance(last.instance) {
            let across = instance.edges_across_faces(last.edge);
            let adjacent = instance.edge_neighbours(last.edge).iter().copied();
            for edge in across.into_iter().chain(adjacent) {
                let candidate = EdgeRef {
                    instance: last.instance,
                    edge,
                };
                if scene.edge_usable(instance, edge)
                    && !chain.contains(&candidate)
                    && !next.contains(&candidate)
                {
                    next.push(candidate);
                }
            }
        }
        for candidate in scanned {
            if !chain.contains(candidate) && !next.contains(candidate) {
                next.push(*candidate);
            }
        }
        next
    }
}
