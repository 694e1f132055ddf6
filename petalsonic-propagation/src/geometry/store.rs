//! Engine-owned geometry: sets, their instances and the scene-level index.

use super::bvh::Bvh;
use super::instance::GeometryInstance;
use super::mesh::GeometrySet;
use super::ray::{HitSurface, MAX_SEGMENT_HITS, RayHit, RayTracer};
use crate::config::{GeometryInstanceParams, GeometryParams};
use crate::error::{PropagationError, Result};
use crate::id::{GeometrySetId, SceneEntityId};
use crate::math::{Aabb, SURFACE_EPSILON, Vec3};
use std::collections::HashMap;
use std::sync::Arc;

/// Owns geometry sets and instances and answers ray queries over them.
///
/// Every instance keeps its own BVH in world space. The scene level is a second BVH over
/// instance bounds, rebuilt by [`commit`](Self::commit) after a batch of changes; this only
/// costs one box per instance, so a change never rebuilds other instances' trees.
#[derive(Debug, Clone, Default)]
pub struct GeometryStore {
    sets: HashMap<GeometrySetId, Arc<GeometrySet>>,
    instances: HashMap<SceneEntityId, Arc<GeometryInstance>>,
    indexed: Vec<SceneEntityId>,
    top_level: Bvh,
    dirty: bool,
    memory_budget: Option<usize>,
}

impl GeometryStore {
    pub fn new(memory_budget: Option<usize>) -> Self {
        Self {
            memory_budget,
            ..Default::default()
        }
    }

    /// Creates or replaces a geometry set. Instances of a replaced set are rebuilt on the new
    /// mesh; their IDs are returned.
    pub fn set_geometry(&mut self, id: GeometrySetId, params: &GeometryParams) -> Vec<SceneEntityId> {
        let set = Arc::new(GeometrySet::build(id, params));
        self.sets.insert(id, Arc::clone(&set));

        let dependents = self.instances_of(id);
        for instance_id in &dependents {
            if let Some(old) = self.instances.get(instance_id) {
                let params = old.params.clone();
                let rebuilt =
                    GeometryInstance::build(*instance_id, params, Arc::clone(&set), self.memory_budget);
                self.instances.insert(*instance_id, Arc::new(rebuilt));
            }
        }
        self.dirty = true;
        dependents
    }

    /// Removes a geometry set and every instance placing it; returns the removed instances.
    pub fn remove_geometry(&mut self, id: GeometrySetId) -> Vec<SceneEntityId> {
        if self.sets.remove(&id).is_none() {
            return Vec::new();
        }
        let dependents = self.instances_of(id);
        for instance_id in &dependents {
            self.instances.remove(instance_id);
        }
        self.dirty = true;
        dependents
    }

    /// Creates or moves an instance. Returns whether the new instance is degraded.
    ///
    /// # Errors
    ///
    /// Returns [`PropagationError::NotFound`] if the referenced geometry set does not exist.
    pub fn set_instance(&mut self, id: SceneEntityId, params: GeometryInstanceParams) -> Result<bool> {
        let set = self
            .sets
            .get(&params.geometry_set)
            .cloned()
            .ok_or_else(|| {
                PropagationError::NotFound(format!(
                    "geometry set {} for instance {}",
                    params.geometry_set, id
                ))
            })?;
        let instance = GeometryInstance::build(id, params, set, self.memory_budget);
        let degraded = instance.is_degraded();
        self.instances.insert(id, Arc::new(instance));
        self.dirty = true;
        Ok(degraded)
    }

    pub fn remove_instance(&mut self, id: SceneEntityId) -> bool {
        let removed = self.instances.remove(&id).is_some();
        self.dirty |= removed;
        removed
    }

    /// Rebuilds the scene-level index if anything changed since the last commit.
    pub fn commit(&mut self) {
        if !self.dirty {
            return;
        }
        let mut indexed: Vec<SceneEntityId> = self.instances.keys().copied().collect();
        indexed.sort_unstable();
        let boxes: Vec<Aabb> = indexed
            .iter()
            .map(|id| {
                self.instances
                    .get(id)
                    .map_or(Aabb::EMPTY, |instance| instance.bounds())
            })
            .collect();
        match Bvh::build(&boxes) {
            Ok(bvh) => {
                self.top_level = bvh;
                self.indexed = indexed;
            }
            Err(e) => {
                // Keep answering from the previous index
                log::error!("Failed to rebuild scene geometry index: {}", e);
            }
        }
        self.dirty = false;
    }

    pub fn has_geometry(&self, id: GeometrySetId) -> bool {
        self.sets.contains_key(&id)
    }

    pub fn geometry(&self, id: GeometrySetId) -> Option<&Arc<GeometrySet>> {
        self.sets.get(&id)
    }

    pub fn instance(&self, id: SceneEntityId) -> Option<&GeometryInstance> {
        self.instances.get(&id).map(Arc::as_ref)
    }

    pub fn instances(&self) -> impl Iterator<Item = &GeometryInstance> {
        self.instances.values().map(Arc::as_ref)
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn geometry_count(&self) -> usize {
        self.sets.len()
    }

    fn instances_of(&self, set: GeometrySetId) -> Vec<SceneEntityId> {
        let mut ids: Vec<SceneEntityId> = self
            .instances
            .values()
            .filter(|i| i.params.geometry_set == set)
            .map(|i| i.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Instances whose bounds the ray enters before `max_distance`.
    fn for_each_candidate<'a, F>(&'a self, origin: Vec3, direction: Vec3, max_distance: f32, mut visit: F)
    where
        F: FnMut(&'a GeometryInstance),
    {
        self.top_level
            .traverse(origin, direction, max_distance, |slot| {
                let instance = self
                    .indexed
                    .get(slot as usize)
                    .and_then(|id| self.instances.get(id));
                if let Some(instance) = instance {
                    if !instance.is_degraded() {
                        visit(instance.as_ref());
                    }
                }
                None
            });
    }

    /// Nearest surface along a ray among hits `accept` lets through.
    pub fn cast_ray_filtered<A>(&self, origin: Vec3, direction: Vec3, max_distance: f32, accept: A) -> RayHit
    where
        A: Fn(&GeometryInstance, Vec3) -> bool,
    {
        let mut best: Option<(f32, &GeometryInstance, u32)> = None;
        self.for_each_candidate(origin, direction, max_distance, |instance| {
            let limit = best.map_or(max_distance, |(t, _, _)| t);
            instance.for_each_hit(origin, direction, limit, |t, triangle| {
                let closer = best.is_none_or(|(b, _, _)| t < b);
                if closer && accept(instance, origin + direction * t) {
                    best = Some((t, instance, triangle));
                }
            });
        });
        match best {
            Some((t, instance, triangle)) => make_hit(origin, direction, t, instance, triangle),
            None => RayHit::miss(),
        }
    }

    /// Every accepted surface crossed by `from → to`, sorted by distance.
    ///
    /// Coincident hits on the same instance (a ray through a shared edge) are reported once.
    pub fn segment_hits_filtered<A>(&self, from: Vec3, to: Vec3, accept: A, hits: &mut Vec<RayHit>)
    where
        A: Fn(&GeometryInstance, Vec3) -> bool,
    {
        let length = from.distance(to);
        if length <= SURFACE_EPSILON {
            return;
        }
        let direction = (to - from) / length;
        let start = hits.len();
        self.for_each_candidate(from, direction, length, |instance| {
            instance.for_each_hit(from, direction, length, |t, triangle| {
                if accept(instance, from + direction * t) {
                    hits.push(make_hit(from, direction, t, instance, triangle));
                }
            });
        });
        let segment = &mut hits[start..];
        segment.sort_unstable_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.surface.instance.cmp(&b.surface.instance))
        });
        let mut kept = start;
        for i in start..hits.len() {
            let duplicate = kept > start && {
                let prev = &hits[kept - 1];
                prev.surface.instance == hits[i].surface.instance
                    && (hits[i].distance - prev.distance).abs() < SURFACE_EPSILON
            };
            if !duplicate {
                hits[kept] = hits[i];
                kept += 1;
            }
        }
        hits.truncate(kept.min(start + MAX_SEGMENT_HITS));
    }

    /// First solid instance containing `point`, if any.
    pub fn point_in_solid(&self, point: Vec3) -> Option<SceneEntityId> {
        let mut found = None;
        self.top_level.query_point(point, |slot| {
            if found.is_some() {
                return;
            }
            let instance = self
                .indexed
                .get(slot as usize)
                .and_then(|id| self.instances.get(id));
            if let Some(instance) = instance {
                if instance.is_solid() && instance.contains_point(point) {
                    found = Some(instance.id);
                }
            }
        });
        found
    }

    /// Whether the closed mesh of instance `id` contains `point`.
    pub fn instance_contains(&self, id: SceneEntityId, point: Vec3) -> bool {
        self.instances
            .get(&id)
            .is_some_and(|instance| instance.contains_point(point))
    }
}

fn make_hit(origin: Vec3, direction: Vec3, t: f32, instance: &GeometryInstance, triangle: u32) -> RayHit {
    let mut normal = instance.normal(triangle);
    if normal.dot(direction) > 0.0 {
        normal = -normal;
    }
    let surface: HitSurface = instance.hit_surface(triangle);
    RayHit::new(t, origin + direction * t, normal, surface)
}

impl RayTracer for GeometryStore {
    fn cast_ray(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> RayHit {
        self.cast_ray_filtered(origin, direction, max_distance, |_, _| true)
    }

    fn segment_hits(&self, from: Vec3, to: Vec3, hits: &mut Vec<RayHit>) {
        self.segment_hits_filtered(from, to, |_, _| true, hits)
    }
}
