//! Identifiers for scene entities.
//!
//! Rooms, portals, geometry instances and game objects (emitters and listeners) all share one
//! 64-bit ID space. [`SceneEntityId`] is the single handle type for that space and
//! [`IdRegistry`] is the tagged lookup table that keeps the kinds from colliding.
//! Geometry sets live in their own space ([`GeometrySetId`]).

use crate::error::{PropagationError, Result};
use std::collections::HashMap;

/// Handle into the shared room / portal / geometry-instance / game-object ID space.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SceneEntityId(pub u64);

impl SceneEntityId {
    /// The always-present outdoors room.
    pub const OUTDOORS: Self = Self(u64::MAX);

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn is_outdoors(self) -> bool {
        self == Self::OUTDOORS
    }
}

impl std::fmt::Display for SceneEntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_outdoors() {
            write!(f, "SceneEntityId(outdoors)")
        } else {
            write!(f, "SceneEntityId({})", self.0)
        }
    }
}

impl From<u64> for SceneEntityId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Caller-chosen identifier of a geometry set.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeometrySetId(pub u64);

impl std::fmt::Display for GeometrySetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GeometrySetId({})", self.0)
    }
}

impl From<u64> for GeometrySetId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Identifier of an acoustic texture (filter profile) attached to a surface.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AcousticTextureId(pub u32);

/// Kind of entity registered under a [`SceneEntityId`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EntityKind {
    GameObject,
    Room,
    Portal,
    GeometryInstance,
}

/// Tagged lookup table for the shared ID space.
#[derive(Debug, Clone, Default)]
pub struct IdRegistry {
    entries: HashMap<SceneEntityId, EntityKind>,
}

impl IdRegistry {
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        entries.insert(SceneEntityId::OUTDOORS, EntityKind::Room);
        Self { entries }
    }

    pub fn kind_of(&self, id: SceneEntityId) -> Option<EntityKind> {
        self.entries.get(&id).copied()
    }

    pub fn is(&self, id: SceneEntityId, kind: EntityKind) -> bool {
        self.kind_of(id) == Some(kind)
    }

    /// Fails if `id` is already registered as a different kind.
    pub fn check(&self, id: SceneEntityId, kind: EntityKind) -> Result<()> {
        match self.entries.get(&id) {
            Some(existing) if *existing != kind => Err(PropagationError::IdCollision {
                id,
                existing: *existing,
                requested: kind,
            }),
            _ => Ok(()),
        }
    }

    /// Registers `id` as `kind`. Re-registering with the same kind is a no-op.
    pub fn claim(&mut self, id: SceneEntityId, kind: EntityKind) -> Result<()> {
        self.check(id, kind)?;
        self.entries.insert(id, kind);
        Ok(())
    }

    /// Releases `id` if it is registered as `kind`; returns whether anything was removed.
    pub fn release(&mut self, id: SceneEntityId, kind: EntityKind) -> bool {
        if id.is_outdoors() || !self.is(id, kind) {
            return false;
        }
        self.entries.remove(&id).is_some()
    }

    pub fn ids_of(&self, kind: EntityKind) -> impl Iterator<Item = SceneEntityId> + '_ {
        self.entries
            .iter()
            .filter(move |(_, k)| **k == kind)
            .map(|(id, _)| *id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
