//! Error types for PetalSonic propagation

use crate::id::{EntityKind, SceneEntityId};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PropagationError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid parameter: ID {id} is already used by a {existing:?}, cannot register a {requested:?}")]
    IdCollision {
        id: SceneEntityId,
        existing: EntityKind,
        requested: EntityKind,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Engine error: {0}")]
    Engine(String),
}

impl PropagationError {
    /// True for every rejection the caller caused with a bad argument, including ID collisions.
    pub fn is_invalid_parameter(&self) -> bool {
        matches!(
            self,
            Self::InvalidParameter(_) | Self::IdCollision { .. } | Self::Configuration(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, PropagationError>;
