use crate::Entity;

use thiserror::Error;

/// The local node already has a candidate registered for an entity.
#[derive(Clone, Debug, Error)]
#[error("candidate already registered for entity {entity}")]
pub struct CandidateAlreadyRegisteredError {
    entity: Entity,
}

impl CandidateAlreadyRegisteredError {
    /// Creates a new error for `entity`.
    #[must_use]
    pub const fn new(entity: Entity) -> Self {
        Self { entity }
    }

    /// The entity which already has a candidate.
    #[must_use]
    pub const fn entity(&self) -> &Entity {
        &self.entity
    }
}
