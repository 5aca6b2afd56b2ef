//! Abstract interface for cluster-wide entity ownership (candidate election).
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod change;
mod entity;
mod error;
mod registration;

pub use change::{EntityOwnershipState, EntityOwnershipStateChange};
pub use entity::Entity;
pub use error::CandidateAlreadyRegisteredError;
pub use registration::Registration;

use std::sync::Arc;

/// Receives ownership changes for every entity of the type it was registered for.
///
/// Implementations are called from whatever thread the ownership service
/// delivers notifications on and must not block.
pub trait EntityOwnershipListener: Send + Sync + 'static {
    /// Invoked when the local view of an entity's ownership changes.
    ///
    /// # Arguments
    /// * `entity`: The entity whose ownership changed.
    /// * `change`: What changed, from the point of view of the local node.
    /// * `in_jeopardy`: Whether the global ownership state is currently uncertain.
    fn ownership_changed(
        &self,
        entity: &Entity,
        change: EntityOwnershipStateChange,
        in_jeopardy: bool,
    );
}

/// A service electing a single owner among the candidates registered for an entity.
///
/// Ownership is stable: registering a new candidate never moves ownership away
/// from the current owner. Registrations are released when closed or dropped.
pub trait EntityOwnershipService: Send + Sync + 'static {
    /// Registers the local node as a candidate for ownership of `entity`.
    ///
    /// # Errors
    /// Returns [`CandidateAlreadyRegisteredError`] if the local node already has
    /// a candidate registration for the entity.
    fn register_candidate(&self, entity: &Entity)
    -> Result<Registration, CandidateAlreadyRegisteredError>;

    /// Registers a listener for ownership changes of all entities of `entity_type`.
    fn register_listener(
        &self,
        entity_type: &str,
        listener: Arc<dyn EntityOwnershipListener>,
    ) -> Registration;

    /// Returns the current ownership state of `entity`, if it is known.
    fn ownership_state(&self, entity: &Entity) -> Option<EntityOwnershipState>;

    /// Checks whether the local node has a candidate registered for `entity`.
    fn is_candidate_registered(&self, entity: &Entity) -> bool;
}
