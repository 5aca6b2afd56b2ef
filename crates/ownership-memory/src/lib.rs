//! In-memory (single node) implementations of entity ownership for local development and tests.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod listeners;
mod manual;

pub use manual::ManualOwnershipService;

use listeners::ListenerRegistry;

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Weak};

use mandate_ownership::{
    CandidateAlreadyRegisteredError, Entity, EntityOwnershipListener, EntityOwnershipService,
    EntityOwnershipState, EntityOwnershipStateChange, Registration,
};
use parking_lot::Mutex;
use tracing::{debug, trace};
use uuid::Uuid;

/// Ownership service operating as an isolated island.
///
/// It has no awareness of the world outside of itself: the first candidate
/// registered for an entity is immediately granted ownership, and ownership is
/// lost with no new owner once that candidate is released.
#[derive(Clone)]
pub struct MemoryOwnershipService {
    inner: Arc<Inner>,
}

struct Inner {
    uuid: Uuid,
    entities: Mutex<HashSet<Entity>>,
    listeners: ListenerRegistry,
}

impl MemoryOwnershipService {
    /// Creates a new instance of `MemoryOwnershipService`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_uuid(Uuid::new_v4())
    }

    fn with_uuid(uuid: Uuid) -> Self {
        Self {
            inner: Arc::new(Inner {
                uuid,
                entities: Mutex::new(HashSet::new()),
                listeners: ListenerRegistry::new(uuid),
            }),
        }
    }

    /// Number of listeners currently registered for `entity_type`.
    #[must_use]
    pub fn listener_count(&self, entity_type: &str) -> usize {
        self.inner.listeners.listener_count(entity_type)
    }

    fn remove_entity(inner: &Inner, entity: &Entity) {
        inner.entities.lock().remove(entity);
        debug!("{}: unregistered candidate {}", inner.uuid, entity);

        inner
            .listeners
            .notify(entity, EntityOwnershipStateChange::LocalOwnershipLostNoOwner, false);
    }
}

impl Default for MemoryOwnershipService {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryOwnershipService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryOwnershipService")
            .field("uuid", &self.inner.uuid)
            .field("entities", &*self.inner.entities.lock())
            .finish_non_exhaustive()
    }
}

impl EntityOwnershipService for MemoryOwnershipService {
    fn register_candidate(
        &self,
        entity: &Entity,
    ) -> Result<Registration, CandidateAlreadyRegisteredError> {
        if !self.inner.entities.lock().insert(entity.clone()) {
            return Err(CandidateAlreadyRegisteredError::new(entity.clone()));
        }
        debug!("{}: registered candidate {}", self.inner.uuid, entity);

        self.inner
            .listeners
            .notify(entity, EntityOwnershipStateChange::LocalOwnershipGranted, false);

        let service: Weak<Inner> = Arc::downgrade(&self.inner);
        let entity = entity.clone();
        Ok(Registration::new(move || {
            if let Some(inner) = service.upgrade() {
                Self::remove_entity(&inner, &entity);
            }
        }))
    }

    fn register_listener(
        &self,
        entity_type: &str,
        listener: Arc<dyn EntityOwnershipListener>,
    ) -> Registration {
        let owned: Vec<Entity> = self
            .inner
            .entities
            .lock()
            .iter()
            .filter(|entity| entity.entity_type() == entity_type)
            .cloned()
            .collect();
        trace!(
            "{}: acquired candidates {:?} for new listener",
            self.inner.uuid, owned
        );

        let registration = self.inner.listeners.register(entity_type, listener.clone());

        for entity in &owned {
            ListenerRegistry::notify_one(
                self.inner.uuid,
                &listener,
                entity,
                EntityOwnershipStateChange::LocalOwnershipGranted,
                false,
            );
        }

        registration
    }

    fn ownership_state(&self, entity: &Entity) -> Option<EntityOwnershipState> {
        self.is_candidate_registered(entity)
            .then_some(EntityOwnershipState::IsOwner)
    }

    fn is_candidate_registered(&self, entity: &Entity) -> bool {
        self.inner.entities.lock().contains(entity)
    }
}
