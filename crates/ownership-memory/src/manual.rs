use crate::listeners::ListenerRegistry;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Weak};

use mandate_ownership::{
    CandidateAlreadyRegisteredError, Entity, EntityOwnershipListener, EntityOwnershipService,
    EntityOwnershipState, EntityOwnershipStateChange, Registration,
};
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Ownership service whose ownership changes are driven explicitly.
///
/// Candidate registrations are recorded but never granted on their own; the
/// owner of the service decides what every listener observes through
/// [`ManualOwnershipService::deliver`]. This makes it possible to replay the
/// exact notification sequences a clustered ownership service produces,
/// including jeopardy and remote ownership changes.
#[derive(Clone)]
pub struct ManualOwnershipService {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Candidates {
    registered: HashSet<Entity>,
    registrations: HashMap<Entity, usize>,
    releases: HashMap<Entity, usize>,
    owned: HashMap<Entity, EntityOwnershipState>,
}

struct Inner {
    uuid: Uuid,
    candidates: Mutex<Candidates>,
    listeners: ListenerRegistry,
}

impl ManualOwnershipService {
    /// Creates a new instance of `ManualOwnershipService`.
    #[must_use]
    pub fn new() -> Self {
        let uuid = Uuid::new_v4();
        Self {
            inner: Arc::new(Inner {
                uuid,
                candidates: Mutex::new(Candidates::default()),
                listeners: ListenerRegistry::new(uuid),
            }),
        }
    }

    /// Delivers an ownership change to every listener of the entity's type.
    pub fn deliver(&self, entity: &Entity, change: EntityOwnershipStateChange, in_jeopardy: bool) {
        debug!(
            "{}: delivering {} for {} in_jeopardy={}",
            self.inner.uuid, change, entity, in_jeopardy
        );
        self.inner.candidates.lock().owned.insert(
            entity.clone(),
            EntityOwnershipState::from_flags(change.is_owner(), change.has_owner()),
        );
        self.inner.listeners.notify(entity, change, in_jeopardy);
    }

    /// How many times a candidate was registered for `entity`.
    #[must_use]
    pub fn registration_count(&self, entity: &Entity) -> usize {
        self.inner
            .candidates
            .lock()
            .registrations
            .get(entity)
            .copied()
            .unwrap_or_default()
    }

    /// How many times a candidate registration for `entity` was released.
    #[must_use]
    pub fn release_count(&self, entity: &Entity) -> usize {
        self.inner
            .candidates
            .lock()
            .releases
            .get(entity)
            .copied()
            .unwrap_or_default()
    }

    /// Number of listeners currently registered for `entity_type`.
    #[must_use]
    pub fn listener_count(&self, entity_type: &str) -> usize {
        self.inner.listeners.listener_count(entity_type)
    }
}

impl Default for ManualOwnershipService {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ManualOwnershipService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualOwnershipService")
            .field("uuid", &self.inner.uuid)
            .field("candidates", &self.inner.candidates.lock().registered)
            .finish_non_exhaustive()
    }
}

impl EntityOwnershipService for ManualOwnershipService {
    fn register_candidate(
        &self,
        entity: &Entity,
    ) -> Result<Registration, CandidateAlreadyRegisteredError> {
        {
            let mut candidates = self.inner.candidates.lock();
            if !candidates.registered.insert(entity.clone()) {
                return Err(CandidateAlreadyRegisteredError::new(entity.clone()));
            }
            *candidates.registrations.entry(entity.clone()).or_default() += 1;
        }
        debug!("{}: registered candidate {}", self.inner.uuid, entity);

        let service: Weak<Inner> = Arc::downgrade(&self.inner);
        let entity = entity.clone();
        Ok(Registration::new(move || {
            if let Some(inner) = service.upgrade() {
                let mut candidates = inner.candidates.lock();
                candidates.registered.remove(&entity);
                *candidates.releases.entry(entity.clone()).or_default() += 1;
                debug!("{}: released candidate {}", inner.uuid, entity);
            }
        }))
    }

    fn register_listener(
        &self,
        entity_type: &str,
        listener: Arc<dyn EntityOwnershipListener>,
    ) -> Registration {
        self.inner.listeners.register(entity_type, listener)
    }

    fn ownership_state(&self, entity: &Entity) -> Option<EntityOwnershipState> {
        self.inner.candidates.lock().owned.get(entity).copied()
    }

    fn is_candidate_registered(&self, entity: &Entity) -> bool {
        self.inner.candidates.lock().registered.contains(entity)
    }
}
