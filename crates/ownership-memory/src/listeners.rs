use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use mandate_ownership::{Entity, EntityOwnershipListener, EntityOwnershipStateChange, Registration};
use parking_lot::Mutex;
use tracing::{debug, trace};
use uuid::Uuid;

type Listeners = HashMap<String, Vec<(u64, Arc<dyn EntityOwnershipListener>)>>;

/// Listeners keyed by entity type, shared by the in-memory services.
#[derive(Clone)]
pub(crate) struct ListenerRegistry {
    inner: Arc<Inner>,
}

struct Inner {
    uuid: Uuid,
    next_id: AtomicU64,
    listeners: Mutex<Listeners>,
}

impl ListenerRegistry {
    pub(crate) fn new(uuid: Uuid) -> Self {
        Self {
            inner: Arc::new(Inner {
                uuid,
                next_id: AtomicU64::new(0),
                listeners: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub(crate) fn register(
        &self,
        entity_type: &str,
        listener: Arc<dyn EntityOwnershipListener>,
    ) -> Registration {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .lock()
            .entry(entity_type.to_string())
            .or_default()
            .push((id, listener));
        debug!("{}: registered listener {} for {}", self.inner.uuid, id, entity_type);

        let registry: Weak<Inner> = Arc::downgrade(&self.inner);
        let entity_type = entity_type.to_string();
        Registration::new(move || {
            if let Some(inner) = registry.upgrade() {
                let mut listeners = inner.listeners.lock();
                if let Some(registered) = listeners.get_mut(&entity_type) {
                    registered.retain(|(registered_id, _)| *registered_id != id);
                    if registered.is_empty() {
                        listeners.remove(&entity_type);
                    }
                }
                debug!("{}: unregistered listener {}", inner.uuid, id);
            }
        })
    }

    pub(crate) fn listener_count(&self, entity_type: &str) -> usize {
        self.inner
            .listeners
            .lock()
            .get(entity_type)
            .map_or(0, Vec::len)
    }

    /// Delivers a change to every listener of the entity's type. The listener
    /// set is snapshotted so listeners may (un)register from the callback.
    pub(crate) fn notify(
        &self,
        entity: &Entity,
        change: EntityOwnershipStateChange,
        in_jeopardy: bool,
    ) {
        let snapshot: Vec<Arc<dyn EntityOwnershipListener>> = self
            .inner
            .listeners
            .lock()
            .get(entity.entity_type())
            .map(|registered| registered.iter().map(|(_, l)| l.clone()).collect())
            .unwrap_or_default();

        for listener in snapshot {
            Self::notify_one(self.inner.uuid, &listener, entity, change, in_jeopardy);
        }
    }

    pub(crate) fn notify_one(
        uuid: Uuid,
        listener: &Arc<dyn EntityOwnershipListener>,
        entity: &Entity,
        change: EntityOwnershipStateChange,
        in_jeopardy: bool,
    ) {
        trace!(
            "{}: notifying {} change {} in_jeopardy={}",
            uuid, entity, change, in_jeopardy
        );
        listener.ownership_changed(entity, change, in_jeopardy);
    }
}
