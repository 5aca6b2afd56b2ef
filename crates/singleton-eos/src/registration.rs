use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use mandate_singleton::{ClusterSingletonService, ServiceGroupIdentifier};
use parking_lot::Mutex;

static NEXT_REGISTRATION_ID: AtomicU64 = AtomicU64::new(0);

/// A single registered service, as tracked by its service group.
///
/// Registrations are compared by identity: registering the same service
/// object twice yields two distinct registrations.
pub(crate) struct ServiceRegistration {
    id: u64,
    service: Arc<dyn ClusterSingletonService>,
}

impl ServiceRegistration {
    pub(crate) fn new(service: Arc<dyn ClusterSingletonService>) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_REGISTRATION_ID.fetch_add(1, Ordering::Relaxed),
            service,
        })
    }

    pub(crate) fn service(&self) -> &dyn ClusterSingletonService {
        self.service.as_ref()
    }

    pub(crate) fn identifier(&self) -> &ServiceGroupIdentifier {
        self.service.identifier()
    }
}

impl PartialEq for ServiceRegistration {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ServiceRegistration {}

impl Hash for ServiceRegistration {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ServiceRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistration")
            .field("id", &self.id)
            .field("identifier", self.identifier())
            .finish()
    }
}

impl fmt::Display for ServiceRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.identifier(), self.id)
    }
}

type Remove = Box<dyn FnOnce(&Arc<ServiceRegistration>) + Send + 'static>;

/// Handle to a registered cluster singleton service.
///
/// Closing the handle, explicitly or by dropping it, unregisters the service.
/// Closing is idempotent.
#[must_use = "dropping the registration unregisters the service"]
pub struct SingletonRegistration {
    registration: Arc<ServiceRegistration>,
    remove: Mutex<Option<Remove>>,
}

impl SingletonRegistration {
    pub(crate) fn new<F>(registration: Arc<ServiceRegistration>, remove: F) -> Self
    where
        F: FnOnce(&Arc<ServiceRegistration>) + Send + 'static,
    {
        Self {
            registration,
            remove: Mutex::new(Some(Box::new(remove))),
        }
    }

    /// Identifier of the group the service belongs to.
    #[must_use]
    pub fn identifier(&self) -> &ServiceGroupIdentifier {
        self.registration.identifier()
    }

    /// The registered service.
    #[must_use]
    pub fn service(&self) -> &dyn ClusterSingletonService {
        self.registration.service()
    }

    /// Whether the registration has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.remove.lock().is_none()
    }

    /// Unregisters the service. Subsequent calls have no effect.
    pub fn close(&self) {
        let remove = self.remove.lock().take();
        if let Some(remove) = remove {
            remove(&self.registration);
        }
    }
}

impl Drop for SingletonRegistration {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for SingletonRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingletonRegistration")
            .field("registration", &self.registration)
            .field("closed", &self.is_closed())
            .finish()
    }
}
