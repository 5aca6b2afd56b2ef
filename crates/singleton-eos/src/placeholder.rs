use crate::active::ActiveServiceGroup;
use crate::error::Error;
use crate::registration::ServiceRegistration;
use crate::signal::CloseSignal;

use std::sync::{Arc, OnceLock};

use mandate_ownership::{Entity, EntityOwnershipService, EntityOwnershipStateChange};
use mandate_singleton::ServiceGroupIdentifier;
use parking_lot::Mutex;
use tracing::debug;

/// Stands in for a service group while its previous incarnation shuts down.
///
/// Registrations made in the meantime are buffered and handed to the
/// successor group once the previous one has fully closed.
pub(crate) struct PlaceholderServiceGroup<S: EntityOwnershipService> {
    previous: Arc<ActiveServiceGroup<S>>,
    close_signal: CloseSignal,
    services: Mutex<Vec<Arc<ServiceRegistration>>>,
    successor: OnceLock<Arc<ActiveServiceGroup<S>>>,
}

impl<S: EntityOwnershipService> PlaceholderServiceGroup<S> {
    pub(crate) fn new(previous: Arc<ActiveServiceGroup<S>>, close_signal: CloseSignal) -> Self {
        Self {
            previous,
            close_signal,
            services: Mutex::new(Vec::new()),
            successor: OnceLock::new(),
        }
    }

    pub(crate) fn identifier(&self) -> &ServiceGroupIdentifier {
        self.previous.identifier()
    }

    pub(crate) fn register_service(&self, registration: &Arc<ServiceRegistration>) -> Result<(), Error> {
        self.verify_no_successor()?;
        if registration.identifier() != self.identifier() {
            return Err(Error::IdentifierMismatch {
                expected: self.identifier().clone(),
                actual: registration.identifier().clone(),
            });
        }

        self.services.lock().push(registration.clone());
        debug!(
            "Service {} was added to placeholder of {}",
            registration,
            self.identifier()
        );
        Ok(())
    }

    pub(crate) fn unregister_service(
        &self,
        registration: &Arc<ServiceRegistration>,
    ) -> Result<(), Error> {
        self.verify_no_successor()?;

        let mut services = self.services.lock();
        let before = services.len();
        services.retain(|service| service != registration);
        if services.len() == before {
            return Err(Error::UnknownRegistration(self.identifier().clone()));
        }

        debug!(
            "Service {} was removed from placeholder of {}",
            registration,
            self.identifier()
        );
        Ok(())
    }

    /// Registrations buffered while the previous group was closing.
    pub(crate) fn services(&self) -> Vec<Arc<ServiceRegistration>> {
        self.services.lock().clone()
    }

    /// # Panics
    /// If a successor was already installed.
    pub(crate) fn set_successor(&self, successor: Arc<ActiveServiceGroup<S>>) {
        assert!(
            self.successor.set(successor).is_ok(),
            "placeholder of {} already has a successor",
            self.identifier()
        );
    }

    pub(crate) fn ownership_changed(
        &self,
        entity: &Entity,
        change: EntityOwnershipStateChange,
        in_jeopardy: bool,
    ) {
        // Changes racing with the hand-over may belong to either incarnation.
        self.current().ownership_changed(entity, change, in_jeopardy);
    }

    pub(crate) fn close_cluster_singleton_group(&self) -> CloseSignal {
        match self.successor.get() {
            Some(successor) => successor.close_cluster_singleton_group(),
            None => {
                self.previous.close_cluster_singleton_group();
                self.close_signal.clone()
            }
        }
    }

    fn current(&self) -> &Arc<ActiveServiceGroup<S>> {
        self.successor.get().unwrap_or(&self.previous)
    }

    fn verify_no_successor(&self) -> Result<(), Error> {
        if self.successor.get().is_some() {
            Err(Error::GroupSuperseded(self.identifier().clone()))
        } else {
            Ok(())
        }
    }
}
