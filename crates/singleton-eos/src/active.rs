use crate::error::Error;
use crate::registration::ServiceRegistration;
use crate::service_info::{ServiceInfo, ServiceState, StopCompletion};
use crate::signal::CloseSignal;

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use dashmap::DashSet;
use futures::FutureExt;
use mandate_ownership::{Entity, EntityOwnershipService, EntityOwnershipStateChange, Registration};
use mandate_singleton::ServiceGroupIdentifier;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

/// Local view of the ownership of one of the group's entities.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum EntityState {
    /// No candidate registered.
    Unregistered,

    /// Candidate registered, no ownership notification received yet.
    Registered,

    /// This node owns the entity.
    Owned,

    /// This node owns the entity, but the cluster may not agree.
    OwnedJeopardy,

    /// Another node owns the entity, or nobody does.
    Unowned,
}

impl EntityState {
    /// State implied by an ownership change, if the change is understood.
    const fn after(change: EntityOwnershipStateChange, in_jeopardy: bool) -> Option<Self> {
        match change {
            EntityOwnershipStateChange::LocalOwnershipGranted
            | EntityOwnershipStateChange::LocalOwnershipRetainedWithNoChange => {
                Some(if in_jeopardy {
                    Self::OwnedJeopardy
                } else {
                    Self::Owned
                })
            }
            EntityOwnershipStateChange::LocalOwnershipLostNewOwner
            | EntityOwnershipStateChange::LocalOwnershipLostNoOwner
            | EntityOwnershipStateChange::RemoteOwnershipChanged
            | EntityOwnershipStateChange::RemoteOwnershipLostNoOwner => Some(Self::Unowned),
            _ => None,
        }
    }

    const fn is_owned(self) -> bool {
        matches!(self, Self::Owned | Self::OwnedJeopardy)
    }
}

struct EntityStates {
    service_reg: Option<Registration>,
    service_state: EntityState,
    cleanup_reg: Option<Registration>,
    cleanup_state: EntityState,
}

/// A service group which owns its entity candidacies and runs the local
/// instances of its member services.
///
/// Every input (membership changes, ownership notifications, stop
/// completions) marks the group dirty and then tries to take the
/// reconciliation lock. The holder of the lock reconciles until no input
/// remains unprocessed, so callers never block on each other and no thread
/// ever waits on user code running in another thread.
pub(crate) struct ActiveServiceGroup<S: EntityOwnershipService> {
    identifier: ServiceGroupIdentifier,
    ownership_service: Arc<S>,
    runtime: Handle,
    service_entity: Entity,
    cleanup_entity: Entity,

    members: DashSet<Arc<ServiceRegistration>>,

    // Only touched by the holder of the reconciliation lock.
    services: Mutex<HashMap<Arc<ServiceRegistration>, ServiceInfo>>,

    entities: Mutex<EntityStates>,
    close_signal: OnceLock<CloseSignal>,

    // Dirty and lock are each read after the other is written, so both use SeqCst.
    dirty: AtomicBool,
    lock: AtomicBool,
    initialized: AtomicBool,
}

impl<S: EntityOwnershipService> ActiveServiceGroup<S> {
    pub(crate) fn new(
        identifier: ServiceGroupIdentifier,
        ownership_service: Arc<S>,
        runtime: Handle,
        service_entity: Entity,
        cleanup_entity: Entity,
        services: Vec<Arc<ServiceRegistration>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            identifier,
            ownership_service,
            runtime,
            service_entity,
            cleanup_entity,
            members: services.into_iter().collect(),
            services: Mutex::new(HashMap::new()),
            entities: Mutex::new(EntityStates {
                service_reg: None,
                service_state: EntityState::Unregistered,
                cleanup_reg: None,
                cleanup_state: EntityState::Unregistered,
            }),
            close_signal: OnceLock::new(),
            dirty: AtomicBool::new(false),
            lock: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
        })
    }

    pub(crate) const fn identifier(&self) -> &ServiceGroupIdentifier {
        &self.identifier
    }

    /// Registers the candidacy for the service entity.
    pub(crate) fn initialize(self: &Arc<Self>) -> Result<(), Error> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyInitialized(self.identifier.clone()));
        }

        debug!(
            "Initializing service group {} with {} services",
            self.identifier,
            self.members.len()
        );

        // The ownership service may notify us before returning the registration.
        self.entities.lock().service_state = EntityState::Registered;
        match self.ownership_service.register_candidate(&self.service_entity) {
            Ok(registration) => self.entities.lock().service_reg = Some(registration),
            Err(source) => {
                self.entities.lock().service_state = EntityState::Unregistered;
                return Err(Error::CandidateAlreadyRegistered {
                    identifier: self.identifier.clone(),
                    source,
                });
            }
        }

        self.mark_dirty();
        self.try_reconcile();
        Ok(())
    }

    pub(crate) fn register_service(
        self: &Arc<Self>,
        registration: &Arc<ServiceRegistration>,
    ) -> Result<(), Error> {
        self.verify_registration(registration)?;
        self.check_not_closed()?;
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(Error::NotInitialized(self.identifier.clone()));
        }

        debug!(
            "Adding service {} to service group {}",
            registration, self.identifier
        );
        let added = self.members.insert(registration.clone());
        debug_assert!(added, "registration {registration} added twice");

        self.mark_dirty();
        self.try_reconcile();
        Ok(())
    }

    /// Removes a member. Returns the close signal if this was the last member,
    /// in which case the group is now closing and the caller is expected to
    /// call [`Self::close_cluster_singleton_group`] once it no longer routes
    /// registrations here.
    pub(crate) fn unregister_service(
        self: &Arc<Self>,
        registration: &Arc<ServiceRegistration>,
    ) -> Result<Option<CloseSignal>, Error> {
        self.verify_registration(registration)?;
        self.check_not_closed()?;

        if self.members.remove(registration).is_none() {
            return Err(Error::UnknownRegistration(self.identifier.clone()));
        }
        debug!(
            "Removed service {} from service group {}",
            registration, self.identifier
        );

        self.mark_dirty();
        if self.members.is_empty() {
            return Ok(Some(self.destroy_group()));
        }

        self.try_reconcile();
        Ok(None)
    }

    /// Closes the group. Idempotent; always returns the same signal.
    pub(crate) fn close_cluster_singleton_group(self: &Arc<Self>) -> CloseSignal {
        let signal = self.destroy_group();

        let service_reg = self.entities.lock().service_reg.take();
        if let Some(registration) = service_reg {
            debug!("Service group {} unregistering service entity", self.identifier);
            registration.close();
        }

        self.members.clear();
        self.mark_dirty();
        self.try_reconcile();
        signal
    }

    pub(crate) fn ownership_changed(
        self: &Arc<Self>,
        entity: &Entity,
        change: EntityOwnershipStateChange,
        in_jeopardy: bool,
    ) {
        debug!(
            "Ownership change {} for service group {} entity {} in_jeopardy={}",
            change, self.identifier, entity, in_jeopardy
        );

        let applied = {
            let mut entities = self.entities.lock();
            if *entity == self.service_entity {
                self.service_ownership_changed(&mut entities, change, in_jeopardy)
            } else if *entity == self.cleanup_entity {
                self.cleanup_ownership_changed(&mut entities, change, in_jeopardy)
            } else {
                warn!(
                    "Service group {} received change {} for unknown entity {}",
                    self.identifier, change, entity
                );
                false
            }
        };

        if applied {
            self.mark_dirty();
            self.try_reconcile();
        }
    }

    fn service_ownership_changed(
        &self,
        entities: &mut EntityStates,
        change: EntityOwnershipStateChange,
        in_jeopardy: bool,
    ) -> bool {
        let Some(next) = EntityState::after(change, in_jeopardy) else {
            warn!(
                "Service group {} ignoring unhandled service entity change {}",
                self.identifier, change
            );
            return false;
        };

        if in_jeopardy {
            info!(
                "Service group {} service entity ownership uncertain",
                self.identifier
            );
        } else if entities.service_state == EntityState::OwnedJeopardy {
            info!(
                "Service group {} service entity ownership ascertained",
                self.identifier
            );
        }

        match (entities.service_state.is_owned(), next.is_owned()) {
            (false, true) => debug!("Service group {} acquired service entity", self.identifier),
            (true, false) => debug!("Service group {} lost service entity", self.identifier),
            _ => {}
        }

        entities.service_state = next;
        true
    }

    fn cleanup_ownership_changed(
        &self,
        entities: &mut EntityStates,
        change: EntityOwnershipStateChange,
        in_jeopardy: bool,
    ) -> bool {
        let Some(next) = EntityState::after(change, in_jeopardy) else {
            warn!(
                "Service group {} ignoring unhandled cleanup entity change {}",
                self.identifier, change
            );
            return false;
        };

        match next {
            EntityState::OwnedJeopardy => warn!(
                "Service group {} cleanup entity owned without certainty",
                self.identifier
            ),
            EntityState::Owned => debug!("Service group {} acquired cleanup entity", self.identifier),
            EntityState::Unowned if in_jeopardy => info!(
                "Service group {} cleanup entity ownership uncertain",
                self.identifier
            ),
            EntityState::Unowned => debug!("Service group {} lost cleanup entity", self.identifier),
            EntityState::Unregistered | EntityState::Registered => {}
        }

        entities.cleanup_state = next;
        true
    }

    fn service_transition_completed(self: &Arc<Self>) {
        self.mark_dirty();
        self.try_reconcile();
    }

    fn destroy_group(&self) -> CloseSignal {
        let signal = CloseSignal::new();
        if self.close_signal.set(signal.clone()).is_err() {
            return self.close_signal.get().cloned().unwrap_or(signal);
        }

        debug!("Service group {} is closing", self.identifier);
        self.mark_dirty();
        signal
    }

    fn try_reconcile(self: &Arc<Self>) {
        if self.try_lock() {
            self.reconcile_state();
        } else {
            debug!(
                "Service group {} is being reconciled elsewhere, postponing",
                self.identifier
            );
        }
    }

    /// Runs with the reconciliation lock held and releases it.
    fn reconcile_state(self: &Arc<Self>) {
        loop {
            if self.conditional_clean() {
                self.try_reconcile_state();
            }
            self.unlock();

            if !self.is_dirty() {
                debug!("Service group {} is completely reconciled", self.identifier);
                return;
            }

            if !self.try_lock() {
                debug!(
                    "Service group {} will be reconciled by someone else",
                    self.identifier
                );
                return;
            }

            debug!("Service group {} re-running reconciliation", self.identifier);
        }
    }

    fn try_reconcile_state(self: &Arc<Self>) {
        let (have_service, needs_cleanup) = {
            let entities = self.entities.lock();
            let have_service = entities.service_reg.is_some() && entities.service_state.is_owned();
            (have_service, have_service && entities.cleanup_reg.is_none())
        };

        if needs_cleanup {
            self.register_cleanup_entity();
            self.mark_dirty();
            return;
        }

        let have_cleanup = {
            let entities = self.entities.lock();
            entities.cleanup_reg.is_some() && entities.cleanup_state == EntityState::Owned
        };

        if have_service && have_cleanup {
            self.ensure_services_starting();
            return;
        }

        self.ensure_services_stopping();

        if !have_service && self.services.lock().is_empty() {
            debug!("Service group {} has no running services", self.identifier);

            let cleanup_reg = self.entities.lock().cleanup_reg.take();
            if let Some(registration) = cleanup_reg {
                debug!("Service group {} releasing cleanup entity", self.identifier);
                registration.close();
            }

            let cleanup_state = self.entities.lock().cleanup_state;
            if !matches!(
                cleanup_state,
                EntityState::Unowned | EntityState::Unregistered
            ) {
                return;
            }

            if let Some(signal) = self.close_signal.get().filter(|signal| !signal.is_complete()) {
                debug!("Service group {} completing termination", self.identifier);
                signal.complete();
            }
        }
    }

    fn register_cleanup_entity(&self) {
        debug!("Service group {} registering cleanup entity", self.identifier);

        self.entities.lock().cleanup_state = EntityState::Registered;
        match self.ownership_service.register_candidate(&self.cleanup_entity) {
            Ok(registration) => self.entities.lock().cleanup_reg = Some(registration),
            Err(e) => {
                error!(
                    "Service group {} failed to take cleanup ownership, aborting: {}",
                    self.identifier, e
                );

                let service_reg = {
                    let mut entities = self.entities.lock();
                    entities.cleanup_state = EntityState::Unregistered;
                    entities.service_state = EntityState::Unregistered;
                    entities.service_reg.take()
                };
                if let Some(registration) = service_reg {
                    registration.close();
                }
            }
        }
    }

    fn ensure_services_starting(self: &Arc<Self>) {
        let members: HashSet<Arc<ServiceRegistration>> =
            self.members.iter().map(|member| member.key().clone()).collect();
        debug!(
            "Service group {} starting {} services",
            self.identifier,
            members.len()
        );

        let mut services = self.services.lock();

        // Members still stopping from an earlier ownership are restarted once stopped.
        services.retain(|registration, info| {
            if members.contains(registration) {
                info.state() == ServiceState::Started || !info.is_stopped()
            } else {
                self.ensure_stopping(registration, info)
            }
        });

        for registration in members {
            if services.contains_key(&registration) {
                continue;
            }

            debug!(
                "Service group {} starting service {}",
                self.identifier, registration
            );
            if let Err(e) = registration.service().instantiate_service_instance() {
                warn!(
                    "Service group {} service {} failed to start, attempting to continue: {}",
                    self.identifier, registration, e
                );
                continue;
            }

            services.insert(registration, ServiceInfo::started());
        }
    }

    fn ensure_services_stopping(self: &Arc<Self>) {
        let mut services = self.services.lock();
        if !services.is_empty() {
            debug!(
                "Service group {} ensuring {} services are stopping",
                self.identifier,
                services.len()
            );
        }
        services.retain(|registration, info| self.ensure_stopping(registration, info));
    }

    /// Returns false once the service has stopped and can be forgotten.
    fn ensure_stopping(
        self: &Arc<Self>,
        registration: &Arc<ServiceRegistration>,
        info: &mut ServiceInfo,
    ) -> bool {
        match info.state() {
            ServiceState::Started => {
                debug!(
                    "Service group {} stopping service {}",
                    self.identifier, registration
                );

                let completion = StopCompletion::new();
                let stop = registration.service().close_service_instance();
                let group = self.clone();
                let service = registration.clone();
                let done = completion.clone();
                self.runtime.spawn(async move {
                    match AssertUnwindSafe(stop).catch_unwind().await {
                        Ok(Ok(())) => debug!(
                            "Service group {} service {} stopped successfully",
                            group.identifier, service
                        ),
                        Ok(Err(e)) => warn!(
                            "Service group {} service {} stopped with error: {}",
                            group.identifier, service, e
                        ),
                        Err(_) => warn!(
                            "Service group {} service {} panicked while stopping",
                            group.identifier, service
                        ),
                    }
                    done.mark();
                    group.service_transition_completed();
                });

                *info = ServiceInfo::stopping(completion);
                true
            }
            ServiceState::Stopping => {
                if info.is_stopped() {
                    debug!(
                        "Service group {} removed stopped service {}",
                        self.identifier, registration
                    );
                    false
                } else {
                    debug!(
                        "Service group {} service {} is still stopping",
                        self.identifier, registration
                    );
                    true
                }
            }
        }
    }

    fn verify_registration(&self, registration: &ServiceRegistration) -> Result<(), Error> {
        if registration.identifier() == &self.identifier {
            Ok(())
        } else {
            Err(Error::IdentifierMismatch {
                expected: self.identifier.clone(),
                actual: registration.identifier().clone(),
            })
        }
    }

    fn check_not_closed(&self) -> Result<(), Error> {
        if self.close_signal.get().is_some() {
            Err(Error::GroupClosed(self.identifier.clone()))
        } else {
            Ok(())
        }
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    fn conditional_clean(&self) -> bool {
        self.dirty
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn try_lock(&self) -> bool {
        self.lock
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn unlock(&self) {
        let released = self
            .lock
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        debug_assert!(released, "reconciliation lock was not held");
    }

    #[cfg(test)]
    fn entity_states(&self) -> (EntityState, EntityState) {
        let entities = self.entities.lock();
        (entities.service_state, entities.cleanup_state)
    }

    #[cfg(test)]
    fn service_state(&self, registration: &Arc<ServiceRegistration>) -> Option<ServiceState> {
        self.services.lock().get(registration).map(ServiceInfo::state)
    }
}
