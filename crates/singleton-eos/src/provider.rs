use crate::active::ActiveServiceGroup;
use crate::config::ProviderConfig;
use crate::error::Error;
use crate::group::ServiceGroup;
use crate::placeholder::PlaceholderServiceGroup;
use crate::registration::{ServiceRegistration, SingletonRegistration};
use crate::signal::CloseSignal;

use std::fmt;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use futures::future::join_all;
use mandate_ownership::{
    Entity, EntityOwnershipListener, EntityOwnershipService, EntityOwnershipStateChange,
    Registration,
};
use mandate_singleton::{
    ClusterSingletonService, ClusterSingletonServiceProvider, ServiceGroupIdentifier,
};
use parking_lot::{Mutex, ReentrantMutex};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

/// Cluster singleton service provider backed by an entity ownership service.
///
/// Each service group is elected through two entities: the service entity
/// decides which node should run the group, the cleanup entity makes sure a
/// new owner does not start before the previous one has finished stopping.
pub struct EosClusterSingletonServiceProvider<S: EntityOwnershipService> {
    inner: Arc<Inner<S>>,
}

struct ListenerRegistrations {
    service: Registration,
    cleanup: Registration,
}

impl ListenerRegistrations {
    fn close(self) {
        self.service.close();
        self.cleanup.close();
    }
}

struct Inner<S: EntityOwnershipService> {
    ownership_service: Arc<S>,
    service_entity_type: String,
    cleanup_entity_type: String,
    runtime: Handle,
    groups: DashMap<String, ServiceGroup<S>>,

    // Serializes structural changes to `groups`. Reentrant because services
    // may register or unregister from inside their start and stop callbacks.
    lock: ReentrantMutex<()>,

    // None once the provider is closed.
    listener_registrations: Mutex<Option<ListenerRegistrations>>,
}

impl<S: EntityOwnershipService> EosClusterSingletonServiceProvider<S> {
    /// Creates a provider with the default configuration.
    ///
    /// # Errors
    /// Fails if called outside of a tokio runtime.
    pub fn new(ownership_service: Arc<S>) -> Result<Self, Error> {
        Self::with_config(ownership_service, ProviderConfig::default())
    }

    /// Creates a provider and subscribes to both entity types.
    ///
    /// # Errors
    /// Fails if no runtime is configured and called outside of a tokio runtime.
    pub fn with_config(ownership_service: Arc<S>, config: ProviderConfig) -> Result<Self, Error> {
        let runtime = match config.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current()?,
        };

        let inner = Arc::new(Inner {
            ownership_service,
            service_entity_type: config.service_entity_type,
            cleanup_entity_type: config.cleanup_entity_type,
            runtime,
            groups: DashMap::new(),
            lock: ReentrantMutex::new(()),
            listener_registrations: Mutex::new(None),
        });

        let listener: Arc<dyn EntityOwnershipListener> = Arc::new(ProviderListener {
            provider: Arc::downgrade(&inner),
        });
        let service = inner
            .ownership_service
            .register_listener(&inner.service_entity_type, listener.clone());
        let cleanup = inner
            .ownership_service
            .register_listener(&inner.cleanup_entity_type, listener);
        *inner.listener_registrations.lock() = Some(ListenerRegistrations { service, cleanup });

        info!("Cluster singleton service provider started");
        Ok(Self { inner })
    }

    /// Registers a service with the group named by its identifier.
    ///
    /// # Errors
    /// Fails if the provider is closed or the group cannot be created.
    pub fn register_cluster_singleton_service(
        &self,
        service: Arc<dyn ClusterSingletonService>,
    ) -> Result<SingletonRegistration, Error> {
        let registration = self.inner.register(service)?;

        let provider = Arc::downgrade(&self.inner);
        Ok(SingletonRegistration::new(registration, move |registration| {
            if let Some(provider) = provider.upgrade() {
                provider.remove_registration(registration);
            }
        }))
    }

    /// Closes every group and waits until all of them have shut down.
    ///
    /// Subsequent calls return immediately.
    pub async fn close(&self) {
        let Some((registrations, groups)) = self.inner.begin_close() else {
            return;
        };

        info!("Cluster singleton service provider stopping");
        let signals: Vec<CloseSignal> = groups
            .iter()
            .map(|group| {
                debug!("Closing service group {}", group.identifier());
                group.close_cluster_singleton_group()
            })
            .collect();

        join_all(signals.iter().map(CloseSignal::wait)).await;

        registrations.close();
        self.inner.groups.clear();
        info!("Cluster singleton service provider stopped");
    }

    /// Whether the provider has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Number of service groups currently tracked, including ones still closing.
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.inner.groups.len()
    }
}

impl<S: EntityOwnershipService> Inner<S> {
    fn is_closed(&self) -> bool {
        self.listener_registrations.lock().is_none()
    }

    fn lookup(&self, identifier: &str) -> Option<ServiceGroup<S>> {
        self.groups.get(identifier).map(|group| group.value().clone())
    }

    fn register(
        &self,
        service: Arc<dyn ClusterSingletonService>,
    ) -> Result<Arc<ServiceRegistration>, Error> {
        let identifier = service.identifier().clone();
        let _guard = self.lock.lock();
        if self.is_closed() {
            return Err(Error::ProviderClosed);
        }

        debug!("Registering service with service group {}", identifier);
        let group = match self.lookup(identifier.value()) {
            Some(group) => group,
            None => {
                let group = self.create_group(&identifier, Vec::new());
                self.groups
                    .insert(identifier.value().to_string(), ServiceGroup::Active(group.clone()));
                self.initialize_or_remove_group(&group)?;
                ServiceGroup::Active(group)
            }
        };

        let registration = ServiceRegistration::new(service);
        group.register_service(&registration)?;
        Ok(registration)
    }

    fn create_group(
        &self,
        identifier: &ServiceGroupIdentifier,
        services: Vec<Arc<ServiceRegistration>>,
    ) -> Arc<ActiveServiceGroup<S>> {
        ActiveServiceGroup::new(
            identifier.clone(),
            self.ownership_service.clone(),
            self.runtime.clone(),
            Entity::new(self.service_entity_type.as_str(), identifier.value()),
            Entity::new(self.cleanup_entity_type.as_str(), identifier.value()),
            services,
        )
    }

    fn initialize_or_remove_group(&self, group: &Arc<ActiveServiceGroup<S>>) -> Result<(), Error> {
        if let Err(e) = group.initialize() {
            warn!("Failed to initialize service group {}: {}", group.identifier(), e);
            self.groups
                .remove_if(group.identifier().value(), |_, current| current.is_active(group));
            return Err(e);
        }
        Ok(())
    }

    /// Replaces the group for `identifier` if `current` matches it.
    fn replace_group<F>(&self, identifier: &str, current: F, replacement: ServiceGroup<S>) -> bool
    where
        F: FnOnce(&ServiceGroup<S>) -> bool,
    {
        match self.groups.get_mut(identifier) {
            Some(mut group) if current(group.value()) => {
                *group.value_mut() = replacement;
                true
            }
            _ => false,
        }
    }

    fn remove_registration(self: &Arc<Self>, registration: &Arc<ServiceRegistration>) {
        let identifier = registration.identifier();

        let (placeholder, signal) = {
            let _guard = self.lock.lock();
            let active = match self.lookup(identifier.value()) {
                Some(ServiceGroup::Active(active)) => active,
                Some(ServiceGroup::Placeholder(placeholder)) => {
                    if let Err(e) = placeholder.unregister_service(registration) {
                        warn!("Failed to unregister service {}: {}", registration, e);
                    }
                    return;
                }
                None => {
                    debug!("No service group {} found for {}", identifier, registration);
                    return;
                }
            };

            let signal = match active.unregister_service(registration) {
                Ok(Some(signal)) => signal,
                Ok(None) => return,
                Err(e) => {
                    warn!("Failed to unregister service {}: {}", registration, e);
                    return;
                }
            };

            let placeholder = Arc::new(PlaceholderServiceGroup::new(active.clone(), signal.clone()));
            let replaced = self.replace_group(
                identifier.value(),
                |current| current.is_active(&active),
                ServiceGroup::Placeholder(placeholder.clone()),
            );
            assert!(replaced, "service group {identifier} changed while closing");
            debug!("Service group {} replaced with placeholder", identifier);

            active.close_cluster_singleton_group();
            (placeholder, signal)
        };

        let provider = self.clone();
        signal.on_complete(move || provider.finish_shutdown(&placeholder));
    }

    fn finish_shutdown(&self, placeholder: &Arc<PlaceholderServiceGroup<S>>) {
        let _guard = self.lock.lock();
        let identifier = placeholder.identifier();
        debug!("Service group {} closed", identifier);

        let services = placeholder.services();
        if services.is_empty() || self.is_closed() {
            if !services.is_empty() {
                warn!(
                    "Provider closed, dropping {} services queued for service group {}",
                    services.len(),
                    identifier
                );
            }

            if self
                .groups
                .remove_if(identifier.value(), |_, current| current.is_placeholder(placeholder))
                .is_some()
            {
                debug!("Service group {} removed", identifier);
            } else {
                debug!("Service group {} superseded", identifier);
            }
            return;
        }

        let group = self.create_group(identifier, services);
        let replaced = self.replace_group(
            identifier.value(),
            |current| current.is_placeholder(placeholder),
            ServiceGroup::Active(group.clone()),
        );
        assert!(replaced, "service group {identifier} changed while its placeholder was current");
        placeholder.set_successor(group.clone());
        debug!("Service group {} upgraded from placeholder", identifier);

        if let Err(e) = self.initialize_or_remove_group(&group) {
            error!(
                "Failed to register delayed services of group {}, they will not run: {}",
                identifier, e
            );
        }
    }

    fn begin_close(&self) -> Option<(ListenerRegistrations, Vec<ServiceGroup<S>>)> {
        let _guard = self.lock.lock();
        let registrations = self.listener_registrations.lock().take()?;
        let groups = self.groups.iter().map(|group| group.value().clone()).collect();
        Some((registrations, groups))
    }

    fn ownership_changed(
        &self,
        entity: &Entity,
        change: EntityOwnershipStateChange,
        in_jeopardy: bool,
    ) {
        debug!(
            "Ownership change for {}: {} in_jeopardy={}",
            entity, change, in_jeopardy
        );

        match self.lookup(entity.name()) {
            Some(group) => group.ownership_changed(entity, change, in_jeopardy),
            None => debug!("No service group found for {}", entity),
        }
    }
}

struct ProviderListener<S: EntityOwnershipService> {
    provider: Weak<Inner<S>>,
}

impl<S: EntityOwnershipService> EntityOwnershipListener for ProviderListener<S> {
    fn ownership_changed(
        &self,
        entity: &Entity,
        change: EntityOwnershipStateChange,
        in_jeopardy: bool,
    ) {
        if let Some(provider) = self.provider.upgrade() {
            provider.ownership_changed(entity, change, in_jeopardy);
        }
    }
}

impl<S: EntityOwnershipService> ClusterSingletonServiceProvider
    for EosClusterSingletonServiceProvider<S>
{
    type Error = Error;
    type Registration = SingletonRegistration;

    fn register_cluster_singleton_service(
        &self,
        service: Arc<dyn ClusterSingletonService>,
    ) -> Result<SingletonRegistration, Error> {
        Self::register_cluster_singleton_service(self, service)
    }
}

impl<S: EntityOwnershipService> Clone for EosClusterSingletonServiceProvider<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: EntityOwnershipService> fmt::Debug for EosClusterSingletonServiceProvider<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EosClusterSingletonServiceProvider")
            .field("service_entity_type", &self.inner.service_entity_type)
            .field("cleanup_entity_type", &self.inner.cleanup_entity_type)
            .field("groups", &self.inner.groups.len())
            .field("closed", &self.inner.is_closed())
            .finish()
    }
}
