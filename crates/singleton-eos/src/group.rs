use crate::active::ActiveServiceGroup;
use crate::error::Error;
use crate::placeholder::PlaceholderServiceGroup;
use crate::registration::ServiceRegistration;
use crate::signal::CloseSignal;

use std::sync::Arc;

use mandate_ownership::{Entity, EntityOwnershipService, EntityOwnershipStateChange};
use mandate_singleton::ServiceGroupIdentifier;

/// A service group as tracked by the provider.
pub(crate) enum ServiceGroup<S: EntityOwnershipService> {
    /// Owns the entity candidacies and runs services.
    Active(Arc<ActiveServiceGroup<S>>),

    /// Buffers registrations while a previous incarnation closes.
    Placeholder(Arc<PlaceholderServiceGroup<S>>),
}

impl<S: EntityOwnershipService> ServiceGroup<S> {
    pub(crate) fn identifier(&self) -> &ServiceGroupIdentifier {
        match self {
            Self::Active(group) => group.identifier(),
            Self::Placeholder(group) => group.identifier(),
        }
    }

    pub(crate) fn register_service(&self, registration: &Arc<ServiceRegistration>) -> Result<(), Error> {
        match self {
            Self::Active(group) => group.register_service(registration),
            Self::Placeholder(group) => group.register_service(registration),
        }
    }

    pub(crate) fn ownership_changed(
        &self,
        entity: &Entity,
        change: EntityOwnershipStateChange,
        in_jeopardy: bool,
    ) {
        match self {
            Self::Active(group) => group.ownership_changed(entity, change, in_jeopardy),
            Self::Placeholder(group) => group.ownership_changed(entity, change, in_jeopardy),
        }
    }

    pub(crate) fn close_cluster_singleton_group(&self) -> CloseSignal {
        match self {
            Self::Active(group) => group.close_cluster_singleton_group(),
            Self::Placeholder(group) => group.close_cluster_singleton_group(),
        }
    }

    pub(crate) fn is_active(&self, active: &Arc<ActiveServiceGroup<S>>) -> bool {
        matches!(self, Self::Active(group) if Arc::ptr_eq(group, active))
    }

    pub(crate) fn is_placeholder(&self, placeholder: &Arc<PlaceholderServiceGroup<S>>) -> bool {
        matches!(self, Self::Placeholder(group) if Arc::ptr_eq(group, placeholder))
    }
}

impl<S: EntityOwnershipService> Clone for ServiceGroup<S> {
    fn clone(&self) -> Self {
        match self {
            Self::Active(group) => Self::Active(group.clone()),
            Self::Placeholder(group) => Self::Placeholder(group.clone()),
        }
    }
}
