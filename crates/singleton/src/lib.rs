//! Abstract interface for cluster singleton services.
//!
//! A cluster singleton service is a service which must be running on exactly
//! one node of a cluster at any time. Services sharing a
//! [`ServiceGroupIdentifier`] are started and stopped together.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod identifier;

pub use error::IdentifierError;
pub use identifier::ServiceGroupIdentifier;

use std::error::Error;
use std::fmt::Debug;
use std::sync::Arc;

use futures::future::BoxFuture;

/// Error reported by a singleton service while starting or stopping.
pub type ServiceError = Box<dyn Error + Send + Sync>;

/// Marker trait for `ClusterSingletonServiceProvider` errors
pub trait ProviderError: Debug + Error + Send + Sync + 'static {}

/// A service which runs on exactly one node of the cluster.
pub trait ClusterSingletonService: Send + Sync + 'static {
    /// The group this service belongs to.
    fn identifier(&self) -> &ServiceGroupIdentifier;

    /// Starts the service instance on this node.
    ///
    /// Called once this node has become the owner of the service group.
    ///
    /// # Errors
    /// A failure is logged and the start is retried on the next ownership
    /// reconciliation.
    fn instantiate_service_instance(&self) -> Result<(), ServiceError>;

    /// Stops the service instance on this node.
    ///
    /// The returned future completes once the instance has fully cleaned up.
    /// A new owner elsewhere in the cluster is not started before it does, so
    /// the future should complete in a timely fashion.
    fn close_service_instance(&self) -> BoxFuture<'static, Result<(), ServiceError>>;
}

/// A registry of cluster singleton services.
pub trait ClusterSingletonServiceProvider: Send + Sync + 'static {
    /// The error type for provider operations.
    type Error: ProviderError;

    /// Handle returned for each registered service. Closing it unregisters the service.
    type Registration: Send + Sync + 'static;

    /// Registers a service.
    ///
    /// # Errors
    /// Fails if the provider is closed or the service group cannot be created.
    fn register_cluster_singleton_service(
        &self,
        service: Arc<dyn ClusterSingletonService>,
    ) -> Result<Self::Registration, Self::Error>;
}
