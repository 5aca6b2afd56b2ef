use mandate_ownership::CandidateAlreadyRegisteredError;
use mandate_singleton::{ProviderError, ServiceGroupIdentifier};
use thiserror::Error;

/// Errors that can occur when registering cluster singleton services.
#[derive(Debug, Error)]
pub enum Error {
    /// The ownership service already has a candidate for the group's service entity.
    #[error("service group {identifier} already registered")]
    CandidateAlreadyRegistered {
        /// The group which could not be created.
        identifier: ServiceGroupIdentifier,
        /// The ownership service error.
        #[source]
        source: CandidateAlreadyRegisteredError,
    },

    /// The service group was initialized twice.
    #[error("service group {0} was already initialized")]
    AlreadyInitialized(ServiceGroupIdentifier),

    /// The service group was used before being initialized.
    #[error("service group {0} is not initialized yet")]
    NotInitialized(ServiceGroupIdentifier),

    /// The service group is closing or closed.
    #[error("service group {0} has already been closed")]
    GroupClosed(ServiceGroupIdentifier),

    /// The placeholder group has been replaced by its successor.
    #[error("service group {0} has been superseded")]
    GroupSuperseded(ServiceGroupIdentifier),

    /// A service was handed to a group with a different identifier.
    #[error("service of group {actual} cannot join service group {expected}")]
    IdentifierMismatch {
        /// The group identifier.
        expected: ServiceGroupIdentifier,
        /// The identifier of the service.
        actual: ServiceGroupIdentifier,
    },

    /// The registration is not a member of the service group.
    #[error("registration is not a member of service group {0}")]
    UnknownRegistration(ServiceGroupIdentifier),

    /// The provider has been closed.
    #[error("cluster singleton service provider is closed")]
    ProviderClosed,

    /// No tokio runtime was configured or available.
    #[error("no tokio runtime available: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

impl ProviderError for Error {}
