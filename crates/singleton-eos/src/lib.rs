//! Cluster singleton service provider built on an entity ownership service.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod active;
mod config;
mod error;
mod group;
mod placeholder;
mod provider;
mod registration;
mod service_info;
mod signal;

pub use config::{DEFAULT_CLEANUP_ENTITY_TYPE, DEFAULT_SERVICE_ENTITY_TYPE, ProviderConfig};
pub use error::Error;
pub use provider::EosClusterSingletonServiceProvider;
pub use registration::SingletonRegistration;
