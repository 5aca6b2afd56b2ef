use thiserror::Error;

/// Errors constructing a [`crate::ServiceGroupIdentifier`].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum IdentifierError {
    /// The identifier value was empty.
    #[error("service group identifier may not be empty")]
    Empty,
}
