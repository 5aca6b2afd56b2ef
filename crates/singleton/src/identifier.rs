use crate::IdentifierError;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Identifier of a group of cluster singleton services. Never empty.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceGroupIdentifier(Arc<str>);

impl ServiceGroupIdentifier {
    /// Creates an identifier.
    ///
    /// # Errors
    /// Returns [`IdentifierError::Empty`] if `value` is empty.
    pub fn new(value: impl Into<Arc<str>>) -> Result<Self, IdentifierError> {
        let value = value.into();
        if value.is_empty() {
            return Err(IdentifierError::Empty);
        }

        Ok(Self(value))
    }

    /// The identifier value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ServiceGroupIdentifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceGroupIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ServiceGroupIdentifier {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}
