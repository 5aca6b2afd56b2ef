use std::fmt;
use std::sync::Arc;

/// An entity for which ownership is elected.
///
/// Entities are opaque keys: two entities are the same entity exactly when
/// both their type and their name are equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entity {
    entity_type: Arc<str>,
    name: Arc<str>,
}

impl Entity {
    /// Creates a new entity of `entity_type` named `name`.
    pub fn new(entity_type: impl Into<Arc<str>>, name: impl Into<Arc<str>>) -> Self {
        Self {
            entity_type: entity_type.into(),
            name: name.into(),
        }
    }

    /// The entity type, which listeners subscribe to.
    #[must_use]
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// The entity name, unique within its type.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.entity_type, self.name)
    }
}
