use std::fmt;

/// A change in ownership of an entity, as observed by the local node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum EntityOwnershipStateChange {
    /// The local node was granted ownership.
    LocalOwnershipGranted,

    /// The local node is still the owner, but something about the entity changed.
    LocalOwnershipRetainedWithNoChange,

    /// The local node lost ownership and another node became the owner.
    LocalOwnershipLostNewOwner,

    /// The local node lost ownership and there is no owner now.
    LocalOwnershipLostNoOwner,

    /// Ownership moved between two remote nodes.
    RemoteOwnershipChanged,

    /// A remote owner lost ownership and there is no owner now.
    RemoteOwnershipLostNoOwner,
}

impl EntityOwnershipStateChange {
    /// Whether the local node owned the entity before this change.
    #[must_use]
    pub const fn was_owner(self) -> bool {
        matches!(
            self,
            Self::LocalOwnershipRetainedWithNoChange
                | Self::LocalOwnershipLostNewOwner
                | Self::LocalOwnershipLostNoOwner
        )
    }

    /// Whether the local node owns the entity after this change.
    #[must_use]
    pub const fn is_owner(self) -> bool {
        matches!(
            self,
            Self::LocalOwnershipGranted | Self::LocalOwnershipRetainedWithNoChange
        )
    }

    /// Whether any node owns the entity after this change.
    #[must_use]
    pub const fn has_owner(self) -> bool {
        !matches!(
            self,
            Self::LocalOwnershipLostNoOwner | Self::RemoteOwnershipLostNoOwner
        )
    }
}

impl fmt::Display for EntityOwnershipStateChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LocalOwnershipGranted => "LOCAL_OWNERSHIP_GRANTED",
            Self::LocalOwnershipRetainedWithNoChange => "LOCAL_OWNERSHIP_RETAINED_WITH_NO_CHANGE",
            Self::LocalOwnershipLostNewOwner => "LOCAL_OWNERSHIP_LOST_NEW_OWNER",
            Self::LocalOwnershipLostNoOwner => "LOCAL_OWNERSHIP_LOST_NO_OWNER",
            Self::RemoteOwnershipChanged => "REMOTE_OWNERSHIP_CHANGED",
            Self::RemoteOwnershipLostNoOwner => "REMOTE_OWNERSHIP_LOST_NO_OWNER",
        };
        f.write_str(name)
    }
}

/// The ownership state of an entity, as reported by the ownership service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityOwnershipState {
    /// The local node owns the entity.
    IsOwner,

    /// Another node owns the entity.
    OwnedByOther,

    /// Nobody owns the entity.
    NoOwner,
}

impl EntityOwnershipState {
    /// Derives the state from ownership flags.
    #[must_use]
    pub const fn from_flags(is_owner: bool, has_owner: bool) -> Self {
        if is_owner {
            Self::IsOwner
        } else if has_owner {
            Self::OwnedByOther
        } else {
            Self::NoOwner
        }
    }
}
