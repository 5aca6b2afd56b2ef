use tokio::runtime::Handle;

/// Default entity type used to elect the owner of a service group.
pub const DEFAULT_SERVICE_ENTITY_TYPE: &str = "mandate.singleton.service";

/// Default entity type used to hand over cleanup between owners.
pub const DEFAULT_CLEANUP_ENTITY_TYPE: &str = "mandate.singleton.cleanup";

/// Configuration for the `EosClusterSingletonServiceProvider`.
#[derive(Clone, Debug)]
pub struct ProviderConfig {
    /// Entity type of the per-group service entity.
    pub service_entity_type: String,

    /// Entity type of the per-group cleanup entity.
    pub cleanup_entity_type: String,

    /// Runtime on which service shutdown is driven. Defaults to the runtime
    /// the provider is created on.
    pub runtime: Option<Handle>,
}

impl ProviderConfig {
    /// Sets the service entity type.
    #[must_use]
    pub fn with_service_entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.service_entity_type = entity_type.into();
        self
    }

    /// Sets the cleanup entity type.
    #[must_use]
    pub fn with_cleanup_entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.cleanup_entity_type = entity_type.into();
        self
    }

    /// Sets the runtime used to drive service shutdown.
    #[must_use]
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            service_entity_type: DEFAULT_SERVICE_ENTITY_TYPE.to_string(),
            cleanup_entity_type: DEFAULT_CLEANUP_ENTITY_TYPE.to_string(),
            runtime: None,
        }
    }
}
