use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Lifecycle state of a locally running service instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ServiceState {
    /// Local service is up and running.
    Started,

    /// Local service is being stopped.
    Stopping,
}

/// Set by the task driving a service shutdown once it completes.
#[derive(Clone, Debug, Default)]
pub(crate) struct StopCompletion(Arc<AtomicBool>);

impl StopCompletion {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn mark(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_done(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runtime state of one registration within its group.
#[derive(Debug)]
pub(crate) struct ServiceInfo {
    state: ServiceState,
    completion: Option<StopCompletion>,
}

impl ServiceInfo {
    pub(crate) const fn started() -> Self {
        Self {
            state: ServiceState::Started,
            completion: None,
        }
    }

    pub(crate) const fn stopping(completion: StopCompletion) -> Self {
        Self {
            state: ServiceState::Stopping,
            completion: Some(completion),
        }
    }

    pub(crate) const fn state(&self) -> ServiceState {
        self.state
    }

    /// Whether a stopping service has finished stopping.
    pub(crate) fn is_stopped(&self) -> bool {
        self.completion.as_ref().is_some_and(StopCompletion::is_done)
    }
}
