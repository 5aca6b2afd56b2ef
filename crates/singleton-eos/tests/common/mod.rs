//! Test helpers for cluster singleton provider tests

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use mandate_ownership::{Entity, EntityOwnershipService};
use mandate_singleton::{ClusterSingletonService, ServiceError, ServiceGroupIdentifier};
use mandate_singleton_eos::{
    DEFAULT_CLEANUP_ENTITY_TYPE, DEFAULT_SERVICE_ENTITY_TYPE, EosClusterSingletonServiceProvider,
};
use parking_lot::Mutex;
use tokio::sync::oneshot;

/// Lifecycle of a test service instance
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TestServiceState {
    /// Never started
    Initialized,
    /// Running
    Started,
    /// Stop requested, not yet finished
    Stopping,
    /// Stop finished
    Destroyed,
}

type Hook = Box<dyn Fn() + Send + Sync>;

/// A singleton service which records every transition
pub struct TestService {
    identifier: ServiceGroupIdentifier,
    starts: AtomicUsize,
    stops: AtomicUsize,
    state: Arc<Mutex<TestServiceState>>,
    manual_stop: bool,
    panic_on_stop: bool,
    fail_start: AtomicBool,
    pending_stops: Mutex<Vec<oneshot::Sender<()>>>,
    on_stop: Mutex<Option<Hook>>,
}

impl TestService {
    /// Service whose stop completes immediately
    pub fn new(identifier: &str) -> Arc<Self> {
        Self::build(identifier, false, false)
    }

    /// Service whose stop completes only after `finish_stop`
    pub fn manual(identifier: &str) -> Arc<Self> {
        Self::build(identifier, true, false)
    }

    /// Service whose stop future panics
    pub fn panicking(identifier: &str) -> Arc<Self> {
        Self::build(identifier, false, true)
    }

    fn build(identifier: &str, manual_stop: bool, panic_on_stop: bool) -> Arc<Self> {
        Arc::new(Self {
            identifier: ServiceGroupIdentifier::new(identifier).unwrap(),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            state: Arc::new(Mutex::new(TestServiceState::Initialized)),
            manual_stop,
            panic_on_stop,
            fail_start: AtomicBool::new(false),
            pending_stops: Mutex::new(Vec::new()),
            on_stop: Mutex::new(None),
        })
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> TestServiceState {
        *self.state.lock()
    }

    pub fn fail_starts(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    /// Runs `hook` from inside `close_service_instance`
    pub fn on_stop(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.on_stop.lock() = Some(Box::new(hook));
    }

    /// Completes every pending stop
    pub fn finish_stop(&self) {
        for stop in self.pending_stops.lock().drain(..) {
            let _ = stop.send(());
        }
    }
}

impl ClusterSingletonService for TestService {
    fn identifier(&self) -> &ServiceGroupIdentifier {
        &self.identifier
    }

    fn instantiate_service_instance(&self) -> Result<(), ServiceError> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err("refusing to start".into());
        }

        self.starts.fetch_add(1, Ordering::SeqCst);
        *self.state.lock() = TestServiceState::Started;
        Ok(())
    }

    fn close_service_instance(&self) -> BoxFuture<'static, Result<(), ServiceError>> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        *self.state.lock() = TestServiceState::Stopping;

        if let Some(hook) = self.on_stop.lock().as_ref() {
            hook();
        }

        let state = self.state.clone();
        let panic_on_stop = self.panic_on_stop;
        let pending = if self.manual_stop {
            let (tx, rx) = oneshot::channel();
            self.pending_stops.lock().push(tx);
            Some(rx)
        } else {
            None
        };

        async move {
            if let Some(pending) = pending {
                let _ = pending.await;
            }
            if panic_on_stop {
                panic!("service failed to stop");
            }
            *state.lock() = TestServiceState::Destroyed;
            Ok(())
        }
        .boxed()
    }
}

/// Service entity of a group under the default configuration
pub fn service_entity(identifier: &str) -> Entity {
    Entity::new(DEFAULT_SERVICE_ENTITY_TYPE, identifier)
}

/// Cleanup entity of a group under the default configuration
pub fn cleanup_entity(identifier: &str) -> Entity {
    Entity::new(DEFAULT_CLEANUP_ENTITY_TYPE, identifier)
}

/// Creates a provider on the current runtime
pub fn provider<S: EntityOwnershipService + Clone>(
    eos: &S,
) -> EosClusterSingletonServiceProvider<S> {
    EosClusterSingletonServiceProvider::new(Arc::new(eos.clone())).unwrap()
}

/// Waits until `condition` holds, failing the test after five seconds
pub async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
