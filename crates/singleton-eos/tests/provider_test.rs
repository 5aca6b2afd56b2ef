mod common;

use common::{
    TestService, TestServiceState, cleanup_entity, provider, service_entity, wait_until,
};

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use mandate_ownership::EntityOwnershipService;
use mandate_ownership::EntityOwnershipStateChange::{
    LocalOwnershipGranted, LocalOwnershipLostNewOwner, LocalOwnershipLostNoOwner,
    LocalOwnershipRetainedWithNoChange, RemoteOwnershipChanged,
};
use mandate_ownership_memory::{ManualOwnershipService, MemoryOwnershipService};
use mandate_singleton::ClusterSingletonServiceProvider;
use mandate_singleton_eos::{
    DEFAULT_CLEANUP_ENTITY_TYPE, DEFAULT_SERVICE_ENTITY_TYPE, EosClusterSingletonServiceProvider,
    Error, ProviderConfig,
};
use tracing_test::traced_test;

const GROUP: &str = "test-group";

#[tokio::test]
#[traced_test]
async fn test_provider_listens_to_both_entity_types() {
    let eos = ManualOwnershipService::new();
    let provider = provider(&eos);

    assert_eq!(eos.listener_count(DEFAULT_SERVICE_ENTITY_TYPE), 1);
    assert_eq!(eos.listener_count(DEFAULT_CLEANUP_ENTITY_TYPE), 1);

    provider.close().await;

    assert!(provider.is_closed());
    assert_eq!(eos.listener_count(DEFAULT_SERVICE_ENTITY_TYPE), 0);
    assert_eq!(eos.listener_count(DEFAULT_CLEANUP_ENTITY_TYPE), 0);
}

#[tokio::test]
#[traced_test]
async fn test_first_owner_starts_after_both_grants() {
    let eos = ManualOwnershipService::new();
    let provider = provider(&eos);
    let service = TestService::new(GROUP);

    let _registration = provider
        .register_cluster_singleton_service(service.clone())
        .unwrap();
    assert!(eos.is_candidate_registered(&service_entity(GROUP)));
    assert!(!eos.is_candidate_registered(&cleanup_entity(GROUP)));
    assert_eq!(service.state(), TestServiceState::Initialized);

    eos.deliver(&service_entity(GROUP), LocalOwnershipGranted, false);
    assert!(eos.is_candidate_registered(&cleanup_entity(GROUP)));
    assert_eq!(service.starts(), 0);

    eos.deliver(&cleanup_entity(GROUP), LocalOwnershipGranted, false);
    assert_eq!(service.starts(), 1);
    assert_eq!(service.state(), TestServiceState::Started);
}

#[tokio::test]
#[traced_test]
async fn test_lost_ownership_stops_then_releases_cleanup() {
    let eos = ManualOwnershipService::new();
    let provider = provider(&eos);
    let service = TestService::manual(GROUP);

    let _registration = provider
        .register_cluster_singleton_service(service.clone())
        .unwrap();
    eos.deliver(&service_entity(GROUP), LocalOwnershipGranted, false);
    eos.deliver(&cleanup_entity(GROUP), LocalOwnershipGranted, false);

    eos.deliver(&service_entity(GROUP), LocalOwnershipLostNewOwner, false);
    assert_eq!(service.stops(), 1);
    assert_eq!(service.state(), TestServiceState::Stopping);
    assert!(eos.is_candidate_registered(&cleanup_entity(GROUP)));

    service.finish_stop();
    wait_until(|| !eos.is_candidate_registered(&cleanup_entity(GROUP))).await;

    assert_eq!(service.state(), TestServiceState::Destroyed);
    assert!(eos.is_candidate_registered(&service_entity(GROUP)));
    assert_eq!(provider.group_count(), 1);
}

#[tokio::test]
#[traced_test]
async fn test_jeopardy_does_not_interrupt_service() {
    let eos = ManualOwnershipService::new();
    let provider = provider(&eos);
    let service = TestService::new(GROUP);

    let _registration = provider
        .register_cluster_singleton_service(service.clone())
        .unwrap();
    eos.deliver(&service_entity(GROUP), LocalOwnershipGranted, false);
    eos.deliver(&cleanup_entity(GROUP), LocalOwnershipGranted, false);

    eos.deliver(&service_entity(GROUP), LocalOwnershipGranted, true);
    eos.deliver(&service_entity(GROUP), LocalOwnershipGranted, false);

    assert_eq!(service.starts(), 1);
    assert_eq!(service.stops(), 0);
    assert_eq!(service.state(), TestServiceState::Started);
}

#[tokio::test]
#[traced_test]
async fn test_remote_owner_keeps_service_down() {
    let eos = ManualOwnershipService::new();
    let provider = provider(&eos);
    let service = TestService::new(GROUP);

    let _registration = provider
        .register_cluster_singleton_service(service.clone())
        .unwrap();
    eos.deliver(&service_entity(GROUP), RemoteOwnershipChanged, false);

    assert!(!eos.is_candidate_registered(&cleanup_entity(GROUP)));
    assert_eq!(service.starts(), 0);
}

#[tokio::test]
#[traced_test]
async fn test_unregister_last_service_closes_group() {
    let eos = ManualOwnershipService::new();
    let provider = provider(&eos);
    let service = TestService::manual(GROUP);

    let registration = provider
        .register_cluster_singleton_service(service.clone())
        .unwrap();
    eos.deliver(&service_entity(GROUP), LocalOwnershipGranted, false);
    eos.deliver(&cleanup_entity(GROUP), LocalOwnershipGranted, false);

    registration.close();
    assert!(registration.is_closed());
    assert!(!eos.is_candidate_registered(&service_entity(GROUP)));
    assert_eq!(service.stops(), 1);
    assert!(eos.is_candidate_registered(&cleanup_entity(GROUP)));

    service.finish_stop();
    wait_until(|| !eos.is_candidate_registered(&cleanup_entity(GROUP))).await;
    assert_eq!(provider.group_count(), 1);

    eos.deliver(&cleanup_entity(GROUP), LocalOwnershipLostNoOwner, false);
    assert_eq!(provider.group_count(), 0);

    // Closing again has no effect
    registration.close();
    assert_eq!(service.stops(), 1);
}

#[tokio::test]
#[traced_test]
async fn test_reregistration_waits_for_previous_group() {
    let eos = ManualOwnershipService::new();
    let provider = provider(&eos);
    let first = TestService::manual(GROUP);

    let registration = provider
        .register_cluster_singleton_service(first.clone())
        .unwrap();
    eos.deliver(&service_entity(GROUP), LocalOwnershipGranted, false);
    eos.deliver(&cleanup_entity(GROUP), LocalOwnershipGranted, false);
    assert_eq!(first.starts(), 1);

    registration.close();
    assert_eq!(first.state(), TestServiceState::Stopping);

    let second = TestService::new(GROUP);
    let _second_registration = provider
        .register_cluster_singleton_service(second.clone())
        .unwrap();
    assert_eq!(eos.registration_count(&service_entity(GROUP)), 1);
    assert_eq!(second.starts(), 0);

    first.finish_stop();
    wait_until(|| !eos.is_candidate_registered(&cleanup_entity(GROUP))).await;
    assert_eq!(second.starts(), 0);

    eos.deliver(&cleanup_entity(GROUP), LocalOwnershipLostNoOwner, false);
    assert_eq!(eos.registration_count(&service_entity(GROUP)), 2);
    assert!(eos.is_candidate_registered(&service_entity(GROUP)));
    assert_eq!(provider.group_count(), 1);

    eos.deliver(&service_entity(GROUP), LocalOwnershipGranted, false);
    eos.deliver(&cleanup_entity(GROUP), LocalOwnershipGranted, false);

    assert_eq!(first.starts(), 1);
    assert_eq!(second.starts(), 1);
    assert_eq!(second.state(), TestServiceState::Started);
}

#[tokio::test]
#[traced_test]
async fn test_failed_start_is_retried() {
    let eos = ManualOwnershipService::new();
    let provider = provider(&eos);
    let service = TestService::new(GROUP);
    service.fail_starts(true);

    let _registration = provider
        .register_cluster_singleton_service(service.clone())
        .unwrap();
    eos.deliver(&service_entity(GROUP), LocalOwnershipGranted, false);
    eos.deliver(&cleanup_entity(GROUP), LocalOwnershipGranted, false);
    assert_eq!(service.starts(), 0);

    service.fail_starts(false);
    eos.deliver(&cleanup_entity(GROUP), LocalOwnershipGranted, false);
    assert_eq!(service.starts(), 1);
}

#[tokio::test]
#[traced_test]
async fn test_additional_services_join_running_group() {
    let eos = ManualOwnershipService::new();
    let provider = provider(&eos);
    let first = TestService::new(GROUP);
    let second = TestService::new(GROUP);

    let first_registration = provider
        .register_cluster_singleton_service(first.clone())
        .unwrap();
    eos.deliver(&service_entity(GROUP), LocalOwnershipGranted, false);
    eos.deliver(&cleanup_entity(GROUP), LocalOwnershipGranted, false);

    let _second_registration = provider
        .register_cluster_singleton_service(second.clone())
        .unwrap();
    assert_eq!(second.starts(), 1);
    assert_eq!(eos.registration_count(&service_entity(GROUP)), 1);

    drop(first_registration);
    wait_until(|| first.state() == TestServiceState::Destroyed).await;

    assert_eq!(second.stops(), 0);
    assert!(eos.is_candidate_registered(&service_entity(GROUP)));
}

#[tokio::test]
#[traced_test]
async fn test_groups_are_independent() {
    let eos = ManualOwnershipService::new();
    let provider = provider(&eos);
    let left = TestService::new("left");
    let right = TestService::new("right");

    let _left = provider.register_cluster_singleton_service(left.clone()).unwrap();
    let _right = provider.register_cluster_singleton_service(right.clone()).unwrap();
    assert_eq!(provider.group_count(), 2);

    eos.deliver(&service_entity("left"), LocalOwnershipGranted, false);
    eos.deliver(&cleanup_entity("left"), LocalOwnershipGranted, false);
    eos.deliver(&service_entity("right"), RemoteOwnershipChanged, false);

    assert_eq!(left.starts(), 1);
    assert_eq!(right.starts(), 0);
}

#[tokio::test]
#[traced_test]
async fn test_existing_candidate_rejects_group() {
    let eos = ManualOwnershipService::new();
    let provider = provider(&eos);
    let _existing = eos.register_candidate(&service_entity(GROUP)).unwrap();

    let result = provider.register_cluster_singleton_service(TestService::new(GROUP));

    assert_matches!(result, Err(Error::CandidateAlreadyRegistered { .. }));
    assert_eq!(provider.group_count(), 0);
}

#[tokio::test]
#[traced_test]
async fn test_register_after_close_fails() {
    let eos = ManualOwnershipService::new();
    let provider = provider(&eos);
    provider.close().await;

    let result = provider.register_cluster_singleton_service(TestService::new(GROUP));

    assert_matches!(result, Err(Error::ProviderClosed));
}

#[tokio::test]
#[traced_test]
async fn test_close_waits_for_services_and_is_idempotent() {
    let eos = MemoryOwnershipService::new();
    let provider = provider(&eos);
    let service = TestService::manual(GROUP);

    let registration = provider
        .register_cluster_singleton_service(service.clone())
        .unwrap();
    assert_eq!(service.state(), TestServiceState::Started);

    let closing = provider.clone();
    let close = tokio::spawn(async move { closing.close().await });
    wait_until(|| service.state() == TestServiceState::Stopping).await;
    assert!(!close.is_finished());

    service.finish_stop();
    close.await.unwrap();

    assert_eq!(service.state(), TestServiceState::Destroyed);
    assert_eq!(provider.group_count(), 0);
    assert!(!eos.is_candidate_registered(&service_entity(GROUP)));
    assert!(!eos.is_candidate_registered(&cleanup_entity(GROUP)));

    provider.close().await;
    drop(registration);
}

#[tokio::test]
#[traced_test]
async fn test_memory_service_end_to_end() {
    let eos = MemoryOwnershipService::new();
    let provider = provider(&eos);
    let service = TestService::new(GROUP);

    let registration = provider
        .register_cluster_singleton_service(service.clone())
        .unwrap();
    assert_eq!(service.starts(), 1);
    assert!(eos.is_candidate_registered(&cleanup_entity(GROUP)));

    drop(registration);
    wait_until(|| provider.group_count() == 0).await;

    assert_eq!(service.state(), TestServiceState::Destroyed);
    assert!(!eos.is_candidate_registered(&service_entity(GROUP)));
    assert!(!eos.is_candidate_registered(&cleanup_entity(GROUP)));
}

#[tokio::test]
#[traced_test]
async fn test_panicking_stop_releases_group() {
    let eos = MemoryOwnershipService::new();
    let provider = provider(&eos);
    let service = TestService::panicking(GROUP);

    let registration = provider
        .register_cluster_singleton_service(service.clone())
        .unwrap();
    assert_eq!(service.starts(), 1);

    drop(registration);
    wait_until(|| provider.group_count() == 0).await;

    assert_eq!(service.stops(), 1);
    assert!(!eos.is_candidate_registered(&service_entity(GROUP)));
    assert!(!eos.is_candidate_registered(&cleanup_entity(GROUP)));

    let next = TestService::new(GROUP);
    let _registration = provider
        .register_cluster_singleton_service(next.clone())
        .unwrap();
    assert_eq!(next.starts(), 1);

    tokio::time::timeout(Duration::from_secs(5), provider.close())
        .await
        .expect("provider close did not finish");
    assert_eq!(next.state(), TestServiceState::Destroyed);
}

#[tokio::test]
#[traced_test]
async fn test_jeopardy_retained_keeps_service_running() {
    let eos = ManualOwnershipService::new();
    let provider = provider(&eos);
    let service = TestService::new(GROUP);

    let _registration = provider
        .register_cluster_singleton_service(service.clone())
        .unwrap();
    eos.deliver(&service_entity(GROUP), LocalOwnershipGranted, false);
    eos.deliver(&cleanup_entity(GROUP), LocalOwnershipGranted, false);
    assert_eq!(service.state(), TestServiceState::Started);

    eos.deliver(&service_entity(GROUP), LocalOwnershipRetainedWithNoChange, true);

    assert_eq!(service.state(), TestServiceState::Started);
    assert_eq!(service.starts(), 1);
    assert_eq!(service.stops(), 0);
}

#[tokio::test]
#[traced_test]
async fn test_loss_in_jeopardy_stops_service_once() {
    for change in [LocalOwnershipLostNoOwner, RemoteOwnershipChanged] {
        let eos = ManualOwnershipService::new();
        let provider = provider(&eos);
        let service = TestService::new(GROUP);

        let _registration = provider
            .register_cluster_singleton_service(service.clone())
            .unwrap();
        eos.deliver(&service_entity(GROUP), LocalOwnershipGranted, false);
        eos.deliver(&cleanup_entity(GROUP), LocalOwnershipGranted, false);

        eos.deliver(&service_entity(GROUP), change, true);
        eos.deliver(&service_entity(GROUP), change, true);
        wait_until(|| !eos.is_candidate_registered(&cleanup_entity(GROUP))).await;

        assert_eq!(service.stops(), 1);
        assert_eq!(service.state(), TestServiceState::Destroyed);
        assert!(eos.is_candidate_registered(&service_entity(GROUP)));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[traced_test]
async fn test_concurrent_register_and_drop() {
    let eos = MemoryOwnershipService::new();
    let provider = provider(&eos);

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let provider = provider.clone();
            tokio::task::spawn_blocking(move || {
                for _ in 0..50 {
                    let registration = provider
                        .register_cluster_singleton_service(TestService::new(GROUP))
                        .unwrap();
                    drop(registration);
                }
            })
        })
        .collect();
    for worker in futures::future::join_all(workers).await {
        worker.unwrap();
    }

    let last = TestService::new(GROUP);
    let _registration = provider
        .register_cluster_singleton_service(last.clone())
        .unwrap();
    wait_until(|| last.state() == TestServiceState::Started).await;
    assert_eq!(last.starts(), 1);
    assert_eq!(provider.group_count(), 1);

    tokio::time::timeout(Duration::from_secs(5), provider.close())
        .await
        .expect("provider close did not finish");
    assert_eq!(last.starts(), 1);
    assert_eq!(last.state(), TestServiceState::Destroyed);
}

#[tokio::test]
#[traced_test]
async fn test_service_reregisters_while_stopping() {
    let eos = MemoryOwnershipService::new();
    let provider = provider(&eos);
    let first = TestService::new(GROUP);
    let second = TestService::new(GROUP);

    let follow_up = Arc::new(parking_lot::Mutex::new(None));
    {
        let provider = provider.clone();
        let second = second.clone();
        let follow_up = follow_up.clone();
        first.on_stop(move || {
            let registration = provider
                .register_cluster_singleton_service(second.clone())
                .unwrap();
            *follow_up.lock() = Some(registration);
        });
    }

    let registration = provider
        .register_cluster_singleton_service(first.clone())
        .unwrap();
    assert_eq!(first.starts(), 1);

    registration.close();
    wait_until(|| second.state() == TestServiceState::Started).await;

    assert_eq!(first.state(), TestServiceState::Destroyed);
    assert_eq!(second.starts(), 1);
    assert!(follow_up.lock().is_some());
}

#[tokio::test]
#[traced_test]
async fn test_custom_entity_types() {
    let eos = MemoryOwnershipService::new();
    let config = ProviderConfig::default()
        .with_service_entity_type("custom.service")
        .with_cleanup_entity_type("custom.cleanup");
    let provider =
        EosClusterSingletonServiceProvider::with_config(Arc::new(eos.clone()), config).unwrap();
    let service = TestService::new(GROUP);

    let _registration = provider
        .register_cluster_singleton_service(service.clone())
        .unwrap();

    assert_eq!(service.starts(), 1);
    assert_eq!(eos.listener_count("custom.service"), 1);
    assert!(eos.is_candidate_registered(&mandate_ownership::Entity::new("custom.cleanup", GROUP)));
}

#[test]
fn test_requires_runtime() {
    let eos = MemoryOwnershipService::new();

    let result = EosClusterSingletonServiceProvider::new(Arc::new(eos));

    assert_matches!(result, Err(Error::NoRuntime(_)));
}

#[tokio::test]
async fn test_usable_through_provider_trait() {
    fn register<P: ClusterSingletonServiceProvider>(
        provider: &P,
        service: Arc<TestService>,
    ) -> Result<P::Registration, P::Error> {
        provider.register_cluster_singleton_service(service)
    }

    let eos = MemoryOwnershipService::new();
    let provider = provider(&eos);
    let service = TestService::new(GROUP);

    let _registration = register(&provider, service.clone()).unwrap();

    assert_eq!(service.starts(), 1);
}
