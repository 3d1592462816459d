//! End-to-end redeploy scenarios against the in-memory runtime

use std::sync::Arc;

use servicesync::deploy::fsm::RunState;
use servicesync::errors::RedeployError;
use servicesync::models::event::PushEvent;
use servicesync::runtime::memory::{MemoryRuntime, Operation};
use servicesync::runtime::RuntimeError;
use servicesync::targets::DeploymentTarget;

use crate::support::app;

#[tokio::test]
async fn test_container_replaced_on_host_port() {
    let runtime = Arc::new(MemoryRuntime::new());
    let old = runtime.add_container("acme/api:2024-01", &[8080]);
    let (state, notifier) = app(
        runtime.clone(),
        vec![DeploymentTarget::container("acme/api", "prod", 80, 8080)],
    );

    let event = PushEvent::new("acme/api", "prod").with_callback("https://hub.local/cb/1");
    let reports = state.dispatcher.dispatch(event).wait().await;

    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert_eq!(report.state, RunState::Succeeded);
    assert_eq!(report.image_ref, "acme/api:prod");
    assert_eq!(
        report.history,
        vec![
            RunState::Pending,
            RunState::Pulling,
            RunState::ResolvingConflict,
            RunState::Replacing,
            RunState::Starting,
            RunState::Succeeded,
        ]
    );
    assert!(report.finished_at.is_some());

    let pulls = runtime.calls_of(Operation::Pull);
    assert_eq!(pulls.len(), 1);
    assert_eq!(pulls[0].subject, "acme/api:prod");

    let stops = runtime.calls_of(Operation::Stop);
    assert_eq!(stops.len(), 1);
    assert_eq!(stops[0].subject, old);

    let on_port = runtime.running_on_port(8080);
    assert_eq!(on_port.len(), 1);
    assert_eq!(on_port[0].image, "acme/api:prod");
    assert_ne!(on_port[0].id, old);

    assert_eq!(notifier.urls(), vec!["https://hub.local/cb/1".to_string()]);
}

#[tokio::test]
async fn test_unmatched_repository_touches_nothing() {
    let runtime = Arc::new(MemoryRuntime::new());
    let (state, notifier) = app(
        runtime.clone(),
        vec![DeploymentTarget::container("acme/api", "prod", 80, 8080)],
    );

    let event = PushEvent::new("acme/other", "prod").with_callback("https://hub.local/cb/2");
    let dispatch = state.dispatcher.dispatch(event);
    assert_eq!(dispatch.matched(), 0);

    assert!(dispatch.wait().await.is_empty());
    assert_eq!(state.dispatcher.in_flight(), 0);
    assert!(runtime.calls().is_empty());
    assert!(notifier.urls().is_empty());
}

#[tokio::test]
async fn test_service_version_conflict_fails_replace() {
    let runtime = Arc::new(MemoryRuntime::new());
    runtime.add_service("svc1", "acme/api:old");
    runtime.fail_on(
        Operation::Update,
        RuntimeError::VersionConflict("update out of sequence".to_string()),
    );
    let (state, _) = app(
        runtime.clone(),
        vec![DeploymentTarget::service("acme/api", "prod", "svc1")],
    );

    let reports = state
        .dispatcher
        .dispatch(PushEvent::new("acme/api", "prod"))
        .wait()
        .await;

    let report = &reports[0];
    assert_eq!(report.state, RunState::Failed);
    assert_eq!(
        report.history,
        vec![
            RunState::Pending,
            RunState::Pulling,
            RunState::Replacing,
            RunState::Failed,
        ]
    );
    assert!(matches!(report.error, Some(RedeployError::Replace(_))));

    for operation in [
        Operation::List,
        Operation::Stop,
        Operation::Create,
        Operation::Start,
    ] {
        assert!(runtime.calls_of(operation).is_empty(), "{:?} called", operation);
    }
    assert_eq!(runtime.service("svc1").unwrap().image, "acme/api:old");
}

#[tokio::test]
async fn test_service_update_rolls_new_image() {
    let runtime = Arc::new(MemoryRuntime::new());
    runtime.add_service("svc1", "acme/api:old");
    let (state, _) = app(
        runtime.clone(),
        vec![DeploymentTarget::service("acme/api", "", "svc1")],
    );

    let reports = state
        .dispatcher
        .dispatch(PushEvent::new("acme/api", "v2"))
        .wait()
        .await;

    assert!(reports[0].succeeded());
    let service = runtime.service("svc1").unwrap();
    assert_eq!(service.image, "acme/api:v2");
    assert_eq!(service.version, 2);
    assert!(service.force_update > 0);
}
