//! Dispatch coordinator tests

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio_test::{assert_err, assert_ok};

use servicesync::deploy::dispatcher::DispatchOptions;
use servicesync::deploy::fsm::RunState;
use servicesync::errors::RedeployError;
use servicesync::models::event::PushEvent;
use servicesync::runtime::memory::{MemoryRuntime, Operation};
use servicesync::runtime::RuntimeError;
use servicesync::targets::DeploymentTarget;

use crate::support::{app, app_with_notifier, FailingNotifier};

#[tokio::test]
async fn test_one_run_per_match() {
    let runtime = Arc::new(MemoryRuntime::new());
    runtime.add_service("svc-api", "acme/api:old");
    let (state, _) = app(
        runtime.clone(),
        vec![
            DeploymentTarget::container("acme/api", "prod", 80, 8080),
            DeploymentTarget::container("acme/api", "", 80, 8081),
            DeploymentTarget::service("acme/api", "prod", "svc-api"),
            DeploymentTarget::container("acme/web", "prod", 80, 9090),
        ],
    );

    let dispatch = state.dispatcher.dispatch(PushEvent::new("acme/api", "prod"));
    assert_eq!(dispatch.matched(), 3);

    let reports = dispatch.wait().await;
    assert_eq!(reports.len(), 3);
    assert!(reports.iter().all(|r| r.succeeded()));
    assert_eq!(runtime.calls_of(Operation::Pull).len(), 3);
    assert_eq!(runtime.service("svc-api").unwrap().image, "acme/api:prod");
    assert!(runtime.running_on_port(9090).is_empty());
}

#[tokio::test]
async fn test_failed_run_does_not_affect_others() {
    let runtime = Arc::new(MemoryRuntime::new());
    // svc-missing is never registered, so its inspect fails
    let (state, _) = app(
        runtime.clone(),
        vec![
            DeploymentTarget::service("acme/api", "", "svc-missing"),
            DeploymentTarget::container("acme/api", "prod", 80, 8080),
        ],
    );

    let reports = state
        .dispatcher
        .dispatch(PushEvent::new("acme/api", "prod"))
        .wait()
        .await;
    assert_eq!(reports.len(), 2);

    let failed: Vec<_> = reports.iter().filter(|r| !r.succeeded()).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(
        failed[0].target,
        DeploymentTarget::service("acme/api", "", "svc-missing")
    );
    assert!(matches!(failed[0].error, Some(RedeployError::Replace(_))));

    let container = reports.iter().find(|r| r.succeeded()).unwrap();
    assert_eq!(container.state, RunState::Succeeded);
    assert_eq!(runtime.running_on_port(8080).len(), 1);
}

#[tokio::test]
async fn test_no_conflict_means_no_stop() {
    let runtime = Arc::new(MemoryRuntime::new());
    runtime.add_container("acme/db:15", &[5432]);
    let (state, _) = app(
        runtime.clone(),
        vec![DeploymentTarget::container("acme/api", "prod", 80, 8080)],
    );

    let reports = state
        .dispatcher
        .dispatch(PushEvent::new("acme/api", "prod"))
        .wait()
        .await;

    assert!(reports[0].succeeded());
    assert!(runtime.calls_of(Operation::Stop).is_empty());
    assert_eq!(runtime.running_on_port(5432).len(), 1);
}

#[tokio::test]
async fn test_same_event_twice_leaves_one_workload() {
    let runtime = Arc::new(MemoryRuntime::new());
    runtime.add_container("acme/api:old", &[8080]);
    let (state, _) = app(
        runtime.clone(),
        vec![DeploymentTarget::container("acme/api", "prod", 80, 8080)],
    );

    let first = state.dispatcher.dispatch(PushEvent::new("acme/api", "prod"));
    let second = state.dispatcher.dispatch(PushEvent::new("acme/api", "prod"));
    let reports: Vec<_> = join_all([first.wait(), second.wait()])
        .await
        .into_iter()
        .flatten()
        .collect();

    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.succeeded()));

    let on_port = runtime.running_on_port(8080);
    assert_eq!(on_port.len(), 1);
    assert_eq!(on_port[0].image, "acme/api:prod");
}

#[tokio::test]
async fn test_runs_for_same_target_are_serialized() {
    let runtime = Arc::new(MemoryRuntime::new());
    runtime.delay_on(Operation::Pull, Duration::from_millis(20));
    let (state, _) = app(
        runtime.clone(),
        vec![DeploymentTarget::container("acme/api", "prod", 80, 8080)],
    );

    let dispatches: Vec<_> = (0..3)
        .map(|_| state.dispatcher.dispatch(PushEvent::new("acme/api", "prod")))
        .collect();
    let reports: Vec<_> = join_all(dispatches.into_iter().map(|d| d.wait()))
        .await
        .into_iter()
        .flatten()
        .collect();

    assert_eq!(reports.len(), 3);
    assert!(reports.iter().all(|r| r.succeeded()));

    // Every run completes its start before the next one pulls
    use Operation::*;
    let first = [Pull, List, Create, Start];
    let replace = [Pull, List, Stop, Create, Start];
    let sequence: Vec<Operation> = runtime.calls().into_iter().map(|c| c.operation).collect();
    assert_eq!(sequence, [&first[..], &replace[..], &replace[..]].concat());
    assert_eq!(runtime.running_on_port(8080).len(), 1);
}

#[tokio::test]
async fn test_targets_sharing_host_port_are_serialized() {
    let runtime = Arc::new(MemoryRuntime::new());
    runtime.add_container("acme/api:old", &[8080]);
    runtime.delay_on(Operation::Pull, Duration::from_millis(20));
    let (state, _) = app(
        runtime.clone(),
        vec![
            DeploymentTarget::container("acme/api", "prod", 80, 8080),
            DeploymentTarget::container("acme/api", "", 80, 8080),
        ],
    );

    let dispatch = state.dispatcher.dispatch(PushEvent::new("acme/api", "prod"));
    assert_eq!(dispatch.matched(), 2);
    let reports = dispatch.wait().await;

    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.succeeded()));

    // The second run replaces the first one's container instead of racing it
    use Operation::*;
    let replace = [Pull, List, Stop, Create, Start];
    let sequence: Vec<Operation> = runtime.calls().into_iter().map(|c| c.operation).collect();
    assert_eq!(sequence, [replace, replace].concat());
    assert_eq!(runtime.running_on_port(8080).len(), 1);
}

#[tokio::test]
async fn test_failing_callback_keeps_run_succeeded() {
    let runtime = Arc::new(MemoryRuntime::new());
    runtime.add_service("svc-api", "acme/api:old");
    let notifier = Arc::new(FailingNotifier::default());
    let state = app_with_notifier(
        runtime.clone(),
        vec![
            DeploymentTarget::container("acme/api", "prod", 80, 8080),
            DeploymentTarget::service("acme/api", "", "svc-api"),
        ],
        DispatchOptions::default(),
        notifier.clone(),
    );

    let event = PushEvent::new("acme/api", "prod").with_callback("https://hub.local/cb");
    let reports = state.dispatcher.dispatch(event).wait().await;

    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.state == RunState::Succeeded));
    assert!(reports.iter().all(|r| r.error.is_none()));
    assert_eq!(notifier.attempts(), 2);
    assert_eq!(runtime.running_on_port(8080).len(), 1);
    assert_eq!(runtime.service("svc-api").unwrap().image, "acme/api:prod");
}

#[tokio::test]
async fn test_unauthorized_pull_fails_run() {
    let runtime = Arc::new(MemoryRuntime::new());
    runtime.fail_on(
        Operation::Pull,
        RuntimeError::Unauthorized("authentication required".to_string()),
    );
    let (state, notifier) = app(
        runtime.clone(),
        vec![DeploymentTarget::container("acme/api", "prod", 80, 8080)],
    );

    let event = PushEvent::new("acme/api", "prod").with_callback("https://hub.local/cb");
    let reports = state.dispatcher.dispatch(event).wait().await;

    assert_eq!(reports[0].state, RunState::Failed);
    assert_eq!(
        reports[0].history,
        vec![RunState::Pending, RunState::Pulling, RunState::Failed]
    );
    assert!(matches!(
        reports[0].error,
        Some(RedeployError::Authentication(_))
    ));
    assert!(runtime.calls_of(Operation::List).is_empty());
    // Callbacks fire on success only by default
    assert!(notifier.urls().is_empty());
}

#[tokio::test]
async fn test_shutdown_waits_for_runs() {
    let runtime = Arc::new(MemoryRuntime::new());
    runtime.delay_on(Operation::Start, Duration::from_millis(30));
    let (state, notifier) = app(
        runtime.clone(),
        vec![DeploymentTarget::container("acme/api", "prod", 80, 8080)],
    );

    let event = PushEvent::new("acme/api", "prod").with_callback("https://hub.local/cb");
    drop(state.dispatcher.dispatch(event));

    assert_ok!(state.shutdown().await);
    assert_eq!(state.dispatcher.in_flight(), 0);
    assert_eq!(runtime.running_on_port(8080).len(), 1);
    assert_eq!(notifier.urls(), vec!["https://hub.local/cb".to_string()]);
}

#[tokio::test]
async fn test_registry_rejects_duplicate_targets() {
    let result = servicesync::targets::TargetRegistry::new(vec![
        DeploymentTarget::container("acme/api", "prod", 80, 8080),
        DeploymentTarget::container("acme/api", "prod", 81, 8081),
    ]);
    assert_err!(result);
}
