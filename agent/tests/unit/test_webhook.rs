//! Webhook endpoint tests

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::Router;
use http::{Request, StatusCode};
use tower::ServiceExt;

use servicesync::app::state::AppState;
use servicesync::runtime::memory::{MemoryRuntime, Operation};
use servicesync::server::handlers::WebhookResponse;
use servicesync::server::serve::router;
use servicesync::server::state::ServerState;
use servicesync::targets::DeploymentTarget;

use crate::support::app;

const TOKEN: &str = "b6f1c0de";

fn webhook_router(state: &AppState) -> Router {
    router(Arc::new(ServerState::new(
        state.dispatcher.clone(),
        TOKEN.to_string(),
    )))
}

fn push(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn matched(response: axum::response::Response) -> usize {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice::<WebhookResponse>(&bytes)
        .unwrap()
        .matched
}

const PAYLOAD: &str = r#"{
    "callback_url": "https://registry.hub.docker.com/u/acme/api/hook/2141b5bi5i5b02bec211i4eeih0242eg11000a/",
    "push_data": {"pushed_at": 1417566161, "pusher": "trustedbuilder", "tag": "prod"},
    "repository": {"repo_name": "acme/api", "namespace": "acme", "status": "Active"}
}"#;

#[tokio::test]
async fn test_push_is_accepted_and_deployed() {
    let runtime = Arc::new(MemoryRuntime::new());
    let (state, notifier) = app(
        runtime.clone(),
        vec![DeploymentTarget::container("acme/api", "prod", 80, 8080)],
    );

    let response = webhook_router(&state)
        .oneshot(push(&format!("/webhooks/{}", TOKEN), PAYLOAD))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(matched(response).await, 1);

    state.shutdown().await.unwrap();
    assert_eq!(runtime.running_on_port(8080)[0].image, "acme/api:prod");
    assert_eq!(notifier.urls().len(), 1);
    assert!(notifier.urls()[0].starts_with("https://registry.hub.docker.com/"));
}

#[tokio::test]
async fn test_wrong_token_is_not_found() {
    let runtime = Arc::new(MemoryRuntime::new());
    let (state, _) = app(
        runtime.clone(),
        vec![DeploymentTarget::container("acme/api", "prod", 80, 8080)],
    );

    let response = webhook_router(&state)
        .oneshot(push("/webhooks/guess", PAYLOAD))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    state.shutdown().await.unwrap();
    assert!(runtime.calls().is_empty());
}

#[tokio::test]
async fn test_unreadable_body_is_acknowledged() {
    let runtime = Arc::new(MemoryRuntime::new());
    let (state, _) = app(
        runtime.clone(),
        vec![DeploymentTarget::container("acme/api", "prod", 80, 8080)],
    );
    let uri = format!("/webhooks/{}", TOKEN);

    for body in [
        "not json",
        r#"{"push_data": {"tag": "prod"}}"#,
        r#"{"repository": {"repo_name": "acme/api"}}"#,
    ] {
        let response = webhook_router(&state).oneshot(push(&uri, body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED, "body {}", body);
        assert_eq!(matched(response).await, 0, "body {}", body);
    }

    state.shutdown().await.unwrap();
    assert!(runtime.calls_of(Operation::Pull).is_empty());
}

#[tokio::test]
async fn test_health_and_version() {
    let runtime = Arc::new(MemoryRuntime::new());
    let (state, _) = app(runtime, vec![]);

    for uri in ["/health", "/version"] {
        let response = webhook_router(&state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{}", uri);
    }
}
