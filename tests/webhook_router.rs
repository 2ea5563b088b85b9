//! Webhook receiver: routing, decoding, secret check and watch updates.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;
use tokio::sync::mpsc;
use tower::ServiceExt;
use unicred::agent::webhook::router;
use unicred::agent::{WebhookServer, WebhookState};
use unicred::models::event::AgentEvent;
use unicred::watch::{ConnectionState, ConnectionWatch};

fn state(secret: Option<&str>) -> (Arc<WebhookState>, mpsc::Receiver<AgentEvent>) {
    let (tx, rx) = mpsc::channel(16);
    let state = Arc::new(WebhookState {
        events: tx,
        watch: ConnectionWatch::new(),
        secret: secret.map(str::to_string),
    });
    (state, rx)
}

fn post(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_connection_event_updates_watch_and_is_forwarded() {
    let (state, mut rx) = state(None);
    let app = router(state.clone());

    let body = json!({"connection_id": "c-1", "state": "active", "their_label": "Admin"});
    let resp = app
        .oneshot(post("/webhooks/topic/connections/", &body.to_string()))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(state.watch.state("c-1"), Some(ConnectionState::Active));
    match rx.try_recv().unwrap() {
        AgentEvent::Connection(ev) => assert_eq!(ev.connection_id, "c-1"),
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_route_without_trailing_slash() {
    let (state, mut rx) = state(None);

    let resp = router(state)
        .oneshot(post(
            "/webhooks/topic/issue_credential_v2_0",
            r#"{"cred_ex_id": "ex-1", "state": "offer-sent"}"#,
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    match rx.try_recv().unwrap() {
        AgentEvent::IssueCredential(ev) => {
            assert_eq!(ev.cred_ex_id, "ex-1");
            assert!(ev.v2);
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_unknown_topic_acknowledged_not_forwarded() {
    let (state, mut rx) = state(None);

    let resp = router(state)
        .oneshot(post("/webhooks/topic/revocation_registry/", r#"{"state": "active"}"#))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_malformed_body_rejected() {
    let (state, mut rx) = state(None);

    let resp = router(state.clone())
        .oneshot(post("/webhooks/topic/connections/", "{not json"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    // valid JSON, missing connection_id
    let resp = router(state)
        .oneshot(post("/webhooks/topic/connections/", r#"{"state": "active"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_secret_mismatch_unauthorized() {
    let (state, mut rx) = state(Some("s3cret"));
    let body = r#"{"content": "hello"}"#;

    let resp = router(state.clone())
        .oneshot(post("/webhooks/topic/basicmessages/", body))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert!(rx.try_recv().is_err());

    let mut req = post("/webhooks/topic/basicmessages/", body);
    req.headers_mut().insert("x-api-key", "s3cret".parse().unwrap());
    let resp = router(state).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(matches!(rx.try_recv().unwrap(), AgentEvent::BasicMessage(_)));
}

#[tokio::test]
async fn test_server_receives_over_http_and_stops() {
    let (state, mut rx) = state(None);
    let server = WebhookServer::start(0, state).await.unwrap();

    let url = format!(
        "http://127.0.0.1:{}/webhooks/topic/basicmessages/",
        server.addr.port()
    );
    let resp = reqwest::Client::new()
        .post(&url)
        .json(&json!({"connection_id": "c-9", "content": "ping"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);

    match rx.recv().await.unwrap() {
        AgentEvent::BasicMessage(ev) => assert_eq!(ev.content, "ping"),
        other => panic!("unexpected event: {:?}", other),
    }

    server.stop().await.unwrap();
}
