//! Webhook receiver for agent events.
//!
//! The agent posts every protocol state change to
//! `/webhooks/topic/{topic}/`. Connection events update the shared
//! [`ConnectionWatch`] here, before the role loop sees them, so a command
//! that is waiting on a connection wakes up even while the loop is busy.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use crate::errors::{AppError, AppResult};
use crate::models::event::AgentEvent;
use crate::watch::ConnectionWatch;

pub struct WebhookState {
    pub events: mpsc::Sender<AgentEvent>,
    pub watch: ConnectionWatch,
    pub secret: Option<String>,
}

pub fn router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/webhooks/topic/:topic", post(receive))
        .route("/webhooks/topic/:topic/", post(receive))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Parse a webhook body. Failures are logged once and returned.
pub fn decode_event(topic: &str, body: &[u8]) -> AppResult<AgentEvent> {
    let parsed = serde_json::from_slice(body)
        .map_err(|e| AppError::MalformedPayload(format!("{} webhook: {}", topic, e)))
        .and_then(|value| AgentEvent::parse(topic, value));
    if let Err(ref e) = parsed {
        tracing::warn!(topic, error = %e, "dropping undecodable webhook");
    }
    parsed
}

async fn receive(
    State(state): State<Arc<WebhookState>>,
    Path(topic): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    if let Some(secret) = state.secret.as_deref() {
        let provided = headers.get("x-api-key").and_then(|v| v.to_str().ok());
        if provided != Some(secret) {
            tracing::warn!(topic, "webhook rejected: secret mismatch");
            return Err(AppError::Unauthorized);
        }
    }

    let event = decode_event(&topic, &body)?;

    match &event {
        AgentEvent::Other { topic } => {
            tracing::debug!(topic, "ignoring webhook topic");
            return Ok(StatusCode::OK);
        }
        AgentEvent::Connection(conn) => {
            state.watch.observe(&conn.connection_id, conn.connection_state());
        }
        _ => {}
    }

    if state.events.send(event).await.is_err() {
        tracing::warn!(topic, "role loop has stopped, webhook dropped");
    }
    Ok(StatusCode::OK)
}

/// A running webhook server.
pub struct WebhookServer {
    pub addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<std::io::Result<()>>,
}

impl WebhookServer {
    /// Bind `0.0.0.0:port` (port 0 picks a free one) and serve in the background.
    pub async fn start(port: u16, state: Arc<WebhookState>) -> anyhow::Result<Self> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let (tx, rx) = oneshot::channel::<()>();

        let app = router(state);
        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    rx.await.ok();
                })
                .await
        });

        tracing::info!("Webhook receiver listening on {}", addr);
        Ok(Self {
            addr,
            shutdown: Some(tx),
            handle,
        })
    }

    pub async fn stop(mut self) -> anyhow::Result<()> {
        if let Some(tx) = self.shutdown.take() {
            tx.send(()).ok();
        }
        self.handle.await??;
        tracing::info!("Webhook receiver stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_event_rejects_garbage() {
        assert!(matches!(
            decode_event("connections", b"{not json"),
            Err(AppError::MalformedPayload(_))
        ));
        assert!(matches!(
            decode_event("basicmessages", br#"{"content": "hi"}"#),
            Ok(AgentEvent::BasicMessage(_))
        ));
    }
}
