//! Per-connection state machine with broadcast notification.
//!
//! Each connection id owns a `tokio::sync::watch` channel holding its
//! [`ConnectionState`]. The webhook receiver feeds state changes in as they
//! arrive; any number of waiters can subscribe and observe the transition to
//! `Active` independently. States only move forward:
//! `Pending → Active → Terminated`.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::watch;

use crate::errors::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    Pending,
    Active,
    Terminated,
}

impl ConnectionState {
    /// Map the agent's connection `state` (or RFC 23 state) string.
    pub fn from_agent(state: &str) -> Self {
        match state {
            "active" | "completed" => ConnectionState::Active,
            "abandoned" | "deleted" | "error" => ConnectionState::Terminated,
            _ => ConnectionState::Pending,
        }
    }
}

/// Shared, cheaply-cloneable registry of connection state channels.
#[derive(Clone, Default)]
pub struct ConnectionWatch {
    channels: Arc<DashMap<String, watch::Sender<ConnectionState>>>,
}

impl ConnectionWatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an observed state. Backward moves are ignored.
    /// Returns the state held after the update.
    pub fn observe(&self, connection_id: &str, state: ConnectionState) -> ConnectionState {
        let entry = self
            .channels
            .entry(connection_id.to_string())
            .or_insert_with(|| watch::channel(ConnectionState::Pending).0);

        let changed = entry.value().send_if_modified(|current| {
            if state > *current {
                *current = state;
                true
            } else {
                false
            }
        });
        let current = *entry.value().borrow();
        if changed {
            tracing::debug!(connection_id, state = ?current, "connection state advanced");
        }
        current
    }

    pub fn state(&self, connection_id: &str) -> Option<ConnectionState> {
        self.channels
            .get(connection_id)
            .map(|tx| *tx.value().borrow())
    }

    /// Subscribe to a connection's state. Unknown ids start out `Pending`.
    pub fn subscribe(&self, connection_id: &str) -> watch::Receiver<ConnectionState> {
        self.channels
            .entry(connection_id.to_string())
            .or_insert_with(|| watch::channel(ConnectionState::Pending).0)
            .value()
            .subscribe()
    }

    /// Resolve once the connection is `Active`.
    ///
    /// Fails with `Timeout` after `timeout`, or `Unreachable` if the
    /// connection is terminated first.
    pub async fn wait_active(&self, connection_id: &str, timeout: Duration) -> AppResult<()> {
        let mut rx = self.subscribe(connection_id);
        let wait = async {
            loop {
                let state = *rx.borrow_and_update();
                match state {
                    ConnectionState::Active => return Ok(()),
                    ConnectionState::Terminated => {
                        return Err(AppError::Unreachable(format!(
                            "connection {} was terminated",
                            connection_id
                        )))
                    }
                    ConnectionState::Pending => {}
                }
                if rx.changed().await.is_err() {
                    return Err(AppError::Unreachable(format!(
                        "connection {} is no longer tracked",
                        connection_id
                    )));
                }
            }
        };

        tokio::time::timeout(timeout, wait).await.map_err(|_| {
            AppError::Timeout(format!(
                "connection {} not active after {}s",
                connection_id,
                timeout.as_secs()
            ))
        })?
    }
}
