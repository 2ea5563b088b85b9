//! Role consoles and the loop that drives them.
//!
//! Each process runs one role. A single task owns the role's state and
//! alternates between operator commands and agent events, so the trackers
//! need no locking. Only the [`ConnectionWatch`] is shared with the webhook
//! task.

use std::future::Future;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::agent::AdminClient;
use crate::config::Config;
use crate::console::Console;
use crate::errors::{AppError, AppResult};
use crate::models::event::AgentEvent;
use crate::watch::ConnectionWatch;

pub mod admin;
pub mod registrar;
pub mod verifier;

pub use admin::Admin;
pub use registrar::Registrar;
pub use verifier::Verifier;

/// Handles shared by every role.
#[derive(Clone)]
pub struct Session {
    pub client: AdminClient,
    pub watch: ConnectionWatch,
    pub cfg: Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

#[async_trait]
pub trait RoleHandler: Send {
    fn name(&self) -> &'static str;

    fn print_menu(&self);

    async fn on_event(&mut self, event: AgentEvent);

    async fn on_command(&mut self, command: &str, console: &mut Console) -> AppResult<Flow>;

    /// Connections to delete at exit.
    fn open_connections(&self) -> Vec<String>;

    fn session(&self) -> &Session;
}

/// Run `role` until the operator exits, input closes or Ctrl-C arrives,
/// then tear down.
///
/// Only the teardown result is returned: command and event failures are
/// reported and the loop continues.
pub async fn run<R: RoleHandler>(
    role: R,
    console: Console,
    events: mpsc::Receiver<AgentEvent>,
) -> AppResult<()> {
    let interrupted = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    run_until(role, console, events, interrupted).await
}

/// Same as [`run`], with `shutdown` in place of Ctrl-C.
pub async fn run_until<R, S>(
    mut role: R,
    mut console: Console,
    mut events: mpsc::Receiver<AgentEvent>,
    shutdown: S,
) -> AppResult<()>
where
    R: RoleHandler,
    S: Future<Output = ()>,
{
    tracing::info!("{} console started", role.name());
    role.print_menu();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("interrupted, closing connections");
                break;
            }
            line = console.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        tracing::info!("operator input closed");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("failed to read operator input: {}", e);
                        break;
                    }
                };
                let command = line.trim();
                if command.is_empty() {
                    continue;
                }
                match role.on_command(command, &mut console).await {
                    Ok(Flow::Exit) => break,
                    Ok(Flow::Continue) => {}
                    Err(e) => report(&e),
                }
                role.print_menu();
            }
            Some(event) = events.recv() => {
                role.on_event(event).await;
            }
        }
    }

    let open = role.open_connections();
    teardown(&role.session().client, &open).await
}

pub fn report(err: &AppError) {
    if err.is_transport() {
        tracing::warn!("command failed: {}", err);
    }
    println!("Error: {}", err);
}

/// Delete every connection in `connection_ids`. Connections the agent no
/// longer knows count as closed.
pub async fn teardown(client: &AdminClient, connection_ids: &[String]) -> AppResult<()> {
    let mut failed = Vec::new();
    for id in connection_ids {
        match client.delete_connection(id).await {
            Ok(()) | Err(AppError::NotFound { .. }) => {
                tracing::info!(connection_id = %id, "connection closed at exit");
            }
            Err(e) => {
                tracing::error!(connection_id = %id, error = %e, "failed to close connection at exit");
                failed.push(id.clone());
            }
        }
    }
    if failed.is_empty() {
        Ok(())
    } else {
        Err(AppError::Unreachable(format!(
            "failed to close {} connection(s): {}",
            failed.len(),
            failed.join(", ")
        )))
    }
}

/// Where a holder fetches a connectionless proof request: the public
/// webhook target when set, else the local webhook listener.
pub(crate) fn proof_request_url(cfg: &Config, pres_ex_id: &str) -> String {
    let base = cfg
        .webhook_target
        .clone()
        .unwrap_or_else(|| format!("http://localhost:{}/webhooks", cfg.webhook_port));
    format!("{}/pres_req/{}/", base.trim_end_matches('/'), pres_ex_id)
}

pub(crate) fn fmt_time(t: &chrono::DateTime<chrono::Utc>) -> String {
    t.format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectionless_url_uses_webhook_target() {
        let mut cfg = Config::default();
        assert_eq!(
            proof_request_url(&cfg, "p-1"),
            "http://localhost:8022/webhooks/pres_req/p-1/"
        );
        cfg.webhook_target = Some("https://tunnel.example/webhooks/".into());
        assert_eq!(
            proof_request_url(&cfg, "p-1"),
            "https://tunnel.example/webhooks/pres_req/p-1/"
        );
    }
}
