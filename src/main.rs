use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use unicred::agent::{AdminClient, WebhookServer, WebhookState};
use unicred::cli::{Cli, Commands};
use unicred::config::{self, Config};
use unicred::console::Console;
use unicred::roles::{self, Admin, Registrar, RoleHandler, Session, Verifier};
use unicred::watch::ConnectionWatch;

const EVENT_BUFFER: usize = 256;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so they do not interleave with the menus on stdout.
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "unicred=info,tower_http=warn".into()),
    );
    let json = std::env::var("UNICRED_LOG_FORMAT").map(|v| v == "json").unwrap_or(false);
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    let mut cfg = config::load()?;
    let args = Cli::parse();
    args.agent.apply(&mut cfg);
    cfg.validate()?;

    // anyhow reports a returned error on stderr and exits non-zero
    match args.command {
        Some(Commands::Registrar) | None => run_role(cfg, Registrar::new).await,
        Some(Commands::Admin) => run_role(cfg, Admin::new).await,
        Some(Commands::Verifier) => run_role(cfg, Verifier::new).await,
    }
}

async fn run_role<R, F>(cfg: Config, make: F) -> anyhow::Result<()>
where
    R: RoleHandler,
    F: FnOnce(Session) -> R,
{
    let client = AdminClient::new(&cfg)?;
    let watch = ConnectionWatch::new();
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);

    let server = WebhookServer::start(
        cfg.webhook_port,
        Arc::new(WebhookState {
            events: tx,
            watch: watch.clone(),
            secret: cfg.webhook_secret.clone(),
        }),
    )
    .await?;
    tracing::info!(
        "Admin API at {}, aip {}, format {}, wallet {}",
        client.base_url(),
        cfg.aip,
        cfg.cred_format,
        cfg.wallet_type
    );
    if let Some(target) = &cfg.webhook_target {
        tracing::info!("Agent webhook target: {}", target);
    }

    let role = make(Session {
        client,
        watch,
        cfg,
    });
    let teardown = roles::run(role, Console::stdin(), rx).await;

    server.stop().await?;
    teardown?;
    tracing::info!("Shutdown complete");
    Ok(())
}
