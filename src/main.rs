use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod cli;
mod config;
mod engine;
mod errors;
mod jobs;
mod lock;
mod models;
mod notification;
mod store;

use api::AppState;
use engine::{ApprovalEngine, EngineConfig};
use models::{ApprovalFilter, ApprovalSpec, ApprovalStatus, Decision, Outcome};
use notification::{NotificationSink, SlackNotifier, WebhookNotifier};
use store::PgStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "deploygate=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(cli::Commands::Approval { command }) => {
            let engine = build_engine(&cfg).await?;
            handle_approval_command(command, &engine).await
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn build_engine(cfg: &config::Config) -> anyhow::Result<Arc<ApprovalEngine>> {
    tracing::info!("Connecting to database...");
    let db = PgStore::connect(&cfg.database_url).await?;

    tracing::info!("Running migrations...");
    db.migrate().await?;

    let mut sinks: Vec<Arc<dyn NotificationSink>> = Vec::new();
    sinks.push(Arc::new(SlackNotifier::new(cfg.slack_webhook_url.clone())));
    if !cfg.webhook_urls.is_empty() {
        sinks.push(Arc::new(WebhookNotifier::new(
            cfg.webhook_urls.clone(),
            cfg.webhook_secret.clone(),
        )));
    }

    Ok(ApprovalEngine::new(
        Arc::new(db),
        sinks,
        EngineConfig {
            default_timeout_seconds: cfg.default_timeout_seconds,
            lock_timeout: Duration::from_secs(cfg.lock_timeout_seconds),
        },
    ))
}

async fn run_server(cfg: config::Config, port: u16) -> anyhow::Result<()> {
    let engine = build_engine(&cfg).await?;

    // Requests that were pending before this process started get their
    // timers back; overdue ones fire immediately.
    let recovered = engine.recover_pending().await?;
    tracing::info!(recovered, "startup timer recovery complete");

    jobs::sweep::spawn(
        engine.clone(),
        Duration::from_secs(cfg.sweep_interval_seconds),
    );
    tracing::info!(
        interval_secs = cfg.sweep_interval_seconds,
        "background overdue sweep started"
    );

    let state = Arc::new(AppState {
        engine: engine.clone(),
    });

    let app = axum::Router::new()
        .route("/healthz", axum::routing::get(|| async { "ok" }))
        .nest("/api/v1", api::api_router())
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("deploygate listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain armed timers before exit; pending requests are recovered on the
    // next startup.
    engine.shutdown();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("shutdown signal received");
}

async fn handle_approval_command(
    command: cli::ApprovalCommands,
    engine: &Arc<ApprovalEngine>,
) -> anyhow::Result<()> {
    match command {
        cli::ApprovalCommands::Create {
            project,
            env,
            build,
            job,
            version,
            description,
            timeout_seconds,
            request_id,
        } => {
            let request = engine
                .create(ApprovalSpec {
                    request_id,
                    project,
                    env,
                    build,
                    job,
                    version,
                    description,
                    action: None,
                    timeout_seconds,
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&request)?);
        }
        cli::ApprovalCommands::Approve {
            request_id,
            operator,
            role,
            comment,
        } => {
            let resolved = engine
                .resolve(
                    &request_id,
                    Outcome::Approved,
                    Decision {
                        operator,
                        operator_role: role,
                        comment,
                    },
                )
                .await?;
            println!("approved {} ({})", resolved.request_id, resolved.status);
        }
        cli::ApprovalCommands::Reject {
            request_id,
            operator,
            role,
            comment,
        } => {
            let resolved = engine
                .resolve(
                    &request_id,
                    Outcome::Rejected,
                    Decision {
                        operator,
                        operator_role: role,
                        comment,
                    },
                )
                .await?;
            println!("rejected {} ({})", resolved.request_id, resolved.status);
        }
        cli::ApprovalCommands::Show { request_id } => {
            let request = engine.get(&request_id).await?;
            println!("{}", serde_json::to_string_pretty(&request)?);
        }
        cli::ApprovalCommands::List {
            project,
            env,
            status,
        } => {
            let status = match status.as_deref() {
                None => None,
                Some(s) => Some(
                    s.parse::<ApprovalStatus>()
                        .map_err(|e| anyhow::anyhow!(e))?,
                ),
            };
            let requests = engine
                .list(&ApprovalFilter {
                    project,
                    env,
                    status,
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&requests)?);
        }
        cli::ApprovalCommands::History { request_id } => {
            let history = engine.history(&request_id).await?;
            println!("{}", serde_json::to_string_pretty(&history)?);
        }
        cli::ApprovalCommands::Stats => {
            let stats = engine.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }
    Ok(())
}
