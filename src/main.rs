use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

mod api;
mod approval;
mod cli;
mod config;
mod errors;
mod jobs;
mod models;
mod notification;
mod sessions;
mod store;

use approval::{ApprovalCoordinator, CancelOutcome, ResolveOutcome};
use notification::telegram::TelegramNotifier;
use notification::webhook::ResolutionEvents;
use sessions::SessionDirectory;
use store::memory::MemoryStore;
use store::postgres::PgStore;
use store::ApprovalStore;

/// Shared application state passed to handlers.
pub struct AppState {
    pub coordinator: Arc<ApprovalCoordinator>,
    pub sessions: Arc<SessionDirectory>,
    pub db: Option<PgStore>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "overseer=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => run_server(cfg, port).await,
        Some(cli::Commands::Approval { command }) => {
            let (coordinator, _) = build_coordinator(&cfg).await?;
            handle_approval_command(command, &coordinator).await
        }
        Some(cli::Commands::Session { command }) => {
            // The session registry lives in the server process; the CLI can
            // only show what the local process knows, which for a fresh
            // invocation is nothing. Listing goes through the HTTP API for a
            // running server; this is a convenience for dev setups.
            match command {
                cli::SessionCommands::List => {
                    println!("session list requires the HTTP API of a running server (GET /api/v1/sessions)");
                    Ok(())
                }
            }
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

/// Build the store + coordinator pair the configured way. The CLI and the
/// server share this so a direct `overseer approval approve` goes through
/// exactly the same transition path as the API.
async fn build_coordinator(
    cfg: &config::Config,
) -> anyhow::Result<(Arc<ApprovalCoordinator>, Arc<dyn ApprovalStore>)> {
    let (store, _db) = build_store(cfg).await?;
    let sessions = Arc::new(SessionDirectory::new());
    let notifier = TelegramNotifier::new(
        cfg.telegram_bot_token.clone(),
        cfg.telegram_chat_id.clone(),
    );
    let events = ResolutionEvents::new(cfg.webhook_urls.clone(), cfg.webhook_secret.clone());
    let coordinator = Arc::new(ApprovalCoordinator::new(
        store.clone(),
        sessions,
        notifier,
        events,
        cfg.approval_timeout_minutes,
    ));
    Ok((coordinator, store))
}

async fn build_store(
    cfg: &config::Config,
) -> anyhow::Result<(Arc<dyn ApprovalStore>, Option<PgStore>)> {
    match cfg.store_mode {
        config::StoreMode::Postgres => {
            tracing::info!("Connecting to database...");
            let db = PgStore::connect(&cfg.database_url).await?;
            tracing::info!("Running migrations...");
            db.migrate().await?;
            Ok((Arc::new(db.clone()), Some(db)))
        }
        config::StoreMode::Memory => {
            tracing::warn!("Using in-memory store; approvals will not survive a restart");
            Ok((Arc::new(MemoryStore::new()), None))
        }
    }
}

async fn run_server(cfg: config::Config, port: u16) -> anyhow::Result<()> {
    let (store, db) = build_store(&cfg).await?;
    let sessions = Arc::new(SessionDirectory::new());
    let notifier = TelegramNotifier::new(
        cfg.telegram_bot_token.clone(),
        cfg.telegram_chat_id.clone(),
    );
    if !notifier.is_configured() {
        tracing::warn!("Telegram notifier not configured; approvals must be resolved via API/CLI");
    }
    if cfg.admin_key.is_none() {
        tracing::warn!("OVERSEER_ADMIN_KEY not set; management API requests will be rejected");
    }
    let events = ResolutionEvents::new(cfg.webhook_urls.clone(), cfg.webhook_secret.clone());

    let coordinator = Arc::new(ApprovalCoordinator::new(
        store.clone(),
        sessions.clone(),
        notifier,
        events,
        cfg.approval_timeout_minutes,
    ));

    let sweep_interval = cfg.sweep_interval_seconds;
    let max_concurrent = cfg.max_concurrent_expires;

    let state = Arc::new(AppState {
        coordinator: coordinator.clone(),
        sessions,
        db,
    });

    let app = axum::Router::new()
        // Health endpoints (no auth)
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readiness_check))
        // Management API — nested under /api/v1 (preserves middleware + fallback)
        .nest("/api/v1", api::api_router())
        .with_state(state.clone())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(request_id_middleware));

    jobs::expiry::spawn(coordinator, store, sweep_interval, max_concurrent);
    tracing::info!(
        interval_seconds = sweep_interval,
        max_concurrent,
        "Expiry sweep started"
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Overseer listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Middleware: injects a unique X-Request-Id into every response.
/// This allows clients to correlate errors with service logs.
async fn request_id_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let req_id = Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = axum::http::HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

async fn readiness_check(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
) -> Result<&'static str, axum::http::StatusCode> {
    if let Some(db) = &state.db {
        db.ping().await.map_err(|e| {
            tracing::error!("readiness probe failed: {}", e);
            axum::http::StatusCode::SERVICE_UNAVAILABLE
        })?;
    }
    Ok("ready")
}

async fn handle_approval_command(
    command: cli::ApprovalCommands,
    coordinator: &ApprovalCoordinator,
) -> anyhow::Result<()> {
    match command {
        cli::ApprovalCommands::List => {
            let pending = coordinator.list_pending().await?;
            if pending.is_empty() {
                println!("No pending approvals.");
                return Ok(());
            }
            for rec in pending {
                println!(
                    "{}  agent={}  session={}  expires={}",
                    rec.id,
                    rec.agent_id,
                    rec.session_id,
                    rec.expires_at.format("%Y-%m-%d %H:%M:%S UTC")
                );
            }
            Ok(())
        }
        cli::ApprovalCommands::Approve {
            request_id,
            approved_by,
            notes,
        } => {
            let id = parse_id(&request_id)?;
            match coordinator.resolve(id, true, &approved_by, notes).await? {
                ResolveOutcome::Resolved(rec) => {
                    println!("Approved {} (session {})", rec.id, rec.session_id);
                }
                other => print_resolve_failure(other),
            }
            Ok(())
        }
        cli::ApprovalCommands::Reject {
            request_id,
            approved_by,
            notes,
        } => {
            let id = parse_id(&request_id)?;
            match coordinator.resolve(id, false, &approved_by, notes).await? {
                ResolveOutcome::Resolved(rec) => {
                    println!("Rejected {}", rec.id);
                }
                other => print_resolve_failure(other),
            }
            Ok(())
        }
        cli::ApprovalCommands::Cancel { request_id, reason } => {
            let id = parse_id(&request_id)?;
            match coordinator.cancel(id, &reason).await? {
                CancelOutcome::Cancelled(rec) => {
                    println!("Cancelled {}: {}", rec.id, reason);
                }
                CancelOutcome::AlreadyTerminal { status } => {
                    println!("Not cancelled: approval is already {}", status);
                }
                CancelOutcome::NotFound => println!("Approval not found."),
            }
            Ok(())
        }
    }
}

fn parse_id(raw: &str) -> anyhow::Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| anyhow::anyhow!("'{}' is not a valid approval id", raw))
}

fn print_resolve_failure(outcome: ResolveOutcome) {
    match outcome {
        ResolveOutcome::Resolved(rec) => println!("Resolved {}", rec.id),
        ResolveOutcome::NotFound => println!("Approval not found."),
        ResolveOutcome::AlreadyResolved { status } => {
            println!("Not applied: approval is already {}", status);
        }
        ResolveOutcome::AlreadyCancelled { reason } => {
            println!("Not applied: approval was cancelled ({})", reason);
        }
        ResolveOutcome::Expired => {
            println!("Not applied: approval deadline has passed.");
        }
    }
}
