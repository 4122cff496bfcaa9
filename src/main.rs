use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use approvals::config::{self, Config};
use approvals::middleware::identity::{Actor, Role};
use approvals::models::approval::Decision;
use approvals::store::{ChangeStore, MemoryStore, PgStore};
use approvals::AppState;

mod cli;

/// Longest a command waits for decision webhooks before exiting.
const WEBHOOK_DRAIN_LIMIT: Duration = Duration::from_secs(45);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load()?;
    init_tracing(cfg.log_json)?;

    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port, memory }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port, memory).await
        }
        Some(cli::Commands::Migrate) => {
            let db = PgStore::connect(&cfg.database_url)
                .await
                .context("connecting to database")?;
            db.migrate().await.context("running migrations")?;
            println!("Migrations applied.");
            Ok(())
        }
        Some(cli::Commands::Requests { command }) => {
            let db = PgStore::connect(&cfg.database_url)
                .await
                .context("connecting to database")?;
            let state = AppState::new(Arc::new(db), cfg)?;
            handle_request_command(&state, command).await
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port, false).await
        }
    };

    opentelemetry::global::shutdown_tracer_provider();
    if let Err(e) = result {
        eprintln!("Error: {:?}", e);
        std::process::exit(1);
    }
    Ok(())
}

/// fmt (or JSON) logging filtered by `RUST_LOG`, plus an OTLP exporter when
/// `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
fn init_tracing(json: bool) -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "qadesk"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    let (plain, structured) = if json {
        (None, Some(tracing_subscriber::fmt::layer().json()))
    } else {
        (Some(tracing_subscriber::fmt::layer()), None)
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "approvals=debug,qadesk=debug,tower_http=debug".into()),
        ))
        .with(plain)
        .with(structured)
        .with(telemetry_layer)
        .init();
    Ok(())
}

async fn run_server(cfg: Config, port: u16, memory: bool) -> anyhow::Result<()> {
    let store: Arc<dyn ChangeStore> = if memory {
        tracing::warn!("Using in-memory store; all data is lost on exit");
        Arc::new(MemoryStore::new())
    } else {
        tracing::info!("Connecting to database...");
        let db = PgStore::connect(&cfg.database_url)
            .await
            .context("connecting to database")?;
        tracing::info!("Running migrations...");
        db.migrate().await?;
        Arc::new(db)
    };

    if !cfg.webhook_urls.is_empty() {
        tracing::info!(count = cfg.webhook_urls.len(), "Decision webhooks enabled");
    }

    let state = Arc::new(AppState::new(store, cfg)?);
    let app = approvals::build_app(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("qadesk listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state
        .workflow
        .applier
        .flush_webhooks(WEBHOOK_DRAIN_LIMIT)
        .await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

/// Resolve the acting admin for CLI commands from `--admin-id` or config.
async fn admin_actor(state: &AppState, admin_id: Option<i64>) -> anyhow::Result<Actor> {
    let id = admin_id
        .or(state.config.admin_id)
        .context("no acting admin: pass --admin-id or set QADESK_ADMIN_ID")?;
    let user = state
        .store
        .get_user(id)
        .await?
        .with_context(|| format!("user {} not found", id))?;
    if !user.is_active {
        anyhow::bail!("user {} is not active", id);
    }
    Ok(Actor::new(user.id, Role::parse(&user.role), user.full_name))
}

fn parse_request_ids(raw: &[String]) -> anyhow::Result<Vec<uuid::Uuid>> {
    raw.iter()
        .map(|s| {
            uuid::Uuid::parse_str(s).map_err(|_| anyhow::anyhow!("invalid request ID: {}", s))
        })
        .collect()
}

async fn handle_request_command(
    state: &AppState,
    cmd: cli::RequestCommands,
) -> anyhow::Result<()> {
    let workflow = &state.workflow;
    match cmd {
        cli::RequestCommands::List { user_id, admin_id } => {
            let actor = admin_actor(state, admin_id).await?;
            let rows = workflow.queue.list_pending(&actor, user_id).await?;

            if rows.is_empty() {
                println!("No pending requests.");
                return Ok(());
            }

            println!(
                "{:<38} {:<24} {:<12} {:<8} {:>7}  SUBMITTED",
                "ID", "USER", "DATE", "TYPE", "CHANGES"
            );
            for r in rows {
                let who = if r.full_name.is_empty() {
                    format!("#{}", r.request.user_id)
                } else {
                    r.full_name.clone()
                };
                println!(
                    "{:<38} {:<24} {:<12} {:<8} {:>7}  {}",
                    r.request.id,
                    who,
                    r.request.target_date,
                    r.request.request_type.as_str(),
                    r.pending_changes,
                    r.request.created_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        cli::RequestCommands::Show {
            request_id,
            admin_id,
        } => {
            let actor = admin_actor(state, admin_id).await?;
            let id = parse_request_ids(&[request_id])?[0];
            let diff = workflow.queue.get_diff(&actor, id).await?;
            println!("{}", serde_json::to_string_pretty(&diff)?);
        }
        cli::RequestCommands::Approve {
            request_ids,
            note,
            admin_id,
        } => {
            decide_from_cli(state, &request_ids, Decision::Approve, note, admin_id).await?;
        }
        cli::RequestCommands::Reject {
            request_ids,
            note,
            admin_id,
        } => {
            decide_from_cli(state, &request_ids, Decision::Reject, note, admin_id).await?;
        }
    }
    Ok(())
}

async fn decide_from_cli(
    state: &AppState,
    raw_ids: &[String],
    decision: Decision,
    note: Option<String>,
    admin_id: Option<i64>,
) -> anyhow::Result<()> {
    let actor = admin_actor(state, admin_id).await?;
    let ids = parse_request_ids(raw_ids)?;
    let results = state
        .workflow
        .applier
        .decide_many(&actor, &ids, decision, note.as_deref())
        .await;
    if !state
        .workflow
        .applier
        .flush_webhooks(WEBHOOK_DRAIN_LIMIT)
        .await
    {
        eprintln!("Warning: some decision webhooks were not delivered before exit.");
    }

    let mut failed = 0;
    for item in &results {
        match (&item.status, &item.error) {
            (Some(status), _) => println!("Request {} {}.", item.request_id, status.as_str()),
            (None, Some(err)) => {
                failed += 1;
                println!("Request {} failed: {}", item.request_id, err);
            }
            (None, None) => {}
        }
    }
    if failed > 0 {
        anyhow::bail!("{} of {} requests could not be decided", failed, results.len());
    }
    Ok(())
}
