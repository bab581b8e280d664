use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;

use weekly_planner::clock::{Clock, SystemClock};
use weekly_planner::config::PlannerConfig;
use weekly_planner::planner::Planner;
use weekly_planner::recurrence::spawn_sync_loop;
use weekly_planner::session::Session;
use weekly_planner::store::{LibSqlBackend, TaskStore, TemplateStore};
use weekly_planner::tasks::{PlannerState, planner_routes};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = PlannerConfig::from_env().context("Invalid planner configuration")?;

    eprintln!("📅 Weekly Planner v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", config.db_path.display());
    eprintln!(
        "   Account: {}",
        config.user_id.as_deref().unwrap_or("(signed out, mutations disabled)")
    );
    eprintln!("   Retention: {:?}", config.retention);
    eprintln!("   Tasks WS: ws://0.0.0.0:{}/ws/tasks", config.http_port);
    eprintln!("   Tasks API: http://0.0.0.0:{}/api/tasks\n", config.http_port);

    // ── Database ─────────────────────────────────────────────────────────
    let backend = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?,
    );
    let tasks: Arc<dyn TaskStore> = backend.clone();
    let templates: Arc<dyn TemplateStore> = backend;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // ── Planner + sync loop ─────────────────────────────────────────────
    let planner = Arc::new(Planner::new(
        Session::from_user(config.user_id.clone()),
        tasks,
        templates,
        clock,
        config.retention,
    ));

    let sync = planner
        .orchestrator()
        .map(|orchestrator| spawn_sync_loop(Arc::clone(orchestrator), config.day_check_interval));
    if sync.is_none() {
        tracing::warn!("No PLANNER_USER set; recurring tasks will not be materialized");
    }

    // ── HTTP / WebSocket ────────────────────────────────────────────────
    let app = planner_routes(PlannerState::new(Arc::clone(&planner)));
    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.http_port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.http_port))?;
    tracing::info!(port = config.http_port, "Planner server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown requested");
        })
        .await
        .context("Server error")?;

    if let Some(handle) = sync {
        handle.shutdown().await;
    }
    Ok(())
}
