use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use preview_orchestrator::config::OrchestratorConfig;
use preview_orchestrator::dbprovisioner::DbProvisioner;
use preview_orchestrator::engine::PreviewService;
use preview_orchestrator::locks::KeyedLocks;
use preview_orchestrator::router::build_router;
use preview_orchestrator::runtime::detect_runtime;
use preview_orchestrator::session::SessionManager;
use preview_orchestrator::AppState;

#[derive(Parser, Debug)]
#[command(name = "preview-orchestrator")]
#[command(author, version, about = "Preview and session orchestrator", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "orchestrator.toml")]
    config: String,

    /// Override log level (falls back to RUST_LOG, then "info")
    #[arg(short, long)]
    log_level: Option<String>,

    /// Address to bind the control-plane HTTP server on
    #[arg(long, default_value = "0.0.0.0:8088")]
    bind: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = OrchestratorConfig::load(&cli.config)?;

    let log_level = cli.log_level.clone().unwrap_or_else(|| "info".to_string());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting preview & session orchestrator v{}", env!("CARGO_PKG_VERSION"));

    let metrics_handle = preview_orchestrator::metrics::init_metrics();
    tracing::info!("Prometheus metrics initialized at /metrics");

    let config = Arc::new(config);

    let db = preview_orchestrator::db::init(std::path::Path::new(&config.data_dir)).await?;

    let runtime = detect_runtime(&config.runtime).await?;

    let router_strategy: Arc<dyn preview_orchestrator::router::Router> =
        Arc::from(build_router(&config).context("failed to build router adapter")?);

    let locks = Arc::new(KeyedLocks::new());

    let previews = Arc::new(PreviewService::new(
        config.clone(),
        runtime.clone(),
        router_strategy.clone(),
        locks.clone(),
    ));

    let sessions = Arc::new(SessionManager::new(config.clone(), db.clone()));
    let db_provisioner = Arc::new(DbProvisioner::new(&config));

    let routes = if config.router_mode == preview_orchestrator::config::RouterMode::Proxy {
        let table = Arc::new(arc_swap::ArcSwap::from_pointee(preview_orchestrator::proxy::RouteTable::new()));
        if let Err(err) = restore_proxy_routes(&previews, &router_strategy, &table).await {
            tracing::warn!(error = %err, "failed to restore proxy routes on startup");
        }
        Some(table)
    } else {
        None
    };

    let state = Arc::new(
        AppState::new(
            config.clone(),
            db.clone(),
            runtime.clone(),
            previews.clone(),
            sessions.clone(),
            db_provisioner.clone(),
            locks.clone(),
            routes.clone(),
        )
        .with_metrics(metrics_handle),
    );

    let app = preview_orchestrator::api::create_router(state);

    let addr: SocketAddr = cli.bind.parse().context("invalid --bind address")?;
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "control-plane API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

/// Repopulates the shared proxy route table from whatever preview
/// containers are already running: a process restart must not orphan
/// previews that are still up (the restart-time route recovery behavior).
async fn restore_proxy_routes(
    previews: &Arc<PreviewService>,
    router: &Arc<dyn preview_orchestrator::router::Router>,
    routes: &Arc<arc_swap::ArcSwap<preview_orchestrator::proxy::RouteTable>>,
) -> Result<()> {
    let containers = previews.list_all_previews().await?;
    let table = preview_orchestrator::proxy::RouteTable::new();

    for container in containers.iter().filter(|c| c.running) {
        let Some(url) = router.url_from_container(container) else {
            continue;
        };
        let Some(host) = url.strip_prefix("https://").or_else(|| url.strip_prefix("http://")) else {
            continue;
        };
        let backend = preview_orchestrator::proxy::Backend::new(container.id.clone(), container.name.clone(), 3000);
        table.add_route(host.to_string(), backend);
        tracing::info!(host, container = %container.name, "restored proxy route on startup");
    }

    routes.store(Arc::new(table));
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
