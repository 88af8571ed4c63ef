use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::{MakeSpan, TraceLayer};
use tracing::{error, info};
use tracing_subscriber::prelude::*;
use uuid::Uuid;

use arcade::config::{ArcadeConfig, CliOverrides};
use arcade::links::JoinLinks;
use arcade::metrics::ServerMetrics;
use arcade::{AppState, SessionRegistry, SnapshotScheduler, router};
use emu_session::{PatternLoader, SnapshotStore};

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

#[derive(Parser)]
#[command(name = "arcade")]
#[command(about = "Broadcast emulator sessions to web viewers")]
struct Cli {
    /// Config file (missing file is fine)
    #[arg(short, long, default_value = "arcade.toml")]
    config: PathBuf,

    /// Host to bind to
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Port for the web server
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory of source images, one session per file
    #[arg(long)]
    images_dir: Option<PathBuf>,

    /// Directory for snapshot records
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,

    /// Seconds between snapshots of each session
    #[arg(long)]
    snapshot_period_secs: Option<u64>,

    /// Host (and port) to advertise in join links
    #[arg(long)]
    public_host: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

impl Cli {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            host: self.host.clone(),
            port: self.port,
            public_host: self.public_host.clone(),
            images_dir: self.images_dir.clone(),
            snapshot_dir: self.snapshot_dir.clone(),
            snapshot_period_secs: self.snapshot_period_secs,
        }
    }
}

/// Address to print in join links when no public host is configured
fn advertised_host(addr: SocketAddr) -> String {
    if addr.ip().is_unspecified() {
        format!("localhost:{}", addr.port())
    } else {
        addr.to_string()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let default_directive = if cli.debug {
        "arcade=debug,emu_session=debug,tower_http=debug,info"
    } else {
        "arcade=info,emu_session=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    info!("Starting arcade");

    let config = ArcadeConfig::load(&cli.config, &cli.overrides())
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;

    let store = SnapshotStore::open(&config.snapshots.dir).with_context(|| {
        format!(
            "Failed to open snapshot directory {}",
            config.snapshots.dir.display()
        )
    })?;

    let registry = SessionRegistry::load(
        &config.sessions.images_dir,
        &config.sessions.extensions,
        &store,
        &PatternLoader,
    )
    .await
    .context("Failed to load sessions")?;
    let registry = Arc::new(registry);

    let listener = tokio::net::TcpListener::bind((config.server.host.as_str(), config.server.port))
        .await
        .with_context(|| {
            format!(
                "Failed to bind {}:{}",
                config.server.host, config.server.port
            )
        })?;
    let actual_addr = listener.local_addr()?;

    let public_host = config
        .server
        .public_host
        .clone()
        .unwrap_or_else(|| advertised_host(actual_addr));
    let links = JoinLinks::new(&config.server.public_scheme, &public_host)?;

    let metrics = Arc::new(ServerMetrics::new());

    // Hubs are already subscribed, so no frame is missed
    registry.run_all().await;

    let scheduler = SnapshotScheduler::new(
        store,
        config.snapshots.period,
        config.snapshots.keep,
        metrics.clone(),
    );
    scheduler.spawn(&registry);

    info!("Arcade listening on http://{}", actual_addr);
    info!("");
    for id in registry.ids() {
        info!("  {:<16} {}", id, links.url_for(id));
    }
    info!("");
    info!("API endpoints:");
    info!("  GET    /api/sessions   - List sessions with join links");
    info!("  GET    /api/metrics    - Server metrics");
    info!("  GET    /health         - Health check");

    let state = AppState {
        registry: registry.clone(),
        metrics,
        links: Arc::new(links),
        queue_capacity: config.viewers.queue_capacity,
    };

    let app = router(state)
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive());

    // Create shutdown signal handler
    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal, cleaning up...");
    };

    // Run server with graceful shutdown
    let server_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error");

    info!("Waiting for in-flight snapshots...");
    scheduler.shutdown(config.snapshots.shutdown_grace).await;

    info!("Shutdown complete");
    server_result
}
