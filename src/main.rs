use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use optimization_detective::config::{CliArgs, DetectiveConfig};
use optimization_detective::gc;
use optimization_detective::server;
use optimization_detective::state::AppState;
use optimization_detective::store::SqliteStorage;

/// Sets up console logging plus an optional daily log file. The returned
/// guard must live as long as the process to flush the file writer.
fn init_tracing(
    log_dir: Option<&std::path::Path>,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = || {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "optimization_detective=info,tower_http=info".into())
    };
    let console = tracing_subscriber::fmt::layer();

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "optimization-detective.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter())
                .with(console)
                .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter())
                .with(console)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    let _log_guard = init_tracing(args.log_dir.as_deref());

    info!("Starting optimization-detective v{}", env!("CARGO_PKG_VERSION"));
    let config = DetectiveConfig::from_args(args)?;
    info!("Database: {:?}", config.db_path);
    info!("Breakpoints: {:?}", config.breakpoints);
    info!(
        "Sample size: {}, freshness TTL: {}s",
        config.limits.sample_size, config.limits.freshness_ttl_secs
    );

    let storage = Arc::new(SqliteStorage::open(&config.db_path)?);
    let port = config.port;
    let gc_interval = config.gc_interval_secs;
    let state = Arc::new(AppState::new(config, storage));

    // Spawn stale record sweeper
    let _gc_handle = (gc_interval > 0).then(|| gc::spawn_stale_record_sweeper(state.clone()));

    let router = server::build_router(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!("Listening on http://0.0.0.0:{}", port);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
