//! stratum-worker: runs the recurrence scheduler against PostgreSQL.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stratum_db::{log_pool_metrics, Database, FilesystemObjectStore, PgRecurrenceStore, PoolConfig};
use stratum_jobs::{RecurrenceScheduler, SchedulerWorker, WorkerConfig, WorkerEvent};

const DEFAULT_DATABASE_URL: &str = "postgres://localhost/stratum";
const DEFAULT_OBJECT_STORAGE_PATH: &str = "/var/lib/stratum/objects";
const DEFAULT_LOG_FILE_NAME: &str = "stratum-worker.log";

/// Split a log file path into the directory and file name the rolling appender wants.
fn log_file_parts(path: &str) -> (&Path, &str) {
    let path = Path::new(path);
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let file_name = path
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or(DEFAULT_LOG_FILE_NAME);
    (dir, file_name)
}

/// Install the global subscriber. The returned guard must live as long as the process.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
    //   RUST_LOG    - standard env filter
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "stratum_worker=info,stratum_jobs=info,stratum_db=info,sqlx=warn".into()
    });

    let registry = tracing_subscriber::registry().with(env_filter);

    let guard = if let Some(ref path) = log_file {
        let (file_dir, file_name) = log_file_parts(path);
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );
    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _file_guard = init_tracing();

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());
    let object_storage_path = std::env::var("OBJECT_STORAGE_PATH")
        .unwrap_or_else(|_| DEFAULT_OBJECT_STORAGE_PATH.to_string());
    let worker_config = WorkerConfig::from_env();

    info!("Connecting to database...");
    let db = Database::connect_with_config(&database_url, PoolConfig::from_env()).await?;
    log_pool_metrics(db.pool());
    info!("Database connected");

    info!("Running database migrations...");
    db.migrate().await?;
    info!("Database migrations complete");

    let objects = FilesystemObjectStore::new(&object_storage_path);
    if let Err(e) = objects.validate().await {
        warn!(
            path = %object_storage_path,
            error = %e,
            "Object storage is not writable, media steps will fail"
        );
    }
    let db = db.with_object_store(Arc::new(objects));
    info!("Object storage initialized at {}", object_storage_path);

    if !worker_config.enabled {
        info!("Recurrence scheduler disabled (RECURRENCE_ENABLED=false)");
        tokio::signal::ctrl_c().await?;
        return Ok(());
    }

    info!(
        interval_secs = worker_config.interval.as_secs(),
        backoff_base_secs = worker_config.backoff_base.as_secs(),
        backoff_max_secs = worker_config.backoff_max.as_secs(),
        alert_after = worker_config.alert_after,
        "Starting recurrence scheduler..."
    );
    let store = Arc::new(PgRecurrenceStore::new(db.pool().clone()));
    let handle = SchedulerWorker::new(worker_config)
        .with_job(RecurrenceScheduler::new(store))
        .start();

    let mut events = handle.events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(WorkerEvent::WorkerStopped) => break,
                Ok(event) => debug!(?event, "Worker event"),
                Err(RecvError::Lagged(n)) => debug!(skipped = n, "Worker event listener lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping scheduler...");
    handle.shutdown().await?;
    log_pool_metrics(db.pool());
    db.pool().close().await;
    info!("Shutdown complete");

    Ok(())
}
