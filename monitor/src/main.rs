use axum::{routing::get, Router};
use monitor::config::Config;
use monitor::db::{self, PgReadingStore};
use monitor::job::{self, ReadingProcessorJob};
use monitor::metrics;
use monitor::processor::Processor;
use monitor::rest::{self, AppState};
use monitor::store::ReadingStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // Initialize logging
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx::query=warn"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    info!("Starting SmartAC alert monitor");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    config.log_config();

    if let Err(e) = metrics::init_metrics() {
        error!("Failed to register metrics: {}", e);
        std::process::exit(1);
    }

    let pool = match db::make_pool(&config.database_url, config.db_pool_max).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };

    let store: Arc<dyn ReadingStore> = Arc::new(PgReadingStore::new(pool));
    let processor = Processor::new(config.thresholds);
    let job = Arc::new(ReadingProcessorJob::new(
        store.clone(),
        processor,
        config.job.batch_size,
    ));
    let shutdown = CancellationToken::new();

    let mut scheduler_handle = tokio::spawn(job::run_scheduler(
        job.clone(),
        config.job.interval_ms,
        shutdown.clone(),
    ));

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .merge(rest::create_router(AppState {
            store,
            job,
            shutdown: shutdown.clone(),
        }));

    let listener = match tokio::net::TcpListener::bind(&config.http_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", config.http_addr, e);
            std::process::exit(1);
        }
    };

    info!("HTTP server listening on {}", config.http_addr);

    let server_shutdown = shutdown.clone();
    let mut server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await
            .unwrap_or_else(|e| {
                error!("HTTP server error: {}", e);
            });
    });

    tokio::select! {
        _ = &mut scheduler_handle => {
            error!("Scheduler task terminated");
        }
        _ = &mut server_handle => {
            error!("HTTP server terminated");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    // let an in-flight invocation observe the token before exiting
    shutdown.cancel();
    for handle in [scheduler_handle, server_handle] {
        if !handle.is_finished() {
            if let Err(e) = handle.await {
                error!("Task failed during shutdown: {}", e);
            }
        }
    }

    info!("Shutting down");
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}
