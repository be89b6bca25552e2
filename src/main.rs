// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - ShieldEye Server
 * Wires configuration, storage, queues, workers and the HTTP surface
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use anyhow::{Context, Result};
use clap::Parser;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use shieldeye::analyze::AnalyzeWorker;
use shieldeye::api::{build_router, AppState, RateLimiter};
use shieldeye::cache::{InflightDedup, ResponseCache};
use shieldeye::config::Config;
use shieldeye::database::Database;
use shieldeye::health::HealthChecker;
use shieldeye::insight::InsightProvider;
use shieldeye::metrics::MetricsCollector;
use shieldeye::policy::TargetPolicy;
use shieldeye::queue::{JobQueue, ANALYSIS_QUEUE, SCAN_QUEUE};
use shieldeye::render::RenderWorker;
use shieldeye::storage::ArtifactStore;
use shieldeye::vuln_feed::VulnerabilityFeed;

/// Grace period for active jobs on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "shieldeye", version, about = "ShieldEye web application surface scanner")]
struct Cli {
    /// Listen port (overrides PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Skip schema creation at startup
    #[arg(long)]
    no_migrate: bool,

    /// Serve the API without in-process workers
    #[arg(long)]
    api_only: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("shieldeye=info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    info!(version = env!("CARGO_PKG_VERSION"), "Starting ShieldEye");

    // Storage layers.
    let db = Arc::new(
        Database::new(&config.database)
            .await
            .context("Database initialization failed")?,
    );
    if !cli.no_migrate {
        db.init_schema().await.context("Schema creation failed")?;
    }

    let storage = ArtifactStore::new(&config.storage).context("Object store setup failed")?;
    if let Err(e) = storage.ensure_bucket().await {
        warn!(error = %e, "Bucket check failed; continuing, uploads may fail");
    }

    // Queues share one Redis pool per process.
    let scan_queue = JobQueue::connect(&config.redis.url, SCAN_QUEUE, config.queue.clone())
        .await
        .context("Queue backend connection failed")?;
    let analysis_queue =
        JobQueue::with_pool(scan_queue.pool(), ANALYSIS_QUEUE, config.queue.clone());

    scan_queue.spawn_maintenance();
    analysis_queue.spawn_maintenance();

    let policy = TargetPolicy::new();
    let feed = VulnerabilityFeed::new(config.feed.clone(), Arc::clone(&db));
    let metrics = Arc::new(MetricsCollector::new());
    let insight = InsightProvider::from_config(&config.limits);

    let health = Arc::new(HealthChecker::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&db),
        scan_queue.clone(),
        analysis_queue.clone(),
        storage.clone(),
    ));
    Arc::clone(&health).spawn_periodic(Duration::from_secs(30));

    // Workers.
    let shutdown = Arc::new(AtomicBool::new(false));
    let mut worker_handles = Vec::new();

    if !cli.api_only {
        for _ in 0..config.queue.render_concurrency.max(1) {
            let worker = Arc::new(RenderWorker::new(
                Arc::clone(&db),
                storage.clone(),
                scan_queue.clone(),
                analysis_queue.clone(),
                policy.clone(),
                config.limits.clone(),
                config.queue.clone(),
                Arc::clone(&shutdown),
            )?);
            worker_handles.push(tokio::spawn(worker.run()));
        }

        let processing = Arc::new(Mutex::new(HashSet::new()));
        for _ in 0..config.queue.analyze_concurrency.max(1) {
            let worker = Arc::new(AnalyzeWorker::new(
                Arc::clone(&db),
                storage.clone(),
                analysis_queue.clone(),
                feed.clone(),
                config.queue.clone(),
                Arc::clone(&processing),
                Arc::clone(&shutdown),
            ));
            worker_handles.push(tokio::spawn(worker.run()));
        }

        info!(
            render = config.queue.render_concurrency,
            analyze = config.queue.analyze_concurrency,
            "Workers started"
        );
    }

    // HTTP surface.
    let state = Arc::new(AppState {
        db,
        scan_queue,
        analysis_queue,
        storage,
        policy,
        metrics,
        health,
        response_cache: ResponseCache::new(Duration::from_secs(30)),
        dedup: Arc::new(InflightDedup::new()),
        rate_limiter: RateLimiter::new(
            Duration::from_millis(config.server.rate_limit_window_ms),
            config.server.rate_limit_max,
        ),
        insight,
        config,
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.server.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(%addr, "API listening");

    let app = build_router(Arc::clone(&state));
    let shutdown_flag = Arc::clone(&shutdown);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        wait_for_signal().await;
        info!("Shutdown signal received, draining");
        shutdown_flag.store(true, Ordering::Relaxed);
    })
    .await
    .context("Server error")?;

    // Give active jobs up to the grace period, then go.
    let drain = async {
        for handle in worker_handles {
            let _ = handle.await;
        }
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        warn!("Shutdown grace period elapsed, terminating active tasks");
    }

    info!("ShieldEye stopped");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
