//! TickStock core service.
//!
//! Wires the full pipeline: feed router -> priority queue -> worker pool
//! -> display channel -> websocket fan-out, with the priority-cache
//! refresher and the scaling supervisor alongside.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam::channel::bounded;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tickstock_backend::cache::priority_cache::spawn_refresher;
use tickstock_backend::cache::PriorityCache;
use tickstock_backend::detectors::{PressureConfig, PressureTracker, TickDetector};
use tickstock_backend::fanout::{self, run_display_pump, AppState};
use tickstock_backend::feed::{FeedRouter, TickPayload};
use tickstock_backend::market::StateRegistry;
use tickstock_backend::models::Config;
use tickstock_backend::queue::EventQueue;
use tickstock_backend::universe::{SqliteCatalog, UniverseCatalog};
use tickstock_backend::workers::{Supervisor, SupervisorConfig, WorkerPool};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    info!(
        max_queue_size = config.max_queue_size,
        workers = config.worker_pool_size,
        "starting tickstock core"
    );

    // Catalog and the priority-class cache it feeds.
    let catalog: Arc<dyn UniverseCatalog> =
        Arc::new(SqliteCatalog::open(Path::new(&config.database_path))?);
    let cache = Arc::new(PriorityCache::new());
    if let Err(e) = cache.refresh_from_catalog(catalog.as_ref()) {
        warn!("initial priority cache load failed: {e:#}");
    }
    let _cache_refresher = spawn_refresher(
        cache.clone(),
        catalog.clone(),
        Duration::from_secs(config.priority_cache_refresh_seconds),
    );

    // Queue, per-symbol state, and the worker pool draining them.
    let queue = Arc::new(EventQueue::new(config.queue_config(), cache.clone()));
    let states = Arc::new(StateRegistry::new(config.max_worker_pool_size));
    let pressure = Arc::new(PressureTracker::new(PressureConfig::default(), HashSet::new()));
    let (display_tx, display_rx) = bounded(config.display_channel_capacity);

    let pool = Arc::new(WorkerPool::new(
        config.worker_config(),
        queue.clone(),
        states.clone(),
        TickDetector::new(config.detector_config()),
        pressure.clone(),
        display_tx,
    ));
    pool.start(None);

    let supervisor_shutdown = Arc::new(AtomicBool::new(false));
    let _supervisor = Supervisor::new(pool.clone(), queue.clone(), SupervisorConfig::default())
        .spawn(supervisor_shutdown.clone());

    // Display channel -> broadcast -> websocket subscribers.
    let (broadcast_tx, _) = broadcast::channel(4096);
    let _display_pump = run_display_pump(display_rx, broadcast_tx.clone());

    let feed = Arc::new(FeedRouter::new(queue.clone(), states.clone()));
    if config.synthetic_feed {
        info!(tickers = ?config.synthetic_tickers, "synthetic feed enabled");
        tokio::spawn(synthetic_feed(feed.clone(), config.synthetic_tickers.clone()));
    }

    let app = fanout::router(AppState {
        queue: queue.clone(),
        pool: pool.clone(),
        pressure: pressure.clone(),
        display_broadcast: broadcast_tx,
    });
    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("bind port {}", config.port))?;
    info!(port = config.port, "http/websocket fan-out listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutdown signal received, draining");
    supervisor_shutdown.store(true, Ordering::Release);
    pool.stop();
    info!(
        parse_failures = feed.parse_failures(),
        "tickstock core stopped"
    );
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Random-walk tick generator for demo and soak runs.
async fn synthetic_feed(feed: Arc<FeedRouter>, tickers: Vec<String>) {
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    let mut rng = SmallRng::from_entropy();
    let mut prices: Vec<f64> = tickers
        .iter()
        .map(|_| rng.gen_range(20.0..400.0))
        .collect();
    let mut interval = tokio::time::interval(Duration::from_millis(50));

    loop {
        interval.tick().await;
        let i = rng.gen_range(0..tickers.len());
        let drift: f64 = rng.gen_range(-0.20..0.22);
        prices[i] = (prices[i] * (1.0 + drift / 100.0)).max(0.5);
        feed.on_tick(TickPayload {
            ticker: tickers[i].clone(),
            price: prices[i],
            volume: rng.gen_range(50.0..5000.0),
            timestamp: None,
            bid: None,
            ask: None,
        });
    }
}
