use std::str::FromStr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use betsentry::config::{Config, CHANNEL_CAPACITY, METRICS_WINDOW_NS};
use betsentry::db::RiskRepo;
use betsentry::engine::{ContextAssembler, EngineCounters, IngestionEngine, LatencyStats, Worker};
use betsentry::error::Result;
use betsentry::feed::FeedManager;
use betsentry::health::HealthState;
use betsentry::state::MetricsStore;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", cfg.db_path))?
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database ready at {}", cfg.db_path);
    let repo = RiskRepo::new(pool);

    // --- Rehydrate the rolling window from the durable event log ---
    let cutoff = now_ns() - METRICS_WINDOW_NS;
    let recent = repo.load_recent_events(cutoff).await?;
    let store = MetricsStore::new();
    store.hydrate(&recent);
    info!(
        events = recent.len(),
        wallets = store.wallet_count(),
        "Rehydrated {} events into {} wallet histories",
        recent.len(),
        store.wallet_count(),
    );

    // --- Resume position ---
    let start_sequence = repo.load_checkpoint().await?.unwrap_or(0);
    info!(sequence = start_sequence, "Feed cursor restored");

    // --- Shared observability state ---
    let health = Arc::new(HealthState::new());
    let counters = Arc::new(EngineCounters::default());
    let latency = Arc::new(LatencyStats::new());

    // --- Channels ---
    let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (ctx_tx, ctx_rx) = mpsc::channel(CHANNEL_CAPACITY);

    // --- Spawn tasks ---

    // Worker pool, sharded by wallet hash.
    let mut worker_txs = Vec::with_capacity(cfg.engine_workers);
    for id in 0..cfg.engine_workers {
        let (job_tx, job_rx) = mpsc::channel(CHANNEL_CAPACITY);
        worker_txs.push(job_tx);
        let worker = Worker::new(
            id,
            Arc::clone(&store),
            Arc::clone(&repo),
            ctx_tx.clone(),
            Arc::clone(&counters),
        );
        tokio::spawn(worker.run(job_rx));
    }
    info!(workers = cfg.engine_workers, "Worker pool started");

    // Context assembler: joins per-wallet scores into per-bet contexts.
    let assembler = ContextAssembler::new(Arc::clone(&repo), ctx_rx, Arc::clone(&counters));
    tokio::spawn(assembler.run());

    // Ingestion engine (consumer loop).
    let engine = IngestionEngine::new(
        Arc::clone(&store),
        Arc::clone(&repo),
        event_rx,
        worker_txs,
        ctx_tx,
        Arc::clone(&counters),
        Arc::clone(&latency),
        Arc::clone(&health),
    );
    tokio::spawn(engine.run());

    // Feed manager: backfill + live WebSocket, reconnecting forever.
    let feed = FeedManager::new(cfg, event_tx, Arc::clone(&health), start_sequence);
    tokio::spawn(feed.run());

    // --- Shutdown ---
    // In-flight wallet updates are single atomic upserts, so there is
    // nothing to unwind: wait for ctrl-c and let the runtime tear down.
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    Ok(())
}

fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}
