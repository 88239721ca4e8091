use crate::error::{AppError, Result};

pub const FEED_WS_URL: &str = "wss://feed.betledger.example/ws/bets";
pub const FEED_API_URL: &str = "https://api.betledger.example";

/// Fixed delay between feed reconnect attempts. The upstream is retried
/// indefinitely — persistent failure degrades health, it never kills the process.
pub const FEED_RECONNECT_DELAY_MS: u64 = 5_000;

/// Heartbeat ping interval (seconds).
pub const FEED_PING_INTERVAL_SECS: u64 = 30;

/// Channel capacity for internal message routing.
pub const CHANNEL_CAPACITY: usize = 1024;

/// Rolling window over which wallet metrics are computed.
pub const METRICS_WINDOW_NS: i64 = 24 * 3_600 * 1_000_000_000;

/// Bound on a single database write before it counts as a failed attempt.
pub const DB_OP_TIMEOUT_MS: u64 = 2_000;

/// Write attempts per record before the failure is logged and the engine moves on.
pub const DB_WRITE_RETRIES: u32 = 3;

/// Engine diagnostic log interval (seconds).
pub const DIAG_INTERVAL_SECS: u64 = 30;

/// REST backfill page size.
pub const BACKFILL_PAGE_SIZE: usize = 500;

/// Wire sentinel for a bet with no counterparty yet.
pub const UNASSIGNED_PARTICIPANT: &str = "unassigned";

/// Risk score weights: score = (freq*10 + avg_size*5 + loss_streak*15) / 3.
pub mod score_weights {
    pub const FREQUENCY: f64 = 10.0;
    pub const AVG_SIZE: f64 = 5.0;
    pub const LOSS_STREAK: f64 = 15.0;
    pub const DIVISOR: f64 = 3.0;
}

/// Risk level boundaries. Classification gates on MEDIUM and HIGH only;
/// LOW is carried in the threshold table but no boundary check reads it.
pub mod risk_thresholds {
    pub const LOW: f64 = 30.0;
    pub const MEDIUM: f64 = 60.0;
    pub const HIGH: f64 = 80.0;
}

#[derive(Debug, Clone)]
pub struct Config {
    pub feed_ws_url: String,
    pub feed_api_url: String,
    pub log_level: String,
    pub db_path: String,
    /// Worker tasks in the ingestion pool (ENGINE_WORKERS).
    pub engine_workers: usize,
    /// Skip the startup REST backfill (FEED_BACKFILL=0). Live WS only.
    pub backfill_enabled: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let engine_workers = std::env::var("ENGINE_WORKERS")
            .unwrap_or_else(|_| "4".to_string())
            .parse::<usize>()
            .map_err(|_| AppError::Config("ENGINE_WORKERS must be a number".to_string()))?;
        if engine_workers == 0 {
            return Err(AppError::Config("ENGINE_WORKERS must be at least 1".to_string()));
        }

        Ok(Self {
            feed_ws_url: std::env::var("FEED_WS_URL").unwrap_or_else(|_| FEED_WS_URL.to_string()),
            feed_api_url: std::env::var("FEED_API_URL")
                .unwrap_or_else(|_| FEED_API_URL.to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "betsentry.db".to_string()),
            engine_workers,
            backfill_enabled: std::env::var("FEED_BACKFILL")
                .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
                .unwrap_or(true),
        })
    }
}
