use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use sqlx::SqlitePool;
use tracing::warn;

use crate::config::{DB_OP_TIMEOUT_MS, DB_WRITE_RETRIES};
use crate::db::models::BetEventRow;
use crate::error::{AppError, Result};
use crate::types::{BetEvent, BetRiskContext, OutcomeStatus, RiskRecord};

/// Durable store for everything the pipeline produces: the bet event log,
/// per-wallet metrics and risk records, per-bet contexts, and the feed
/// checkpoint. Writes carry a bounded timeout and limited retries — a store
/// hiccup is logged by the caller and never blocks unrelated events.
pub struct RiskRepo {
    pool: SqlitePool,
}

impl RiskRepo {
    pub fn new(pool: SqlitePool) -> Arc<Self> {
        Arc::new(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // -- writes ------------------------------------------------------------

    /// Append a bet event. Idempotent: redelivered bet_ids are ignored.
    pub async fn insert_bet_event(&self, event: &BetEvent, ingested_at_ns: i64) -> Result<()> {
        retrying("bet event insert", || {
            Box::pin(write_bet_event(&self.pool, event, ingested_at_ns))
        })
        .await
    }

    /// Record a resolution on the event log.
    pub async fn update_bet_outcome(&self, bet_id: &str, status: OutcomeStatus) -> Result<()> {
        retrying("bet outcome update", || {
            Box::pin(write_bet_outcome(&self.pool, bet_id, status))
        })
        .await
    }

    /// Overwrite a wallet's metrics and risk record with its latest evaluation.
    pub async fn upsert_wallet_risk(&self, record: &RiskRecord) -> Result<()> {
        retrying("wallet risk upsert", || {
            Box::pin(write_wallet_risk(&self.pool, record))
        })
        .await
    }

    pub async fn upsert_bet_context(&self, ctx: &BetRiskContext) -> Result<()> {
        retrying("bet context upsert", || {
            Box::pin(write_bet_context(&self.pool, ctx))
        })
        .await
    }

    /// Advance the feed checkpoint. Never moves backward.
    pub async fn save_checkpoint(&self, sequence: u64, saved_at_ns: i64) -> Result<()> {
        retrying("checkpoint save", || {
            Box::pin(write_checkpoint(&self.pool, sequence, saved_at_ns))
        })
        .await
    }

    // -- reads -------------------------------------------------------------

    pub async fn load_checkpoint(&self) -> Result<Option<u64>> {
        let seq: Option<i64> =
            sqlx::query_scalar("SELECT sequence FROM feed_checkpoint WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;
        Ok(seq.map(|s| s.max(0) as u64))
    }

    /// Events young enough to matter for the rolling window, oldest first.
    pub async fn load_recent_events(&self, cutoff_ns: i64) -> Result<Vec<BetEvent>> {
        let rows: Vec<BetEventRow> = sqlx::query_as(
            "SELECT bet_id, creator, participant, amount, created_at, outcome, \
             sequence, block_number, tx_hash, ingested_at \
             FROM bet_events WHERE created_at >= ? ORDER BY sequence ASC",
        )
        .bind(cutoff_ns)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(BetEvent::from).collect())
    }
}

/// Bounded-retry wrapper for writes: each attempt is timed out, failures are
/// logged per attempt, and the last error is returned once attempts run out.
async fn retrying<'a, F>(what: &str, mut op: F) -> Result<()>
where
    F: FnMut() -> BoxFuture<'a, sqlx::Result<()>>,
{
    let mut last: Option<AppError> = None;
    for attempt in 1..=DB_WRITE_RETRIES {
        match tokio::time::timeout(Duration::from_millis(DB_OP_TIMEOUT_MS), op()).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => {
                warn!(attempt, "{what} failed: {e}");
                last = Some(AppError::Database(e));
            }
            Err(_) => {
                warn!(attempt, "{what} timed out after {DB_OP_TIMEOUT_MS}ms");
                last = Some(AppError::DatabaseTimeout(DB_OP_TIMEOUT_MS));
            }
        }
    }
    Err(last.unwrap_or(AppError::DatabaseTimeout(DB_OP_TIMEOUT_MS)))
}

async fn write_bet_event(
    pool: &SqlitePool,
    event: &BetEvent,
    ingested_at_ns: i64,
) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT OR IGNORE INTO bet_events \
         (bet_id, creator, participant, amount, created_at, outcome, \
          sequence, block_number, tx_hash, ingested_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&event.bet_id)
    .bind(&event.creator)
    .bind(event.participant.as_deref())
    .bind(event.amount)
    .bind(event.created_at_ns)
    .bind(event.outcome.map(|o| o.to_string()))
    .bind(event.source_ref.sequence as i64)
    .bind(event.source_ref.block_number as i64)
    .bind(&event.source_ref.tx_hash)
    .bind(ingested_at_ns)
    .execute(pool)
    .await
    .map(|_| ())
}

async fn write_bet_outcome(
    pool: &SqlitePool,
    bet_id: &str,
    status: OutcomeStatus,
) -> sqlx::Result<()> {
    sqlx::query("UPDATE bet_events SET outcome = ? WHERE bet_id = ?")
        .bind(status.to_string())
        .bind(bet_id)
        .execute(pool)
        .await
        .map(|_| ())
}

async fn write_wallet_risk(pool: &SqlitePool, record: &RiskRecord) -> sqlx::Result<()> {
    let m = &record.metrics;
    sqlx::query(
        "INSERT INTO wallet_metrics \
         (wallet, bet_frequency, total_volume_24h, avg_bet_size, loss_streak, last_updated) \
         VALUES (?, ?, ?, ?, ?, ?) \
         ON CONFLICT(wallet) DO UPDATE SET \
           bet_frequency = excluded.bet_frequency, \
           total_volume_24h = excluded.total_volume_24h, \
           avg_bet_size = excluded.avg_bet_size, \
           loss_streak = excluded.loss_streak, \
           last_updated = excluded.last_updated",
    )
    .bind(&m.wallet)
    .bind(i64::from(m.bet_frequency))
    .bind(m.total_volume_24h)
    .bind(m.avg_bet_size)
    .bind(i64::from(m.loss_streak))
    .bind(m.last_updated_ns)
    .execute(pool)
    .await?;

    sqlx::query(
        "INSERT INTO risk_records \
         (wallet, risk_score, risk_level, message, bet_frequency, \
          total_volume_24h, avg_bet_size, loss_streak, evaluated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(wallet) DO UPDATE SET \
           risk_score = excluded.risk_score, \
           risk_level = excluded.risk_level, \
           message = excluded.message, \
           bet_frequency = excluded.bet_frequency, \
           total_volume_24h = excluded.total_volume_24h, \
           avg_bet_size = excluded.avg_bet_size, \
           loss_streak = excluded.loss_streak, \
           evaluated_at = excluded.evaluated_at",
    )
    .bind(&record.wallet)
    .bind(record.risk_score)
    .bind(record.risk_level.to_string())
    .bind(&record.message)
    .bind(i64::from(m.bet_frequency))
    .bind(m.total_volume_24h)
    .bind(m.avg_bet_size)
    .bind(i64::from(m.loss_streak))
    .bind(record.evaluated_at_ns)
    .execute(pool)
    .await
    .map(|_| ())
}

async fn write_bet_context(pool: &SqlitePool, ctx: &BetRiskContext) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO bet_risk_contexts \
         (bet_id, creator, creator_score, participant, participant_score, \
          combined_score, evaluated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(bet_id) DO UPDATE SET \
           creator = excluded.creator, \
           creator_score = excluded.creator_score, \
           participant = excluded.participant, \
           participant_score = excluded.participant_score, \
           combined_score = excluded.combined_score, \
           evaluated_at = excluded.evaluated_at",
    )
    .bind(&ctx.bet_id)
    .bind(&ctx.creator.wallet)
    .bind(ctx.creator.risk_score)
    .bind(ctx.participant.as_ref().map(|p| p.wallet.clone()))
    .bind(ctx.participant.as_ref().map(|p| p.risk_score))
    .bind(ctx.combined_score)
    .bind(ctx.evaluated_at_ns)
    .execute(pool)
    .await
    .map(|_| ())
}

async fn write_checkpoint(pool: &SqlitePool, sequence: u64, saved_at_ns: i64) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO feed_checkpoint (id, sequence, saved_at) VALUES (1, ?, ?) \
         ON CONFLICT(id) DO UPDATE SET \
           sequence = MAX(feed_checkpoint.sequence, excluded.sequence), \
           saved_at = excluded.saved_at",
    )
    .bind(sequence as i64)
    .bind(saved_at_ns)
    .execute(pool)
    .await
    .map(|_| ())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
