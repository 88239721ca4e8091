use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::{DIAG_INTERVAL_SECS, UNASSIGNED_PARTICIPANT};
use crate::db::RiskRepo;
use crate::engine::context::ContextMsg;
use crate::engine::latency::LatencyStats;
use crate::error::{AppError, Result};
use crate::feed::messages::{BetFrame, FeedFrame, OutcomeFrame};
use crate::health::HealthState;
use crate::scorer;
use crate::state::MetricsStore;
use crate::types::{
    BetEvent, ContextExpectation, FeedEvent, OutcomeStatus, OutcomeUpdate, ScoredWallet,
    SourceRef, WalletJob, WalletRole,
};

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

/// Operational counters for the whole pipeline. Logged by the engine's
/// periodic diagnostic line; nothing here is surfaced to end users.
#[derive(Default)]
pub struct EngineCounters {
    pub events_received: AtomicU64,
    pub bets_ingested: AtomicU64,
    pub outcomes_ingested: AtomicU64,
    pub invalid_events: AtomicU64,
    pub duplicate_events: AtomicU64,
    pub unknown_outcomes: AtomicU64,
    pub persist_failures: AtomicU64,
}

impl EngineCounters {
    pub fn inc_persist_failures(&self) {
        self.persist_failures.fetch_add(1, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn invalid(bet_id: &str, reason: &str) -> AppError {
    AppError::InvalidEvent {
        bet_id: bet_id.to_string(),
        reason: reason.to_string(),
    }
}

/// Step 1 of the per-event state machine: a usable bet needs an id, a feed
/// position, a creator, a positive finite amount, and a timestamp. The
/// "unassigned" sentinel resolves to no participant.
pub fn validate_bet(frame: BetFrame) -> Result<BetEvent> {
    let bet_id = frame
        .bet_id
        .filter(|s| !s.is_empty())
        .ok_or_else(|| invalid("<none>", "missing bet_id"))?;
    let sequence = frame
        .sequence
        .ok_or_else(|| invalid(&bet_id, "missing sequence"))?;
    let creator = frame
        .creator
        .filter(|s| !s.is_empty())
        .ok_or_else(|| invalid(&bet_id, "missing creator"))?;
    let amount = frame
        .amount
        .ok_or_else(|| invalid(&bet_id, "missing amount"))?;
    if !amount.is_finite() || amount <= 0.0 {
        return Err(invalid(&bet_id, "amount must be a positive number"));
    }
    let created_at_secs = frame
        .created_at_secs
        .ok_or_else(|| invalid(&bet_id, "missing timestamp"))?;
    let created_at_ns = created_at_secs
        .checked_mul(1_000_000_000)
        .ok_or_else(|| invalid(&bet_id, "timestamp out of range"))?;

    let participant = frame
        .participant
        .filter(|p| !p.is_empty() && p != UNASSIGNED_PARTICIPANT);
    let outcome = frame.outcome_status.as_deref().and_then(OutcomeStatus::parse);

    Ok(BetEvent {
        bet_id,
        creator,
        participant,
        amount,
        created_at_ns,
        outcome,
        source_ref: SourceRef {
            sequence,
            block_number: frame.block_number.unwrap_or(0),
            tx_hash: frame.tx_hash.unwrap_or_default(),
        },
    })
}

pub fn validate_outcome(frame: OutcomeFrame) -> Result<OutcomeUpdate> {
    let bet_id = frame
        .bet_id
        .filter(|s| !s.is_empty())
        .ok_or_else(|| invalid("<none>", "missing bet_id"))?;
    let sequence = frame
        .sequence
        .ok_or_else(|| invalid(&bet_id, "missing sequence"))?;
    let status = frame
        .status
        .as_deref()
        .and_then(OutcomeStatus::parse)
        .ok_or_else(|| invalid(&bet_id, "missing or unknown status"))?;

    Ok(OutcomeUpdate {
        bet_id,
        status,
        source_ref: SourceRef {
            sequence,
            block_number: frame.block_number.unwrap_or(0),
            tx_hash: frame.tx_hash.unwrap_or_default(),
        },
    })
}

/// Stable shard assignment: a given wallet always lands on the same worker,
/// so its updates apply in arrival order while unrelated wallets fan out.
pub fn shard_for(wallet: &str, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    wallet.hash(&mut hasher);
    (hasher.finish() % workers as u64) as usize
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// One shard of the ingestion pool: applies metrics, scores, persists the
/// wallet's risk record, and forwards the scored result to the assembler.
pub struct Worker {
    id: usize,
    store: Arc<MetricsStore>,
    repo: Arc<RiskRepo>,
    ctx_tx: mpsc::Sender<ContextMsg>,
    counters: Arc<EngineCounters>,
}

impl Worker {
    pub fn new(
        id: usize,
        store: Arc<MetricsStore>,
        repo: Arc<RiskRepo>,
        ctx_tx: mpsc::Sender<ContextMsg>,
        counters: Arc<EngineCounters>,
    ) -> Self {
        Self {
            id,
            store,
            repo,
            ctx_tx,
            counters,
        }
    }

    pub async fn run(self, mut job_rx: mpsc::Receiver<WalletJob>) {
        while let Some(job) = job_rx.recv().await {
            let wallet = job.wallet.clone();
            if let Err(e) = self.process(job).await {
                error!(worker = self.id, wallet = %wallet, "wallet job failed: {e}");
            }
        }
    }

    async fn process(&self, job: WalletJob) -> Result<()> {
        let now = now_ns();
        let (bet_id, metrics) = match &job.event {
            FeedEvent::Bet(event) => {
                let outcome = self.store.apply(&job.wallet, event, now);
                if !outcome.counted && job.role == WalletRole::Creator {
                    self.counters.duplicate_events.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        bet_id = %event.bet_id,
                        "duplicate redelivery — metrics unchanged, risk record refreshed"
                    );
                }
                (event.bet_id.clone(), outcome.metrics)
            }
            FeedEvent::Outcome(update) => {
                let metrics =
                    self.store
                        .apply_outcome(&job.wallet, &update.bet_id, update.status, now);
                (update.bet_id.clone(), metrics)
            }
        };

        let record = scorer::evaluate(&metrics, now);
        if let Err(e) = self.repo.upsert_wallet_risk(&record).await {
            self.counters.inc_persist_failures();
            error!(wallet = %job.wallet, "risk record persist failed: {e}");
        }

        // The assembler must hear about the score even when the persist
        // failed — a stuck pending context would otherwise never resolve.
        self.ctx_tx
            .send(ContextMsg::Scored(ScoredWallet {
                bet_id,
                role: job.role,
                record,
            }))
            .await
            .map_err(|e| AppError::ChannelSend(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// IngestionEngine
// ---------------------------------------------------------------------------

/// The consumer loop: pulls frames off the feed channel, validates them,
/// dispatches per-wallet jobs to the shard pool, and records the checkpoint.
/// Any failure while handling a single event is logged and the loop advances
/// — one bad event never halts the pipeline.
pub struct IngestionEngine {
    store: Arc<MetricsStore>,
    repo: Arc<RiskRepo>,
    event_rx: mpsc::Receiver<FeedFrame>,
    worker_txs: Vec<mpsc::Sender<WalletJob>>,
    ctx_tx: mpsc::Sender<ContextMsg>,
    counters: Arc<EngineCounters>,
    latency: Arc<LatencyStats>,
    health: Arc<HealthState>,
    last_diag_at: Instant,
}

impl IngestionEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<MetricsStore>,
        repo: Arc<RiskRepo>,
        event_rx: mpsc::Receiver<FeedFrame>,
        worker_txs: Vec<mpsc::Sender<WalletJob>>,
        ctx_tx: mpsc::Sender<ContextMsg>,
        counters: Arc<EngineCounters>,
        latency: Arc<LatencyStats>,
        health: Arc<HealthState>,
    ) -> Self {
        Self {
            store,
            repo,
            event_rx,
            worker_txs,
            ctx_tx,
            counters,
            latency,
            health,
            last_diag_at: Instant::now(),
        }
    }

    pub async fn run(mut self) {
        while let Some(frame) = self.event_rx.recv().await {
            self.counters.events_received.fetch_add(1, Ordering::Relaxed);
            let started = Instant::now();

            if let Err(e) = self.process_frame(frame).await {
                error!("event processing failed, advancing: {e}");
            }

            self.latency.record(started.elapsed());
            self.maybe_log_diag();
        }
        info!("Feed channel closed — engine draining complete");
    }

    async fn process_frame(&mut self, frame: FeedFrame) -> Result<()> {
        match frame {
            FeedFrame::BetCreated(raw) => {
                let event = match validate_bet(raw) {
                    Ok(e) => e,
                    Err(e) => {
                        self.counters.invalid_events.fetch_add(1, Ordering::Relaxed);
                        warn!("invalid event dropped: {e}");
                        return Ok(());
                    }
                };
                self.ingest_bet(event).await
            }
            FeedFrame::BetResolved(raw) => {
                let update = match validate_outcome(raw) {
                    Ok(u) => u,
                    Err(e) => {
                        self.counters.invalid_events.fetch_add(1, Ordering::Relaxed);
                        warn!("invalid outcome dropped: {e}");
                        return Ok(());
                    }
                };
                self.ingest_outcome(update).await
            }
        }
    }

    async fn ingest_bet(&mut self, event: BetEvent) -> Result<()> {
        let sequence = event.source_ref.sequence;

        // Durable event log first: if the process dies mid-flight, startup
        // rehydration rebuilds the window from this row. Idempotent insert.
        if let Err(e) = self.repo.insert_bet_event(&event, now_ns()).await {
            self.counters.inc_persist_failures();
            error!(bet_id = %event.bet_id, "event log insert failed: {e}");
        }

        // Parties must be routable before the wallet jobs land — a resolution
        // can arrive on the very next frame.
        self.store.register_bet(&event);

        let participant = event.participant.clone();
        let expected = 1 + usize::from(participant.is_some());
        self.ctx_tx
            .send(ContextMsg::Expect(ContextExpectation {
                bet_id: event.bet_id.clone(),
                creator: event.creator.clone(),
                participant: participant.clone(),
                expected,
            }))
            .await
            .map_err(|e| AppError::ChannelSend(e.to_string()))?;

        self.dispatch(event.creator.clone(), WalletRole::Creator, FeedEvent::Bet(event.clone()))
            .await?;
        if let Some(p) = participant {
            self.dispatch(p, WalletRole::Participant, FeedEvent::Bet(event)).await?;
        }

        self.counters.bets_ingested.fetch_add(1, Ordering::Relaxed);
        self.checkpoint(sequence).await;
        Ok(())
    }

    async fn ingest_outcome(&mut self, update: OutcomeUpdate) -> Result<()> {
        let sequence = update.source_ref.sequence;

        let Some((creator, participant)) = self.store.bet_parties(&update.bet_id) else {
            self.counters.unknown_outcomes.fetch_add(1, Ordering::Relaxed);
            warn!(bet_id = %update.bet_id, "outcome for unknown bet dropped");
            self.checkpoint(sequence).await;
            return Ok(());
        };

        if let Err(e) = self.repo.update_bet_outcome(&update.bet_id, update.status).await {
            self.counters.inc_persist_failures();
            error!(bet_id = %update.bet_id, "event log outcome update failed: {e}");
        }

        let expected = 1 + usize::from(participant.is_some());
        self.ctx_tx
            .send(ContextMsg::Expect(ContextExpectation {
                bet_id: update.bet_id.clone(),
                creator: creator.clone(),
                participant: participant.clone(),
                expected,
            }))
            .await
            .map_err(|e| AppError::ChannelSend(e.to_string()))?;

        self.dispatch(creator, WalletRole::Creator, FeedEvent::Outcome(update.clone()))
            .await?;
        if let Some(p) = participant {
            self.dispatch(p, WalletRole::Participant, FeedEvent::Outcome(update)).await?;
        }

        self.counters.outcomes_ingested.fetch_add(1, Ordering::Relaxed);
        self.checkpoint(sequence).await;
        Ok(())
    }

    async fn dispatch(&self, wallet: String, role: WalletRole, event: FeedEvent) -> Result<()> {
        let shard = shard_for(&wallet, self.worker_txs.len());
        self.worker_txs[shard]
            .send(WalletJob { wallet, role, event })
            .await
            .map_err(|e| AppError::ChannelSend(e.to_string()))
    }

    async fn checkpoint(&self, sequence: u64) {
        if let Err(e) = self.repo.save_checkpoint(sequence, now_ns()).await {
            self.counters.inc_persist_failures();
            warn!(sequence, "checkpoint save failed: {e}");
        }
    }

    fn maybe_log_diag(&mut self) {
        if self.last_diag_at.elapsed() < Duration::from_secs(DIAG_INTERVAL_SECS) {
            return;
        }
        self.last_diag_at = Instant::now();

        let received = self.counters.events_received.load(Ordering::Relaxed);
        let bets = self.counters.bets_ingested.load(Ordering::Relaxed);
        let outcomes = self.counters.outcomes_ingested.load(Ordering::Relaxed);
        let invalid = self.counters.invalid_events.load(Ordering::Relaxed);
        let duplicates = self.counters.duplicate_events.load(Ordering::Relaxed);
        let failures = self.counters.persist_failures.load(Ordering::Relaxed);
        let (p50, p95, p99) = self.latency.percentiles().unwrap_or((0, 0, 0));

        info!(
            received,
            bets,
            outcomes,
            invalid,
            duplicates,
            persist_failures = failures,
            wallets = self.store.wallet_count(),
            feed_connected = self.health.feed_connected(),
            reconnects = self.health.reconnects(),
            p50_us = p50,
            p95_us = p95,
            p99_us = p99,
            "[ENGINE] 30s diag | recv={received} bets={bets} outcomes={outcomes} \
             invalid={invalid} dup={duplicates} persist_fail={failures}"
        );
    }
}

fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
