use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;

use crate::config::METRICS_WINDOW_NS;
use crate::types::{BetEvent, OutcomeStatus, WalletMetrics};

// ---------------------------------------------------------------------------
// Wallet history
// ---------------------------------------------------------------------------

/// One counted event in a wallet's history, in arrival order.
#[derive(Debug, Clone)]
struct HistoryEntry {
    bet_id: String,
    amount: f64,
    created_at_ns: i64,
    outcome: Option<OutcomeStatus>,
}

/// Per-wallet event history plus the set of bet_ids ever counted.
/// `counted_ids` outlives pruning so a redelivery of an aged-out event
/// still cannot re-count.
#[derive(Debug, Default)]
struct WalletHistory {
    entries: Vec<HistoryEntry>,
    counted_ids: HashSet<String>,
}

/// creator/participant pair for a known bet — routes outcome updates.
#[derive(Debug, Clone)]
struct BetParties {
    creator: String,
    participant: Option<String>,
}

/// Result of applying one event to one wallet.
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    pub metrics: WalletMetrics,
    /// False when the bet_id had already been counted for this wallet.
    /// The recomputation still ran — duplicates overwrite derived state
    /// harmlessly, they never double-count.
    pub counted: bool,
}

// ---------------------------------------------------------------------------
// MetricsStore
// ---------------------------------------------------------------------------

/// Keyed store of per-wallet rolling aggregates.
///
/// Metrics are always recomputed from the retained history filtered to the
/// trailing 24h window (`created_at >= now - 24h`, cutoff inclusive) rather
/// than maintained as incremental counters. Updates for the same wallet are
/// serialized by the map's per-entry lock; distinct wallets proceed
/// concurrently.
pub struct MetricsStore {
    /// wallet → history
    wallets: DashMap<String, WalletHistory>,
    /// bet_id → parties, for routing outcome resolutions
    bets: DashMap<String, BetParties>,
}

impl MetricsStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            wallets: DashMap::new(),
            bets: DashMap::new(),
        })
    }

    /// Record a bet's parties ahead of its wallet updates, so an outcome
    /// resolution arriving right behind the placement can still be routed.
    /// Idempotent.
    pub fn register_bet(&self, event: &BetEvent) {
        self.bets.entry(event.bet_id.clone()).or_insert_with(|| BetParties {
            creator: event.creator.clone(),
            participant: event.participant.clone(),
        });
    }

    /// Apply one bet event to one wallet's history and recompute its metrics.
    ///
    /// Duplicate `bet_id`s (redelivery after a reconnect) skip the history
    /// mutation but still recompute, so callers can overwrite derived risk
    /// records unconditionally.
    pub fn apply(&self, wallet: &str, event: &BetEvent, now_ns: i64) -> ApplyOutcome {
        self.register_bet(event);

        let mut history = self.wallets.entry(wallet.to_string()).or_default();

        let counted = history.counted_ids.insert(event.bet_id.clone());
        if counted {
            history.entries.push(HistoryEntry {
                bet_id: event.bet_id.clone(),
                amount: event.amount,
                created_at_ns: event.created_at_ns,
                outcome: event.outcome,
            });
        }

        prune(&mut history, now_ns);
        let metrics = compute(wallet, &history.entries, now_ns);
        ApplyOutcome { metrics, counted }
    }

    /// Set the outcome of an already-known bet on one wallet's history and
    /// recompute. Idempotent — re-applying the same status changes nothing
    /// beyond the recomputation. An entry already pruned out of the window
    /// is left alone; the refreshed metrics are returned either way.
    pub fn apply_outcome(
        &self,
        wallet: &str,
        bet_id: &str,
        status: OutcomeStatus,
        now_ns: i64,
    ) -> WalletMetrics {
        let mut history = self.wallets.entry(wallet.to_string()).or_default();
        if let Some(entry) = history.entries.iter_mut().find(|e| e.bet_id == bet_id) {
            entry.outcome = Some(status);
        }
        prune(&mut history, now_ns);
        compute(wallet, &history.entries, now_ns)
    }

    /// creator and (optional) participant of a bet this store has seen.
    /// Routes outcome resolutions to the affected wallets.
    pub fn bet_parties(&self, bet_id: &str) -> Option<(String, Option<String>)> {
        self.bets
            .get(bet_id)
            .map(|p| (p.creator.clone(), p.participant.clone()))
    }

    /// Current metrics for a wallet without mutating anything.
    /// Unknown wallets read as zero-value.
    pub fn get(&self, wallet: &str, now_ns: i64) -> WalletMetrics {
        match self.wallets.get(wallet) {
            Some(history) => compute(wallet, &history.entries, now_ns),
            None => WalletMetrics::empty(wallet, now_ns),
        }
    }

    /// Bulk-load persisted events at startup. Events are inserted in the
    /// given order (the caller reads them sorted by sequence) without
    /// per-event recomputation.
    pub fn hydrate(&self, events: &[BetEvent]) {
        for event in events {
            self.register_bet(event);
            for wallet in event.affected_wallets() {
                let mut history = self.wallets.entry(wallet.to_string()).or_default();
                if history.counted_ids.insert(event.bet_id.clone()) {
                    history.entries.push(HistoryEntry {
                        bet_id: event.bet_id.clone(),
                        amount: event.amount,
                        created_at_ns: event.created_at_ns,
                        outcome: event.outcome,
                    });
                }
            }
        }
    }

    pub fn wallet_count(&self) -> usize {
        self.wallets.len()
    }

    pub fn known_bet_count(&self) -> usize {
        self.bets.len()
    }
}

impl Default for MetricsStore {
    fn default() -> Self {
        Self {
            wallets: DashMap::new(),
            bets: DashMap::new(),
        }
    }
}

/// Drop entries that can never re-enter the window. The cutoff filter in
/// `compute` remains authoritative; pruning only bounds memory.
fn prune(history: &mut WalletHistory, now_ns: i64) {
    let cutoff = now_ns - METRICS_WINDOW_NS;
    history.entries.retain(|e| e.created_at_ns >= cutoff);
}

/// Recompute rolling metrics from history filtered to the trailing window.
/// Cutoff is inclusive: an event exactly 24h old still counts.
fn compute(wallet: &str, entries: &[HistoryEntry], now_ns: i64) -> WalletMetrics {
    let cutoff = now_ns - METRICS_WINDOW_NS;
    let windowed: Vec<&HistoryEntry> =
        entries.iter().filter(|e| e.created_at_ns >= cutoff).collect();

    let bet_frequency = windowed.len() as u32;
    if bet_frequency == 0 {
        return WalletMetrics::empty(wallet, now_ns);
    }

    let total_volume_24h: f64 = windowed.iter().map(|e| e.amount).sum();
    let avg_bet_size = total_volume_24h / f64::from(bet_frequency);

    // Maximal trailing run of "lost" ending at the most recent event.
    let mut loss_streak = 0u32;
    for entry in windowed.iter().rev() {
        if entry.outcome == Some(OutcomeStatus::Lost) {
            loss_streak += 1;
        } else {
            break;
        }
    }

    WalletMetrics {
        wallet: wallet.to_string(),
        bet_frequency,
        total_volume_24h,
        avg_bet_size,
        loss_streak,
        last_updated_ns: now_ns,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
