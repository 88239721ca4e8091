use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Bet events
// ---------------------------------------------------------------------------

/// Position of an event in the upstream feed. `sequence` is the feed's
/// monotonic cursor; `block_number`/`tx_hash` locate the originating
/// ledger transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub sequence: u64,
    pub block_number: u64,
    pub tx_hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Pending,
    Won,
    Lost,
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OutcomeStatus::Pending => "pending",
            OutcomeStatus::Won => "won",
            OutcomeStatus::Lost => "lost",
        };
        write!(f, "{s}")
    }
}

impl OutcomeStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OutcomeStatus::Pending),
            "won" => Some(OutcomeStatus::Won),
            "lost" => Some(OutcomeStatus::Lost),
            _ => None,
        }
    }
}

/// A validated bet placement. Immutable once created by the feed.
/// `participant` is `None` while the counterparty slot is still the
/// "unassigned" sentinel on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetEvent {
    pub bet_id: String,
    pub creator: String,
    pub participant: Option<String>,
    pub amount: f64,
    /// UTC epoch nanoseconds.
    pub created_at_ns: i64,
    pub outcome: Option<OutcomeStatus>,
    pub source_ref: SourceRef,
}

impl BetEvent {
    /// Wallets whose metrics this event touches: creator always,
    /// participant only when resolved.
    pub fn affected_wallets(&self) -> Vec<&str> {
        let mut wallets = vec![self.creator.as_str()];
        if let Some(p) = &self.participant {
            wallets.push(p.as_str());
        }
        wallets
    }
}

/// An outcome resolution for an already-placed bet. Mutates only the stored
/// outcome; applying the same status twice is a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeUpdate {
    pub bet_id: String,
    pub status: OutcomeStatus,
    pub source_ref: SourceRef,
}

/// Event stream handed from the feed adapter to the ingestion engine.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    Bet(BetEvent),
    Outcome(OutcomeUpdate),
}

impl FeedEvent {
    pub fn sequence(&self) -> u64 {
        match self {
            FeedEvent::Bet(e) => e.source_ref.sequence,
            FeedEvent::Outcome(u) => u.source_ref.sequence,
        }
    }
}

// ---------------------------------------------------------------------------
// Wallet metrics
// ---------------------------------------------------------------------------

/// Rolling aggregates over the trailing 24h window, recomputed on every apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletMetrics {
    pub wallet: String,
    /// Events in the trailing 24h window.
    pub bet_frequency: u32,
    pub total_volume_24h: f64,
    /// total_volume_24h / bet_frequency, 0 when the window is empty.
    pub avg_bet_size: f64,
    /// Consecutive trailing "lost" outcomes ending at the most recent event.
    pub loss_streak: u32,
    /// UTC epoch nanoseconds of the last recomputation.
    pub last_updated_ns: i64,
}

impl WalletMetrics {
    /// Zero-value metrics for a wallet with no activity in the window.
    pub fn empty(wallet: &str, now_ns: i64) -> Self {
        Self {
            wallet: wallet.to_string(),
            bet_frequency: 0,
            total_volume_24h: 0.0,
            avg_bet_size: 0.0,
            loss_streak: 0,
            last_updated_ns: now_ns,
        }
    }
}

// ---------------------------------------------------------------------------
// Risk evaluation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        };
        write!(f, "{s}")
    }
}

/// Most recent scored evaluation for a wallet. Upserted on every relevant
/// event — no lifecycle beyond "latest".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskRecord {
    pub wallet: String,
    /// Clamped to [0, 100].
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub message: String,
    pub metrics: WalletMetrics,
    pub evaluated_at_ns: i64,
}

/// Per-bet combination of creator and participant risk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetRiskContext {
    pub bet_id: String,
    pub creator: RiskRecord,
    pub participant: Option<RiskRecord>,
    pub combined_score: f64,
    pub evaluated_at_ns: i64,
}

// ---------------------------------------------------------------------------
// Engine channel messages
// ---------------------------------------------------------------------------

/// Role a wallet plays in a bet — carried through the worker pool so the
/// context assembler can slot scored records back into the right side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletRole {
    Creator,
    Participant,
}

/// Unit of work routed to a worker shard by wallet hash.
#[derive(Debug, Clone)]
pub struct WalletJob {
    pub wallet: String,
    pub role: WalletRole,
    pub event: FeedEvent,
}

/// A scored wallet evaluation flowing from a worker to the context assembler.
#[derive(Debug, Clone)]
pub struct ScoredWallet {
    pub bet_id: String,
    pub role: WalletRole,
    pub record: RiskRecord,
}

/// Announces to the context assembler how many scored records to expect for
/// a bet before its context can be written.
#[derive(Debug, Clone)]
pub struct ContextExpectation {
    pub bet_id: String,
    pub creator: String,
    pub participant: Option<String>,
    pub expected: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(participant: Option<&str>) -> BetEvent {
        BetEvent {
            bet_id: "b1".to_string(),
            creator: "0xaaa".to_string(),
            participant: participant.map(|s| s.to_string()),
            amount: 5.0,
            created_at_ns: 1_000,
            outcome: None,
            source_ref: SourceRef {
                sequence: 1,
                block_number: 10,
                tx_hash: "0xdead".to_string(),
            },
        }
    }

    #[test]
    fn affected_wallets_includes_participant_only_when_assigned() {
        assert_eq!(event(None).affected_wallets(), vec!["0xaaa"]);
        assert_eq!(
            event(Some("0xbbb")).affected_wallets(),
            vec!["0xaaa", "0xbbb"]
        );
    }

    #[test]
    fn outcome_status_round_trips_through_display() {
        for status in [OutcomeStatus::Pending, OutcomeStatus::Won, OutcomeStatus::Lost] {
            assert_eq!(OutcomeStatus::parse(&status.to_string()), Some(status));
        }
        assert_eq!(OutcomeStatus::parse("void"), None);
    }
}
