use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::db::RiskRepo;
use crate::engine::ingest::EngineCounters;
use crate::scorer;
use crate::types::{BetRiskContext, ContextExpectation, ScoredWallet, WalletRole};

/// Messages flowing into the context assembler: the engine announces how many
/// scored records a bet will produce, workers deliver them as they finish.
#[derive(Debug, Clone)]
pub enum ContextMsg {
    Expect(ContextExpectation),
    Scored(ScoredWallet),
}

#[derive(Default)]
struct PendingContext {
    /// 0 until the expectation arrives — score messages from another sender
    /// may land first.
    expected: usize,
    scores: Vec<ScoredWallet>,
}

/// Joins per-wallet scored records back into a per-bet risk context and
/// upserts it. Runs as a dedicated task so workers never wait on each other.
pub struct ContextAssembler {
    repo: Arc<RiskRepo>,
    ctx_rx: mpsc::Receiver<ContextMsg>,
    counters: Arc<EngineCounters>,
    pending: HashMap<String, PendingContext>,
}

impl ContextAssembler {
    pub fn new(
        repo: Arc<RiskRepo>,
        ctx_rx: mpsc::Receiver<ContextMsg>,
        counters: Arc<EngineCounters>,
    ) -> Self {
        Self {
            repo,
            ctx_rx,
            counters,
            pending: HashMap::new(),
        }
    }

    pub async fn run(mut self) {
        while let Some(msg) = self.ctx_rx.recv().await {
            let bet_id = match msg {
                ContextMsg::Expect(e) => {
                    let entry = self.pending.entry(e.bet_id.clone()).or_default();
                    entry.expected = e.expected;
                    e.bet_id
                }
                ContextMsg::Scored(s) => {
                    let entry = self.pending.entry(s.bet_id.clone()).or_default();
                    let bet_id = s.bet_id.clone();
                    entry.scores.push(s);
                    bet_id
                }
            };
            self.try_complete(&bet_id).await;
        }
    }

    async fn try_complete(&mut self, bet_id: &str) {
        let ready = self
            .pending
            .get(bet_id)
            .map(|p| p.expected > 0 && p.scores.len() >= p.expected)
            .unwrap_or(false);
        if !ready {
            return;
        }
        let Some(pending) = self.pending.remove(bet_id) else {
            return;
        };

        let creator = pending
            .scores
            .iter()
            .find(|s| s.role == WalletRole::Creator)
            .map(|s| s.record.clone());
        let participant = pending
            .scores
            .iter()
            .find(|s| s.role == WalletRole::Participant)
            .map(|s| s.record.clone());

        let Some(creator) = creator else {
            warn!(bet_id, "context completed without a creator score — skipped");
            return;
        };

        let combined_score = scorer::combined_score(
            creator.risk_score,
            participant.as_ref().map(|p| p.risk_score),
        );
        let ctx = BetRiskContext {
            bet_id: bet_id.to_string(),
            creator,
            participant,
            combined_score,
            evaluated_at_ns: now_ns(),
        };

        debug!(bet_id, combined_score, "bet risk context assembled");
        if let Err(e) = self.repo.upsert_bet_context(&ctx).await {
            self.counters.inc_persist_failures();
            error!(bet_id, "bet context persist failed: {e}");
        }
    }
}

fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WalletMetrics;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_repo() -> Arc<RiskRepo> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        sqlx::migrate!("./migrations").run(&pool).await.expect("migrations");
        RiskRepo::new(pool)
    }

    fn scored(bet_id: &str, wallet: &str, role: WalletRole, score_inputs: (u32, f64)) -> ScoredWallet {
        let (freq, avg) = score_inputs;
        let metrics = WalletMetrics {
            wallet: wallet.to_string(),
            bet_frequency: freq,
            total_volume_24h: avg * f64::from(freq),
            avg_bet_size: avg,
            loss_streak: 0,
            last_updated_ns: 0,
        };
        ScoredWallet {
            bet_id: bet_id.to_string(),
            role,
            record: scorer::evaluate(&metrics, 0),
        }
    }

    async fn run_assembler(repo: Arc<RiskRepo>, msgs: Vec<ContextMsg>) {
        let (tx, rx) = mpsc::channel(16);
        let assembler = ContextAssembler::new(repo, rx, Arc::new(EngineCounters::default()));
        let handle = tokio::spawn(assembler.run());
        for msg in msgs {
            tx.send(msg).await.unwrap();
        }
        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn two_sided_bet_combines_with_halved_participant_term() {
        let repo = test_repo().await;
        // creator: freq=10 avg=10 → score 50; participant: freq=5 avg=4 → (50+20)/3 = 23.33
        let creator = scored("b1", "0xa", WalletRole::Creator, (10, 10.0));
        let participant = scored("b1", "0xb", WalletRole::Participant, (5, 4.0));
        let expected_combined =
            creator.record.risk_score + participant.record.risk_score / 2.0;

        run_assembler(
            repo.clone(),
            vec![
                ContextMsg::Expect(ContextExpectation {
                    bet_id: "b1".to_string(),
                    creator: "0xa".to_string(),
                    participant: Some("0xb".to_string()),
                    expected: 2,
                }),
                ContextMsg::Scored(creator),
                ContextMsg::Scored(participant),
            ],
        )
        .await;

        let row: (String, f64, Option<String>) = sqlx::query_as(
            "SELECT creator, combined_score, participant FROM bet_risk_contexts WHERE bet_id = 'b1'",
        )
        .fetch_one(repo.pool())
        .await
        .unwrap();
        assert_eq!(row.0, "0xa");
        assert!((row.1 - expected_combined).abs() < 1e-9);
        assert_eq!(row.2.as_deref(), Some("0xb"));
    }

    #[tokio::test]
    async fn unassigned_bet_passes_creator_score_through() {
        let repo = test_repo().await;
        let creator = scored("b2", "0xa", WalletRole::Creator, (10, 10.0));
        let creator_score = creator.record.risk_score;

        run_assembler(
            repo.clone(),
            vec![
                ContextMsg::Expect(ContextExpectation {
                    bet_id: "b2".to_string(),
                    creator: "0xa".to_string(),
                    participant: None,
                    expected: 1,
                }),
                ContextMsg::Scored(creator),
            ],
        )
        .await;

        let (combined, participant_score): (f64, Option<f64>) = sqlx::query_as(
            "SELECT combined_score, participant_score FROM bet_risk_contexts WHERE bet_id = 'b2'",
        )
        .fetch_one(repo.pool())
        .await
        .unwrap();
        assert!((combined - creator_score).abs() < 1e-9);
        assert!(participant_score.is_none());
    }

    #[tokio::test]
    async fn score_arriving_before_expectation_still_completes() {
        let repo = test_repo().await;
        run_assembler(
            repo.clone(),
            vec![
                ContextMsg::Scored(scored("b3", "0xa", WalletRole::Creator, (1, 1.0))),
                ContextMsg::Expect(ContextExpectation {
                    bet_id: "b3".to_string(),
                    creator: "0xa".to_string(),
                    participant: None,
                    expected: 1,
                }),
            ],
        )
        .await;

        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM bet_risk_contexts WHERE bet_id = 'b3'")
                .fetch_one(repo.pool())
                .await
                .unwrap();
        assert_eq!(count, 1);
    }
}
