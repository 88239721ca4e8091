use crate::types::{BetEvent, OutcomeStatus, SourceRef};

/// Row shape of the `bet_events` log, used for startup rehydration.
#[derive(Debug, sqlx::FromRow)]
pub struct BetEventRow {
    pub bet_id: String,
    pub creator: String,
    pub participant: Option<String>,
    pub amount: f64,
    pub created_at: i64,
    pub outcome: Option<String>,
    pub sequence: i64,
    pub block_number: i64,
    pub tx_hash: String,
    pub ingested_at: i64,
}

impl From<BetEventRow> for BetEvent {
    fn from(row: BetEventRow) -> Self {
        BetEvent {
            bet_id: row.bet_id,
            creator: row.creator,
            participant: row.participant,
            amount: row.amount,
            created_at_ns: row.created_at,
            outcome: row.outcome.as_deref().and_then(OutcomeStatus::parse),
            source_ref: SourceRef {
                sequence: row.sequence.max(0) as u64,
                block_number: row.block_number.max(0) as u64,
                tx_hash: row.tx_hash,
            },
        }
    }
}
