use std::sync::atomic::{AtomicU64, Ordering};

use serde::Deserialize;
use tracing::warn;

static PARSE_FAILURES: AtomicU64 = AtomicU64::new(0);

/// Nested outcome object on `bet_created` frames.
#[derive(Debug, Deserialize, Clone)]
pub struct OutcomeField {
    pub status: Option<String>,
}

/// Raw deserializable shape covering all feed messages.
/// Fields are optional because different event types carry different
/// subsets; the engine's validation step decides what is usable.
#[derive(Debug, Deserialize)]
struct RawFeedMsg {
    pub event_type: Option<String>,
    pub sequence: Option<u64>,
    pub bet_id: Option<String>,
    pub creator: Option<String>,
    pub participant: Option<String>,
    pub amount: Option<f64>,
    /// UTC epoch seconds, as stamped by the ledger.
    pub created_at: Option<i64>,
    /// `bet_created` only.
    pub outcome: Option<OutcomeField>,
    /// `bet_resolved` only.
    pub status: Option<String>,
    pub block_number: Option<u64>,
    pub tx_hash: Option<String>,
}

/// Unvalidated bet placement as it arrived on the wire.
#[derive(Debug, Clone)]
pub struct BetFrame {
    pub sequence: Option<u64>,
    pub bet_id: Option<String>,
    pub creator: Option<String>,
    pub participant: Option<String>,
    pub amount: Option<f64>,
    pub created_at_secs: Option<i64>,
    pub outcome_status: Option<String>,
    pub block_number: Option<u64>,
    pub tx_hash: Option<String>,
}

/// Unvalidated outcome resolution as it arrived on the wire.
#[derive(Debug, Clone)]
pub struct OutcomeFrame {
    pub sequence: Option<u64>,
    pub bet_id: Option<String>,
    pub status: Option<String>,
    pub block_number: Option<u64>,
    pub tx_hash: Option<String>,
}

/// Parsed event from a single feed message object, handed to the engine.
#[derive(Debug, Clone)]
pub enum FeedFrame {
    BetCreated(BetFrame),
    BetResolved(OutcomeFrame),
}

impl FeedFrame {
    /// Feed cursor position, when the frame carried one.
    pub fn sequence(&self) -> Option<u64> {
        match self {
            FeedFrame::BetCreated(f) => f.sequence,
            FeedFrame::BetResolved(f) => f.sequence,
        }
    }
}

/// Parse a raw feed text frame into zero or more events.
///
/// Frames arrive as either a single JSON object or an array of objects.
/// Unknown event types are ignored; unparseable frames are counted and
/// sampled to the log so a format drift upstream is visible.
pub fn parse_feed_frame(raw: &str) -> Vec<FeedFrame> {
    let msgs: Vec<RawFeedMsg> = if raw.trim_start().starts_with('[') {
        serde_json::from_str(raw).unwrap_or_default()
    } else {
        match serde_json::from_str::<RawFeedMsg>(raw) {
            Ok(m) => vec![m],
            Err(_) => vec![],
        }
    };

    if msgs.is_empty() {
        let count = PARSE_FAILURES.fetch_add(1, Ordering::Relaxed) + 1;
        if count <= 10 || count % 1000 == 0 {
            let sample = &raw[..500.min(raw.len())];
            warn!(count, "[FEED PARSE] unrecognized frame: {sample}");
        }
        return vec![];
    }

    msgs.into_iter().filter_map(expand_raw_msg).collect()
}

/// Parse one already-deserialized JSON object (REST backfill pages carry the
/// same shapes as WebSocket frames).
pub fn frame_from_value(value: &serde_json::Value) -> Option<FeedFrame> {
    serde_json::from_value::<RawFeedMsg>(value.clone())
        .ok()
        .and_then(expand_raw_msg)
}

fn expand_raw_msg(msg: RawFeedMsg) -> Option<FeedFrame> {
    match msg.event_type.as_deref() {
        Some("bet_created") => Some(FeedFrame::BetCreated(BetFrame {
            sequence: msg.sequence,
            bet_id: msg.bet_id,
            creator: msg.creator,
            participant: msg.participant,
            amount: msg.amount,
            created_at_secs: msg.created_at,
            outcome_status: msg.outcome.and_then(|o| o.status),
            block_number: msg.block_number,
            tx_hash: msg.tx_hash,
        })),
        Some("bet_resolved") => Some(FeedFrame::BetResolved(OutcomeFrame {
            sequence: msg.sequence,
            bet_id: msg.bet_id,
            status: msg.status,
            block_number: msg.block_number,
            tx_hash: msg.tx_hash,
        })),
        _ => None,
    }
}

/// Subscription frame: the server resumes delivery from `from_sequence`,
/// redelivering anything not yet acknowledged.
pub fn build_subscribe_msg(from_sequence: u64) -> String {
    serde_json::json!({
        "type": "subscribe",
        "channel": "bets",
        "from_sequence": from_sequence,
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bet_created_single_object() {
        let raw = r#"{"event_type":"bet_created","sequence":7,"bet_id":"bet-7",
            "creator":"0xaaa","participant":"unassigned","amount":12.5,
            "created_at":1733000000,"outcome":{"status":"pending"},
            "block_number":100,"tx_hash":"0xdead"}"#;
        let frames = parse_feed_frame(raw);
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            FeedFrame::BetCreated(f) => {
                assert_eq!(f.sequence, Some(7));
                assert_eq!(f.bet_id.as_deref(), Some("bet-7"));
                assert_eq!(f.creator.as_deref(), Some("0xaaa"));
                assert_eq!(f.participant.as_deref(), Some("unassigned"));
                assert_eq!(f.amount, Some(12.5));
                assert_eq!(f.created_at_secs, Some(1_733_000_000));
                assert_eq!(f.outcome_status.as_deref(), Some("pending"));
                assert_eq!(f.block_number, Some(100));
            }
            other => panic!("expected BetCreated, got {other:?}"),
        }
    }

    #[test]
    fn parses_bet_resolved() {
        let raw = r#"{"event_type":"bet_resolved","sequence":9,"bet_id":"bet-7",
            "status":"lost","block_number":104,"tx_hash":"0xbeef"}"#;
        let frames = parse_feed_frame(raw);
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            FeedFrame::BetResolved(f) => {
                assert_eq!(f.sequence, Some(9));
                assert_eq!(f.status.as_deref(), Some("lost"));
            }
            other => panic!("expected BetResolved, got {other:?}"),
        }
    }

    #[test]
    fn parses_array_of_events() {
        let raw = r#"[
            {"event_type":"bet_created","sequence":1,"bet_id":"a","creator":"0xa","amount":1.0,"created_at":1733000000},
            {"event_type":"bet_resolved","sequence":2,"bet_id":"a","status":"won"}
        ]"#;
        let frames = parse_feed_frame(raw);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].sequence(), Some(1));
        assert_eq!(frames[1].sequence(), Some(2));
    }

    #[test]
    fn unknown_event_type_is_skipped() {
        let raw = r#"{"event_type":"heartbeat","sequence":3}"#;
        assert!(parse_feed_frame(raw).is_empty());
    }

    #[test]
    fn garbage_returns_empty() {
        assert!(parse_feed_frame("not json at all").is_empty());
        assert!(parse_feed_frame(r#"{"totally":"unrelated"}"#).is_empty());
    }

    #[test]
    fn missing_fields_survive_to_validation() {
        // No creator and no amount — parse keeps the frame; the engine's
        // validation step is the one that drops it.
        let raw = r#"{"event_type":"bet_created","sequence":4,"bet_id":"b"}"#;
        let frames = parse_feed_frame(raw);
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            FeedFrame::BetCreated(f) => {
                assert!(f.creator.is_none());
                assert!(f.amount.is_none());
            }
            other => panic!("expected BetCreated, got {other:?}"),
        }
    }

    #[test]
    fn frame_from_value_matches_text_parse() {
        let value = serde_json::json!({
            "event_type": "bet_created",
            "sequence": 11,
            "bet_id": "bet-11",
            "creator": "0xccc",
            "amount": 3.0,
            "created_at": 1733000100
        });
        let frame = frame_from_value(&value).expect("frame");
        assert_eq!(frame.sequence(), Some(11));
    }

    #[test]
    fn subscribe_msg_carries_cursor() {
        let msg = build_subscribe_msg(42);
        let v: serde_json::Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(v["type"], "subscribe");
        assert_eq!(v["channel"], "bets");
        assert_eq!(v["from_sequence"], 42);
    }
}
