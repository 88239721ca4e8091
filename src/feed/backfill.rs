use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use crate::config::{Config, BACKFILL_PAGE_SIZE};
use crate::error::{AppError, Result};
use crate::feed::messages::{frame_from_value, FeedFrame};

#[derive(Debug, Default)]
pub struct BackfillStats {
    pub pages: usize,
    pub events: usize,
    pub skipped: usize,
    pub max_sequence: u64,
}

/// Replay events the feed server no longer redelivers, from the REST index,
/// starting after `cursor`. Pages are pushed through the same channel as
/// live frames, so downstream dedup makes any overlap harmless.
pub async fn replay(
    cfg: &Config,
    cursor: u64,
    event_tx: &mpsc::Sender<FeedFrame>,
) -> Result<BackfillStats> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;

    let mut stats = BackfillStats::default();
    let mut from_sequence = cursor + 1;

    loop {
        let url = format!(
            "{}/bets/events?from_sequence={}&limit={}",
            cfg.feed_api_url, from_sequence, BACKFILL_PAGE_SIZE
        );
        let resp: serde_json::Value = client.get(&url).send().await?.json().await?;

        let items = resp.as_array().ok_or_else(|| {
            AppError::Backfill("/bets/events response was not an array".to_string())
        })?;
        if items.is_empty() {
            break;
        }
        stats.pages += 1;

        for item in items {
            let Some(frame) = frame_from_value(item) else {
                stats.skipped += 1;
                debug!("[BACKFILL] skipping unrecognized item");
                continue;
            };
            let sequence = frame.sequence();
            event_tx
                .send(frame)
                .await
                .map_err(|e| AppError::ChannelSend(e.to_string()))?;
            stats.events += 1;
            if let Some(seq) = sequence {
                stats.max_sequence = stats.max_sequence.max(seq);
                from_sequence = from_sequence.max(seq + 1);
            }
        }

        if items.len() < BACKFILL_PAGE_SIZE {
            break;
        }
    }

    Ok(stats)
}
