use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::config::{Config, FEED_PING_INTERVAL_SECS, FEED_RECONNECT_DELAY_MS};
use crate::error::Result;
use crate::feed::backfill;
use crate::feed::messages::{build_subscribe_msg, parse_feed_frame, FeedFrame};
use crate::health::HealthState;

/// Manages the single persistent WebSocket subscription to the bet feed.
///
/// Delivery into the engine channel is at-least-once: the cursor advances
/// only after a frame has been handed off, reconnects resubscribe from the
/// cursor, and the REST backfill replays whatever the server no longer
/// redelivers. Events are never dropped on a full channel — the send awaits.
pub struct FeedManager {
    cfg: Config,
    event_tx: mpsc::Sender<FeedFrame>,
    health: Arc<HealthState>,
    /// Highest sequence handed to the engine.
    cursor: u64,
    /// Total WS frames received since process start (for flow diagnostics).
    frames_received: Arc<AtomicU64>,
    /// Total events routed to the engine.
    events_routed: Arc<AtomicU64>,
}

impl FeedManager {
    pub fn new(
        cfg: Config,
        event_tx: mpsc::Sender<FeedFrame>,
        health: Arc<HealthState>,
        start_sequence: u64,
    ) -> Self {
        Self {
            cfg,
            event_tx,
            health,
            cursor: start_sequence,
            frames_received: Arc::new(AtomicU64::new(0)),
            events_routed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Runs until the engine side of the channel is dropped. One task for the
    /// lifetime of the process — reconnects reuse it, they never spawn.
    pub async fn run(mut self) {
        loop {
            if self.cfg.backfill_enabled {
                match backfill::replay(&self.cfg, self.cursor, &self.event_tx).await {
                    Ok(stats) => {
                        if stats.events > 0 {
                            self.cursor = self.cursor.max(stats.max_sequence);
                            info!(
                                events = stats.events,
                                pages = stats.pages,
                                cursor = self.cursor,
                                "Backfill replayed {} events up to seq {}",
                                stats.events,
                                self.cursor,
                            );
                        }
                    }
                    Err(e) => {
                        // The live stream redelivers from the cursor anyway;
                        // a failed backfill only widens the redelivery overlap.
                        warn!("Backfill failed: {e}");
                    }
                }
            }

            info!(url = %self.cfg.feed_ws_url, cursor = self.cursor, "Feed connecting");
            match self.connect_once().await {
                Ok(EngineGone::Yes) => {
                    info!("Engine channel closed — feed shutting down");
                    return;
                }
                Ok(EngineGone::No) => {
                    info!("Feed connection closed cleanly");
                }
                Err(e) => {
                    error!("Feed connection error: {e}");
                }
            }

            self.health.set_feed_connected(false);
            self.health.inc_reconnects();
            warn!(
                reconnects = self.health.reconnects(),
                "Feed reconnecting in {FEED_RECONNECT_DELAY_MS}ms"
            );
            tokio::time::sleep(Duration::from_millis(FEED_RECONNECT_DELAY_MS)).await;
        }
    }

    async fn connect_once(&mut self) -> Result<EngineGone> {
        let (ws_stream, _) = connect_async(&self.cfg.feed_ws_url).await?;
        let (mut write, mut read) = ws_stream.split();

        // Resume delivery after the last acknowledged position.
        let sub_msg = build_subscribe_msg(self.cursor + 1);
        write.send(Message::Text(sub_msg.into())).await?;
        self.health.set_feed_connected(true);
        info!(cursor = self.cursor, "Feed connected, subscribed from seq {}", self.cursor + 1);

        let mut ping_interval = interval(Duration::from_secs(FEED_PING_INTERVAL_SECS));
        ping_interval.tick().await; // consume immediate first tick

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if self.handle_frame(&text).await == EngineGone::Yes {
                                return Ok(EngineGone::Yes);
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            return Ok(EngineGone::No);
                        }
                        Some(Err(e)) => return Err(e.into()),
                        Some(Ok(_)) => {}
                    }
                }

                _ = ping_interval.tick() => {
                    debug!("Feed ping");
                    write.send(Message::Ping(vec![].into())).await?;
                }
            }
        }
    }

    async fn handle_frame(&mut self, text: &str) -> EngineGone {
        let total_frames = self.frames_received.fetch_add(1, Ordering::Relaxed) + 1;
        if total_frames % 500 == 0 {
            let routed = self.events_routed.load(Ordering::Relaxed);
            info!(
                frames = total_frames,
                events = routed,
                cursor = self.cursor,
                "[FEED] {total_frames} frames | routed={routed} | cursor={}",
                self.cursor,
            );
        }

        for frame in parse_feed_frame(text) {
            let sequence = frame.sequence();
            // Backpressured handoff — a full engine channel delays the feed,
            // it never drops an event.
            if self.event_tx.send(frame).await.is_err() {
                return EngineGone::Yes;
            }
            self.events_routed.fetch_add(1, Ordering::Relaxed);
            self.health.set_last_event_at_ns(now_ns());
            if let Some(seq) = sequence {
                self.cursor = self.cursor.max(seq);
            }
        }
        EngineGone::No
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineGone {
    Yes,
    No,
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}
