//! The feed→book pipeline (spec.md §4.2): connect, buffer, snapshot, replay,
//! then stream events into the replicated [`crate::orderbook::OrderBook`]
//! forever — or until the feed drops or the book is poisoned by a sequence
//! gap, at which point [`FeedSynchronizer::run`] tears everything down and
//! reconnects with exponential backoff.

use crate::errors::{ExchangeError, FeedError};
use crate::exchange::ExchangeClient;
use crate::instrument::ProductId;
use crate::market_maker::{MakerEvent, MakerOrderIds};
use crate::orderbook::{FeedEvent, OrderBook};
use async_trait::async_trait;
use rand::Rng;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// One live connection to the streaming feed, abstracted so tests can
/// substitute a scripted sequence of frames instead of a real socket.
#[async_trait]
pub trait FeedConnection: Send {
    /// Returns the next raw text frame, `None` on clean close.
    async fn recv(&mut self) -> Option<Result<String, FeedError>>;
}

/// Opens [`FeedConnection`]s for a product, subscribing as the venue expects.
#[async_trait]
pub trait FeedTransport: Send + Sync {
    async fn connect(&self, product_id: ProductId) -> Result<Box<dyn FeedConnection>, FeedError>;
}

/// Tuning knobs for the synchronization algorithm (spec.md §4.2, Design Notes §9).
#[derive(Debug, Clone, Copy)]
pub struct FeedConfig {
    /// How many raw messages to buffer before fetching the snapshot — large
    /// enough that the snapshot's own sequence is guaranteed to fall at or
    /// before the end of the buffer.
    pub buffer_size: usize,
    /// How long `recv` may go silent before the feed is considered stale and
    /// torn down for reconnection. Not specified by the venue; chosen as a
    /// generous multiple of its heartbeat interval.
    pub stale_timeout: Duration,
    /// Print a live "Min ask / Max bid / Spread" status line for each
    /// applied event — the non-trading half of the venue's `--c` flag.
    pub display: bool,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            buffer_size: 20,
            stale_timeout: Duration::from_secs(30),
            display: false,
        }
    }
}

/// Parses one raw feed frame. Message types this crate doesn't model
/// (`subscriptions` acks, `heartbeat`, informational `error`s) are tolerated
/// and return `Ok(None)` rather than failing the connection.
fn parse_event(text: &str) -> Result<Option<FeedEvent>, FeedError> {
    let value: Value = serde_json::from_str(text).map_err(|e| FeedError::Parse(e.to_string()))?;
    let msg_type = value.get("type").and_then(Value::as_str).unwrap_or("");
    match msg_type {
        "received" | "open" | "done" | "match" | "change" => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| FeedError::Parse(e.to_string())),
        other => {
            debug!(msg_type = other, "ignoring unmodeled feed message");
            Ok(None)
        }
    }
}

/// Long-lived task owning the feed→book pipeline for one product.
pub struct FeedSynchronizer {
    transport: Arc<dyn FeedTransport>,
    exchange: Arc<dyn ExchangeClient>,
    product_id: ProductId,
    config: FeedConfig,
    book: Arc<RwLock<OrderBook>>,
    maker_orders: Arc<RwLock<MakerOrderIds>>,
    maker_events: mpsc::Sender<MakerEvent>,
}

impl FeedSynchronizer {
    pub fn new(
        transport: Arc<dyn FeedTransport>,
        exchange: Arc<dyn ExchangeClient>,
        product_id: ProductId,
        config: FeedConfig,
        book: Arc<RwLock<OrderBook>>,
        maker_orders: Arc<RwLock<MakerOrderIds>>,
        maker_events: mpsc::Sender<MakerEvent>,
    ) -> Self {
        Self {
            transport,
            exchange,
            product_id,
            config,
            book,
            maker_orders,
            maker_events,
        }
    }

    /// Supervises [`Self::run_once`], reconnecting with exponential backoff
    /// whenever it returns — the venue's own bot measures each attempt's
    /// wall-clock duration and only backs off when a cycle ends too quickly
    /// to have been a graceful, long-lived connection.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut n: u32 = 0;
        while !shutdown.is_cancelled() {
            let started = Instant::now();
            if let Err(e) = self.run_once(&shutdown).await {
                if shutdown.is_cancelled() {
                    break;
                }
                warn!(error = %e, "feed synchronization cycle ended");
            }
            if shutdown.is_cancelled() {
                break;
            }

            if started.elapsed() < Duration::from_secs(2) {
                n += 1;
                let jitter_ms = rand::rng().random_range(0..=1000);
                let sleep_time = Duration::from_secs(2u64.pow(n)) + Duration::from_millis(jitter_ms);
                error!(?sleep_time, "feed connectivity problem, backing off");
                tokio::select! {
                    _ = tokio::time::sleep(sleep_time) => {}
                    _ = shutdown.cancelled() => break,
                }
                if n > 6 {
                    n = 0;
                }
            }
        }
    }

    /// One full cycle: connect, buffer, snapshot, replay, then stream events
    /// until the connection drops, goes stale, or the book is poisoned.
    async fn run_once(&self, shutdown: &CancellationToken) -> Result<(), FeedError> {
        let mut connection = self.transport.connect(self.product_id).await?;

        let mut buffered: Vec<Value> = Vec::with_capacity(self.config.buffer_size);
        while buffered.len() <= self.config.buffer_size {
            let frame = tokio::select! {
                frame = connection.recv() => frame,
                _ = shutdown.cancelled() => return Ok(()),
            };
            match frame {
                Some(Ok(text)) => match serde_json::from_str::<Value>(&text) {
                    Ok(value) => buffered.push(value),
                    Err(e) => return Err(FeedError::Parse(e.to_string())),
                },
                Some(Err(e)) => return Err(e),
                None => return Err(FeedError::ClosedByPeer),
            }
        }

        let snapshot = self.exchange.fetch_snapshot(self.product_id).await?;
        let snapshot_sequence = snapshot.sequence;

        let mut fresh_book = OrderBook::new();
        fresh_book
            .ingest_snapshot(snapshot)
            .expect("fresh book is never pre-initialized");

        for value in buffered {
            let sequence = value.get("sequence").and_then(Value::as_u64).unwrap_or(0);
            if sequence <= snapshot_sequence {
                continue;
            }
            if let Some(event) = parse_buffered(value)? {
                if !fresh_book.process_event(&event) {
                    return Err(FeedError::SequenceGap);
                }
                self.route_maker_event(&event).await;
            }
        }

        info!(last_sequence = fresh_book.last_sequence, "order book synchronized from snapshot");
        *self.book.write().await = fresh_book;

        loop {
            let frame = tokio::select! {
                frame = tokio::time::timeout(self.config.stale_timeout, connection.recv()) => frame,
                _ = shutdown.cancelled() => return Ok(()),
            };
            let frame = match frame {
                Ok(frame) => frame,
                Err(_) => return Err(FeedError::Stale(self.config.stale_timeout)),
            };
            let text = match frame {
                Some(Ok(text)) => text,
                Some(Err(e)) => return Err(e),
                None => return Err(FeedError::ClosedByPeer),
            };

            let Some(event) = parse_event(&text)? else {
                continue;
            };

            self.route_maker_event(&event).await;

            let applied = self.book.write().await.process_event(&event);
            if !applied {
                return Err(FeedError::SequenceGap);
            }

            if self.config.display {
                self.print_status_line().await;
            }
        }
    }

    /// Mirrors the venue bot's `--c` status line: latency since the last
    /// applied event plus the current top of book.
    async fn print_status_line(&self) {
        let book = self.book.read().await;
        if let (Some(min_ask), Some(max_bid)) = (book.best_ask(), book.best_bid()) {
            let latency = book
                .last_event_time
                .map(|t| (chrono::Utc::now() - t).num_microseconds().unwrap_or(0) as f64 / 1e6)
                .unwrap_or(0.0);
            print!(
                "\rLatency: {latency:.6} secs, Min ask: {min_ask:.2}, Max bid: {max_bid:.2}, Spread: {:.2}",
                min_ask - max_bid
            );
            let _ = std::io::Write::flush(&mut std::io::stdout());
        }
    }

    /// Notifies the market maker when an event's order_id matches one of its
    /// own outstanding quotes (spec.md §4.2 "Routing side-effect").
    async fn route_maker_event(&self, event: &FeedEvent) {
        let Some(order_id) = event.routable_order_id() else {
            return;
        };
        let side = {
            let maker_orders = self.maker_orders.read().await;
            if maker_orders.bid.as_ref() == Some(order_id) {
                Some(crate::orders::Side::Bid)
            } else if maker_orders.ask.as_ref() == Some(order_id) {
                Some(crate::orders::Side::Ask)
            } else {
                None
            }
        };
        let Some(side) = side else { return };
        let _ = self
            .maker_events
            .send(MakerEvent {
                side,
                order_id: order_id.clone(),
                status: event.type_name(),
            })
            .await;
    }
}

fn parse_buffered(value: Value) -> Result<Option<FeedEvent>, FeedError> {
    let msg_type = value.get("type").and_then(Value::as_str).unwrap_or("");
    match msg_type {
        "received" | "open" | "done" | "match" | "change" => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| FeedError::Parse(e.to_string())),
        _ => Ok(None),
    }
}
