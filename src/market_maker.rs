//! The quoting state machine (spec.md §4.3): keep exactly one resting bid
//! and one resting ask around the book's spread, re-pricing or cancelling
//! them as the market moves and the venue accepts or rejects orders.
//!
//! A tick runs at roughly 200 Hz. Each tick walks the same five steps in
//! order and stops at the first one that takes an action — this mirrors the
//! venue's own bot, which treats a tick as "do at most one thing, then
//! `continue`".

use crate::errors::MarketMakerError;
use crate::exchange::{ExchangeClient, OrderResponse, OrderStatus};
use crate::instrument::ProductId;
use crate::orderbook::OrderBook;
use crate::orders::{OrderId, Side};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-side spread and timing configuration (spec.md §4.3 "Spread configuration",
/// §9 "magic constants" — order size and the rejection penalty are tunable
/// rather than hardcoded, per SPEC_FULL.md's resolution of that design note).
#[derive(Debug, Clone, Copy)]
pub struct MarketMakerConfig {
    pub bid_spread: Decimal,
    pub ask_spread: Decimal,
    pub bid_too_far_adjustment_spread: Decimal,
    pub ask_too_far_adjustment_spread: Decimal,
    pub bid_too_close_adjustment_spread: Decimal,
    pub ask_too_close_adjustment_spread: Decimal,
    /// Size (in BTC) posted on each side, per tick. Default 0.01.
    pub order_size: Decimal,
    /// Additive penalty applied to a side's rejection offset on a post-only reject. Default 0.04.
    pub rejection_penalty: Decimal,
    pub tick_interval: std::time::Duration,
    pub balance_refresh_interval: std::time::Duration,
    pub startup_delay: std::time::Duration,
    /// Print an extended status line (book + own bid/ask/spread) each tick
    /// that moves — the trading half of the venue's `--c` flag.
    pub display: bool,
}

/// One side's resting quote and its rejection/cancellation state (spec.md §3).
#[derive(Debug, Clone, Default)]
pub struct OutstandingQuote {
    pub order_id: Option<OrderId>,
    pub price: Option<Decimal>,
    pub status: Option<String>,
    pub rejections: Decimal,
    pub cancelled: bool,
}

impl OutstandingQuote {
    fn clear(&mut self) {
        *self = OutstandingQuote::default();
    }
}

/// The order ids the feed synchronizer checks incoming events against, kept
/// in lockstep with the real [`OutstandingQuote`]s held by [`MarketMaker`].
#[derive(Debug, Clone, Default)]
pub struct MakerOrderIds {
    pub bid: Option<OrderId>,
    pub ask: Option<OrderId>,
}

/// A lifecycle update for one of the maker's own orders, routed in from the feed.
#[derive(Debug, Clone)]
pub struct MakerEvent {
    pub side: Side,
    pub order_id: OrderId,
    pub status: &'static str,
}

/// Balances the market maker checks before quoting (spec.md §5: read-only,
/// refreshed by a sibling task every 30 seconds).
#[derive(Debug, Clone, Default)]
pub struct Balances {
    pub usd_available: Decimal,
    pub btc_available: Decimal,
}

pub struct MarketMaker {
    exchange: Arc<dyn ExchangeClient>,
    product_id: ProductId,
    config: MarketMakerConfig,
    book: Arc<RwLock<OrderBook>>,
    balances: Arc<RwLock<Balances>>,
    maker_orders: Arc<RwLock<MakerOrderIds>>,
    bid: OutstandingQuote,
    ask: OutstandingQuote,
}

impl MarketMaker {
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        product_id: ProductId,
        config: MarketMakerConfig,
        book: Arc<RwLock<OrderBook>>,
        balances: Arc<RwLock<Balances>>,
        maker_orders: Arc<RwLock<MakerOrderIds>>,
    ) -> Self {
        Self {
            exchange,
            product_id,
            config,
            book,
            balances,
            maker_orders,
            bid: OutstandingQuote::default(),
            ask: OutstandingQuote::default(),
        }
    }

    /// Startup sequence then the steady-state tick loop (spec.md §4.3 "Startup").
    pub async fn run(
        &mut self,
        mut maker_events: mpsc::Receiver<MakerEvent>,
        shutdown: CancellationToken,
    ) -> Result<(), MarketMakerError> {
        tokio::select! {
            _ = tokio::time::sleep(self.config.startup_delay) => {}
            _ = shutdown.cancelled() => return Ok(()),
        }

        let open_orders = match self.exchange.get_open_orders(self.product_id).await {
            Ok(open_orders) => open_orders,
            Err(e) => {
                warn!(error = %e, "failed to fetch open orders at startup, proceeding anyway");
                Vec::new()
            }
        };
        if !open_orders.is_empty() {
            info!(count = open_orders.len(), "cancelling pre-existing open orders");
        }
        if let Err(e) = self.exchange.cancel_all(self.product_id).await {
            warn!(error = %e, "failed to cancel pre-existing open orders at startup");
        }

        let mut interval = tokio::time::interval(self.config.tick_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("market maker: shutdown requested, tearing down");
                    break;
                }
                Some(event) = maker_events.recv() => {
                    self.apply_maker_event(event).await;
                }
                _ = interval.tick() => {
                    self.tick().await?;
                }
            }
        }
        Ok(())
    }

    async fn apply_maker_event(&mut self, event: MakerEvent) {
        let quote = match event.side {
            Side::Bid => &mut self.bid,
            Side::Ask => &mut self.ask,
        };
        if quote.order_id.as_ref() != Some(&event.order_id) {
            return;
        }
        if event.status == "done" {
            quote.clear();
        } else {
            quote.status = Some(event.status.to_string());
        }
        self.sync_maker_orders().await;
    }

    async fn sync_maker_orders(&self) {
        let mut maker_orders = self.maker_orders.write().await;
        maker_orders.bid = self.bid.order_id.clone();
        maker_orders.ask = self.ask.order_id.clone();
    }

    /// One pass of the five-step quote-placement contract.
    async fn tick(&mut self) -> Result<(), MarketMakerError> {
        let (best_bid, best_ask) = {
            let book = self.book.read().await;
            (book.best_bid(), book.best_ask())
        };
        let (Some(best_bid), Some(best_ask)) = (best_bid, best_ask) else {
            debug!("book not yet populated, skipping tick");
            return Ok(());
        };

        // 1. Sanity.
        if best_ask - best_bid < Decimal::ZERO {
            warn!(%best_bid, %best_ask, "crossed book, skipping tick");
            return Ok(());
        }

        if self.config.display {
            print!(
                "\rMin ask: {best_ask:.2}, Max bid: {best_bid:.2}, Spread: {:.2}, Your ask: {}, Your bid: {}, Your spread: {}",
                best_ask - best_bid,
                self.ask.price.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
                self.bid.price.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
                match (self.ask.price, self.bid.price) {
                    (Some(a), Some(b)) => (a - b).to_string(),
                    _ => "-".to_string(),
                },
            );
            let _ = std::io::Write::flush(&mut std::io::stdout());
        }

        // 2. Place missing bid.
        if self.bid.order_id.is_none() {
            let target_price = best_ask - self.config.bid_spread - self.bid.rejections;
            let available_usd = self.balances.read().await.usd_available;
            if self.config.order_size * target_price <= available_usd {
                self.place_quote(Side::Bid, target_price).await;
                return Ok(());
            }
        }

        // 3. Place missing ask.
        if self.ask.order_id.is_none() {
            let target_price = best_bid + self.config.ask_spread + self.ask.rejections;
            let available_btc = self.balances.read().await.btc_available;
            if self.config.order_size <= available_btc {
                self.place_quote(Side::Ask, target_price).await;
                return Ok(());
            }
        }

        // 4. Cancel-if-stale bid.
        if let (Some(order_id), Some(my_bid)) = (self.bid.order_id.clone(), self.bid.price) {
            if !self.bid.cancelled {
                let too_far_out = my_bid < best_ask - self.config.bid_too_far_adjustment_spread;
                let too_close = my_bid > best_bid - self.config.bid_too_close_adjustment_spread;
                if too_far_out || too_close {
                    info!(%my_bid, %best_bid, %best_ask, too_far_out, too_close, "cancelling stale bid");
                    // A failed cancel leaves `cancelled` false so the next
                    // tick re-evaluates and retries (spec.md §5, §7).
                    match self.exchange.cancel_order(&order_id).await {
                        Ok(()) => self.bid.cancelled = true,
                        Err(e) => warn!(error = %e, "bid cancel request failed, retrying next tick"),
                    }
                    return Ok(());
                }
            }
        }

        // 5. Cancel-if-stale ask.
        if let (Some(order_id), Some(my_ask)) = (self.ask.order_id.clone(), self.ask.price) {
            if !self.ask.cancelled {
                let too_far_out = my_ask > best_bid + self.config.ask_too_far_adjustment_spread;
                let too_close = my_ask < best_ask - self.config.ask_too_close_adjustment_spread;
                if too_far_out || too_close {
                    info!(%my_ask, %best_bid, %best_ask, too_far_out, too_close, "cancelling stale ask");
                    match self.exchange.cancel_order(&order_id).await {
                        Ok(()) => self.ask.cancelled = true,
                        Err(e) => warn!(error = %e, "ask cancel request failed, retrying next tick"),
                    }
                    return Ok(());
                }
            }
        }

        Ok(())
    }

    /// Places one side's quote. A transport failure here is logged and
    /// leaves the slot empty — the next tick re-evaluates and retries
    /// (spec.md §5 "Cancellation/timeouts", §7 "Order placement — transport").
    async fn place_quote(&mut self, side: Side, target_price: Decimal) {
        let response = match self
            .exchange
            .place_order(self.product_id, side, target_price, self.config.order_size)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(?side, error = %e, "order placement request failed, retrying next tick");
                return;
            }
        };
        let rejection_penalty = self.config.rejection_penalty;
        let quote = match side {
            Side::Bid => &mut self.bid,
            Side::Ask => &mut self.ask,
        };
        apply_order_response(quote, target_price, response, side, rejection_penalty);
        self.sync_maker_orders().await;
    }
}

/// Reconciles an [`OrderResponse`] into an [`OutstandingQuote`] (spec.md §4.3
/// step 2/3's response-handling table).
fn apply_order_response(
    quote: &mut OutstandingQuote,
    target_price: Decimal,
    response: OrderResponse,
    side: Side,
    rejection_penalty: Decimal,
) {
    match (response.status, response.message.as_deref()) {
        (Some(OrderStatus::Pending), _) => {
            quote.order_id = response.id;
            quote.price = Some(target_price);
            quote.rejections = Decimal::ZERO;
            quote.cancelled = false;
            info!(?side, %target_price, "new quote placed");
        }
        (Some(OrderStatus::Rejected), _) => {
            quote.order_id = None;
            quote.price = None;
            quote.rejections += rejection_penalty;
            warn!(?side, %target_price, "quote rejected, widening");
        }
        (None, Some("Insufficient funds")) => {
            quote.order_id = None;
            quote.price = None;
            warn!(?side, "insufficient funds, not penalizing");
        }
        _ => {
            warn!(?side, message = ?response.message, "unhandled order response");
        }
    }
}

/// Polls account balances on a fixed interval (spec.md §4.3 "Balance refresh").
pub async fn run_balance_refresher(
    exchange: Arc<dyn ExchangeClient>,
    balances: Arc<RwLock<Balances>>,
    interval: std::time::Duration,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                match exchange.get_balances().await {
                    Ok(accounts) => {
                        let usd_available = accounts.get("USD").map(|b| b.available).unwrap_or_default();
                        let btc_available = accounts.get("BTC").map(|b| b.available).unwrap_or_default();
                        *balances.write().await = Balances { usd_available, btc_available };
                    }
                    Err(e) => warn!(error = %e, "balance refresh failed"),
                }
            }
        }
    }
}
