//! Shared state wiring between the three long-lived tasks (spec.md §5).
//!
//! `order_book` is single-writer (FeedSynchronizer) / multiple-reader
//! (MarketMaker); `balances` is written only by the balance refresher;
//! `maker_orders` is the small read-mirror FeedSynchronizer checks incoming
//! events against, kept current by MarketMaker on every place/cancel/clear.

use crate::market_maker::{Balances, MakerOrderIds};
use crate::orderbook::OrderBook;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct AppState {
    pub order_book: Arc<RwLock<OrderBook>>,
    pub balances: Arc<RwLock<Balances>>,
    pub maker_orders: Arc<RwLock<MakerOrderIds>>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            order_book: Arc::new(RwLock::new(OrderBook::new())),
            balances: Arc::new(RwLock::new(Balances::default())),
            maker_orders: Arc::new(RwLock::new(MakerOrderIds::default())),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        AppState::new()
    }
}
