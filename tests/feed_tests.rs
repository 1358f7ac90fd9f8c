use async_trait::async_trait;
use market_maker_bot::errors::{ExchangeError, FeedError};
use market_maker_bot::exchange::{Balance, ExchangeClient, OpenOrder, OrderResponse};
use market_maker_bot::feed::{FeedConfig, FeedConnection, FeedSynchronizer, FeedTransport};
use market_maker_bot::instrument::ProductId;
use market_maker_bot::market_maker::MakerOrderIds;
use market_maker_bot::orderbook::{OrderBook, Snapshot, SnapshotOrder};
use market_maker_bot::orders::{OrderId, Side};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

struct ScriptedConnection {
    frames: std::sync::Mutex<Vec<String>>,
}

#[async_trait]
impl FeedConnection for ScriptedConnection {
    async fn recv(&mut self) -> Option<Result<String, FeedError>> {
        let mut frames = self.frames.lock().unwrap();
        if frames.is_empty() {
            None
        } else {
            Some(Ok(frames.remove(0)))
        }
    }
}

struct ScriptedTransport {
    frames: Vec<String>,
}

#[async_trait]
impl FeedTransport for ScriptedTransport {
    async fn connect(&self, _product_id: ProductId) -> Result<Box<dyn FeedConnection>, FeedError> {
        Ok(Box::new(ScriptedConnection {
            frames: std::sync::Mutex::new(self.frames.clone()),
        }))
    }
}

struct FakeExchange;

#[async_trait]
impl ExchangeClient for FakeExchange {
    async fn fetch_snapshot(&self, _product_id: ProductId) -> Result<Snapshot, ExchangeError> {
        Ok(Snapshot {
            sequence: 100,
            bids: vec![SnapshotOrder { order_id: OrderId("resting-bid".into()), price: dec!(100.00), size: dec!(1) }],
            asks: vec![SnapshotOrder { order_id: OrderId("resting-ask".into()), price: dec!(101.00), size: dec!(1) }],
        })
    }

    async fn place_order(
        &self,
        _product_id: ProductId,
        _side: Side,
        _price: Decimal,
        _size: Decimal,
    ) -> Result<OrderResponse, ExchangeError> {
        unimplemented!()
    }

    async fn cancel_order(&self, _order_id: &OrderId) -> Result<(), ExchangeError> {
        Ok(())
    }

    async fn cancel_all(&self, _product_id: ProductId) -> Result<(), ExchangeError> {
        Ok(())
    }

    async fn get_open_orders(&self, _product_id: ProductId) -> Result<Vec<OpenOrder>, ExchangeError> {
        Ok(vec![])
    }

    async fn get_balances(&self) -> Result<HashMap<String, Balance>, ExchangeError> {
        Ok(HashMap::new())
    }
}

fn filler_frames(count: usize) -> Vec<String> {
    (0..count).map(|i| format!(r#"{{"type":"heartbeat","sequence":{i}}}"#)).collect()
}

/// End-to-end routing: a feed event on the maker's own resting order reaches
/// MarketMaker's event channel with the right side and status — the single
/// authoritative path for maker order-status updates.
#[tokio::test]
async fn feed_routes_lifecycle_event_for_known_maker_order() {
    let mut frames = filler_frames(25);
    frames.push(
        r#"{"type":"done","sequence":101,"time":"2024-01-01T00:00:00Z","product_id":"BTC-USD","order_id":"resting-bid","side":"buy","reason":"filled"}"#
            .to_string(),
    );

    let transport = Arc::new(ScriptedTransport { frames });
    let exchange = Arc::new(FakeExchange);
    let book = Arc::new(RwLock::new(OrderBook::new()));
    let maker_orders = Arc::new(RwLock::new(MakerOrderIds {
        bid: Some(OrderId("resting-bid".into())),
        ask: None,
    }));
    let (tx, mut rx) = mpsc::channel(16);

    let sync = FeedSynchronizer::new(
        transport,
        exchange,
        ProductId::BTC_USD,
        FeedConfig { buffer_size: 20, stale_timeout: std::time::Duration::from_secs(5), display: false },
        book.clone(),
        maker_orders,
        tx,
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(async move {
        sync.run(shutdown).await;
    });

    let event = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
        .await
        .expect("maker event should arrive")
        .expect("channel should not be closed");

    assert_eq!(event.side, Side::Bid);
    assert_eq!(event.order_id, OrderId("resting-bid".into()));
    assert_eq!(event.status, "done");

    // The done event also removed the order from the replicated book.
    let book = book.read().await;
    assert_eq!(book.lookup(&OrderId("resting-bid".into())), None);
}
