//! The REST surface of the venue, as consumed by [`crate::feed`] and
//! [`crate::market_maker`] (spec.md §5).
//!
//! Transport and request signing are deliberately out of scope (spec.md §1)
//! — [`RestExchangeClient`] wraps a pre-configured [`reqwest::Client`] and
//! assumes authentication headers are already attached by that client (or by
//! a middleware layer around it). What's specified here is the shape of the
//! requests/responses and the trait seam tests substitute a fake behind.

use crate::errors::ExchangeError;
use crate::instrument::ProductId;
use crate::orderbook::{Snapshot, SnapshotOrder};
use crate::orders::{OrderId, Side};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// `available`/`hold`/`balance` for one currency (spec.md §5 "Balances").
#[derive(Debug, Clone, Deserialize)]
pub struct Balance {
    pub available: Decimal,
    pub hold: Decimal,
    pub balance: Decimal,
}

/// One of the trader's own resting orders, as returned by the open-orders endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenOrder {
    pub id: OrderId,
    pub side: Side,
    pub price: Decimal,
}

#[derive(Debug, Clone, Serialize)]
struct NewOrderRequest {
    size: Decimal,
    price: Decimal,
    side: Side,
    product_id: ProductId,
    post_only: bool,
}

/// The exchange's response to a new-order POST (spec.md §5 "Orders").
///
/// `status` and `message` are both optional because the venue uses one or
/// the other, never both — a successful placement carries `status`, a
/// hard rejection (e.g. insufficient funds) carries only `message`.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderResponse {
    pub id: Option<OrderId>,
    pub status: Option<OrderStatus>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Rejected,
}

#[derive(Debug, Deserialize)]
struct SnapshotWire {
    sequence: u64,
    bids: Vec<(Decimal, Decimal, String)>,
    asks: Vec<(Decimal, Decimal, String)>,
}

impl From<SnapshotWire> for Snapshot {
    fn from(wire: SnapshotWire) -> Self {
        let convert = |rows: Vec<(Decimal, Decimal, String)>| {
            rows.into_iter()
                .map(|(price, size, order_id)| SnapshotOrder {
                    order_id: OrderId(order_id),
                    price,
                    size,
                })
                .collect()
        };
        Snapshot {
            sequence: wire.sequence,
            bids: convert(wire.bids),
            asks: convert(wire.asks),
        }
    }
}

/// The venue operations the market maker and feed synchronizer depend on.
///
/// Object-safe so tests can inject a fake without threading a generic
/// parameter through every caller.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn fetch_snapshot(&self, product_id: ProductId) -> Result<Snapshot, ExchangeError>;

    async fn place_order(
        &self,
        product_id: ProductId,
        side: Side,
        price: Decimal,
        size: Decimal,
    ) -> Result<OrderResponse, ExchangeError>;

    async fn cancel_order(&self, order_id: &OrderId) -> Result<(), ExchangeError>;

    async fn cancel_all(&self, product_id: ProductId) -> Result<(), ExchangeError>;

    async fn get_open_orders(&self, product_id: ProductId) -> Result<Vec<OpenOrder>, ExchangeError>;

    async fn get_balances(&self) -> Result<HashMap<String, Balance>, ExchangeError>;
}

const REST_TIMEOUT: Duration = Duration::from_secs(5);

/// Talks to the venue's authenticated REST API over a pre-built [`reqwest::Client`].
pub struct RestExchangeClient {
    http: reqwest::Client,
    base_url: String,
}

impl RestExchangeClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl ExchangeClient for RestExchangeClient {
    async fn fetch_snapshot(&self, product_id: ProductId) -> Result<Snapshot, ExchangeError> {
        let wire: SnapshotWire = self
            .http
            .get(self.url(&format!("products/{}/book", product_id)))
            .query(&[("level", "3")])
            .timeout(REST_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(wire.into())
    }

    async fn place_order(
        &self,
        product_id: ProductId,
        side: Side,
        price: Decimal,
        size: Decimal,
    ) -> Result<OrderResponse, ExchangeError> {
        let body = NewOrderRequest {
            size,
            price,
            side,
            product_id,
            post_only: true,
        };
        let response = self
            .http
            .post(self.url("orders"))
            .json(&body)
            .timeout(REST_TIMEOUT)
            .send()
            .await?
            .json()
            .await?;
        Ok(response)
    }

    async fn cancel_order(&self, order_id: &OrderId) -> Result<(), ExchangeError> {
        self.http
            .delete(self.url(&format!("orders/{order_id}")))
            .timeout(REST_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn cancel_all(&self, product_id: ProductId) -> Result<(), ExchangeError> {
        self.http
            .delete(self.url("orders"))
            .query(&[("product_id", product_id.code())])
            .timeout(REST_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn get_open_orders(&self, product_id: ProductId) -> Result<Vec<OpenOrder>, ExchangeError> {
        let orders = self
            .http
            .get(self.url("orders"))
            .query(&[("product_id", product_id.code()), ("status", "open")])
            .timeout(REST_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(orders)
    }

    async fn get_balances(&self) -> Result<HashMap<String, Balance>, ExchangeError> {
        let accounts = self
            .http
            .get(self.url("accounts"))
            .timeout(REST_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(accounts)
    }
}
