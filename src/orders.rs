use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque exchange-assigned order identifier (a UUID string on Coinbase).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub String);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for OrderId {
    fn from(s: String) -> Self {
        OrderId(s)
    }
}

/// Which side of the book an order rests on.
///
/// The wire protocol (feed events and the orders REST body) spells this
/// `"buy"`/`"sell"`; the book talks about `Bid`/`Ask` — same two values, the
/// book's naming matches the rest of the spec's vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Bid,
    Ask,
}

impl Serialize for Side {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Side::Bid => serializer.serialize_str("buy"),
            Side::Ask => serializer.serialize_str("sell"),
        }
    }
}

impl<'de> Deserialize<'de> for Side {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            "buy" => Ok(Side::Bid),
            "sell" => Ok(Side::Ask),
            other => Err(serde::de::Error::custom(format!(
                "unsupported side `{other}`"
            ))),
        }
    }
}

/// A resting order in the replicated book.
///
/// Invariant: `remaining_size > 0` while the order is present anywhere in
/// [`crate::orderbook::OrderBook`] — a `match` or `change` event that would
/// drive it to zero removes the order instead of leaving a zero-size husk.
#[derive(Debug, Clone)]
pub struct Order {
    pub order_id: OrderId,
    pub side: Side,
    pub price: Decimal,
    pub remaining_size: Decimal,
}
