//! The replicated limit order book (spec.md §3, §4.1).
//!
//! [`OrderBook`] mirrors the venue's L3 book: it is populated once from a
//! REST snapshot and from then on only ever advances by applying
//! sequence-ordered [`FeedEvent`]s. It never originates orders itself —
//! that's [`crate::market_maker`]'s job, routed back through the same feed.

use crate::errors::BookError;
use crate::instrument::ProductId;
use crate::orders::{Order, OrderId, Side};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::{debug, warn};

/// One (order_id, price, size) triple as carried by the snapshot's bid/ask lists.
#[derive(Debug, Clone)]
pub struct SnapshotOrder {
    pub order_id: OrderId,
    pub price: Decimal,
    pub size: Decimal,
}

/// An L3 snapshot of the book at `sequence`, as fetched over REST.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub sequence: u64,
    pub bids: Vec<SnapshotOrder>,
    pub asks: Vec<SnapshotOrder>,
}

/// One feed event, tagged by `type` on the wire (spec.md §6).
///
/// `received` events carry no book-mutating fields beyond the common header —
/// they still occupy a sequence number and must pass sequence discipline,
/// they just never touch `bids`/`asks`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedEvent {
    Received(ReceivedEvent),
    Open(OpenEvent),
    Done(DoneEvent),
    Match(MatchEvent),
    Change(ChangeEvent),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReceivedEvent {
    pub sequence: u64,
    pub time: DateTime<Utc>,
    pub product_id: ProductId,
    pub order_id: OrderId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenEvent {
    pub sequence: u64,
    pub time: DateTime<Utc>,
    pub product_id: ProductId,
    pub order_id: OrderId,
    pub side: Side,
    /// Absent for a market order that partially rested then was cancelled
    /// before this `open` could settle — such events never rest and are
    /// ignored (spec.md §4.1).
    pub price: Option<Decimal>,
    pub remaining_size: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DoneEvent {
    pub sequence: u64,
    pub time: DateTime<Utc>,
    pub product_id: ProductId,
    pub order_id: OrderId,
    pub side: Side,
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatchEvent {
    pub sequence: u64,
    pub time: DateTime<Utc>,
    pub product_id: ProductId,
    pub maker_order_id: OrderId,
    pub taker_order_id: OrderId,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangeEvent {
    pub sequence: u64,
    pub time: DateTime<Utc>,
    pub product_id: ProductId,
    pub order_id: OrderId,
    pub side: Side,
    pub new_size: Decimal,
}

impl FeedEvent {
    pub fn sequence(&self) -> u64 {
        match self {
            FeedEvent::Received(e) => e.sequence,
            FeedEvent::Open(e) => e.sequence,
            FeedEvent::Done(e) => e.sequence,
            FeedEvent::Match(e) => e.sequence,
            FeedEvent::Change(e) => e.sequence,
        }
    }

    pub fn time(&self) -> DateTime<Utc> {
        match self {
            FeedEvent::Received(e) => e.time,
            FeedEvent::Open(e) => e.time,
            FeedEvent::Done(e) => e.time,
            FeedEvent::Match(e) => e.time,
            FeedEvent::Change(e) => e.time,
        }
    }

    /// The order_id a maker-order-status update should be routed on, if any
    /// (spec.md §4.2 "routing side-effect"). `match` routes on the maker leg,
    /// never the taker leg — the taker never rests, so it can never be one
    /// of the market-maker's own outstanding quotes.
    pub fn routable_order_id(&self) -> Option<&OrderId> {
        match self {
            FeedEvent::Received(e) => Some(&e.order_id),
            FeedEvent::Open(e) => Some(&e.order_id),
            FeedEvent::Done(e) => Some(&e.order_id),
            FeedEvent::Match(e) => Some(&e.maker_order_id),
            FeedEvent::Change(e) => Some(&e.order_id),
        }
    }

    /// The event-type name, used verbatim as the `status` recorded in an
    /// `OutstandingQuote` (spec.md §4.3).
    pub fn type_name(&self) -> &'static str {
        match self {
            FeedEvent::Received(_) => "received",
            FeedEvent::Open(_) => "open",
            FeedEvent::Done(_) => "done",
            FeedEvent::Match(_) => "match",
            FeedEvent::Change(_) => "change",
        }
    }
}

type BookSide = BTreeMap<Decimal, VecDeque<Order>>;

/// The replicated order book: price-indexed bid/ask trees plus an order-id
/// index for O(log n) lookup during updates (spec.md §3).
pub struct OrderBook {
    pub bids: BookSide,
    pub asks: BookSide,
    index: HashMap<OrderId, (Side, Decimal)>,
    initialized: bool,
    pub last_sequence: u64,
    pub last_event_time: Option<DateTime<Utc>>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self {
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            index: HashMap::new(),
            initialized: false,
            last_sequence: 0,
            last_event_time: None,
        }
    }

    fn side_map(&mut self, side: Side) -> &mut BookSide {
        match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        }
    }

    /// Populate the book from a REST snapshot at `snapshot.sequence`.
    ///
    /// Fails if the book was already initialized — a book is a one-shot
    /// replica; [`crate::feed::FeedSynchronizer`] builds a fresh one on every
    /// reconnect instead of re-snapshotting in place.
    pub fn ingest_snapshot(&mut self, snapshot: Snapshot) -> Result<(), BookError> {
        if self.initialized {
            return Err(BookError::AlreadyInitialized);
        }
        for level in snapshot.bids {
            self.insert_resting(Side::Bid, level.order_id, level.price, level.size);
        }
        for level in snapshot.asks {
            self.insert_resting(Side::Ask, level.order_id, level.price, level.size);
        }
        self.last_sequence = snapshot.sequence;
        self.initialized = true;
        Ok(())
    }

    fn insert_resting(&mut self, side: Side, order_id: OrderId, price: Decimal, size: Decimal) {
        if size <= Decimal::ZERO {
            return;
        }
        self.index.insert(order_id.clone(), (side, price));
        self.side_map(side)
            .entry(price)
            .or_default()
            .push_back(Order {
                order_id,
                side,
                price,
                remaining_size: size,
            });
    }

    /// Remove the order from its level's FIFO queue by id, pruning the level
    /// if it becomes empty (spec.md §3 PriceLevel invariant). Returns the
    /// removed order, if it was present.
    fn remove_indexed(&mut self, order_id: &OrderId) -> Option<Order> {
        let (side, price) = self.index.remove(order_id)?;
        let level = self.side_map(side).get_mut(&price)?;
        let pos = level.iter().position(|o| &o.order_id == order_id)?;
        let order = level.remove(pos);
        if level.is_empty() {
            self.side_map(side).remove(&price);
        }
        order
    }

    /// Apply one sequence-ordered feed event.
    ///
    /// Returns `true` if the event was applied (including a no-op drop of a
    /// stale/duplicate sequence number); returns `false` only on a sequence
    /// gap, which poisons the replica — the caller must discard this book
    /// and resynchronize from scratch (spec.md §4.1, §4.2).
    pub fn process_event(&mut self, event: &FeedEvent) -> bool {
        let seq = event.sequence();
        if seq <= self.last_sequence {
            debug!(seq, last_sequence = self.last_sequence, "dropping stale/duplicate event");
            return true;
        }
        if seq > self.last_sequence + 1 {
            warn!(
                seq,
                last_sequence = self.last_sequence,
                "sequence gap detected, book poisoned"
            );
            return false;
        }

        match event {
            FeedEvent::Received(_) => {}
            FeedEvent::Open(e) => self.apply_open(e),
            FeedEvent::Done(e) => self.apply_done(e),
            FeedEvent::Match(e) => self.apply_match(e),
            FeedEvent::Change(e) => self.apply_change(e),
        }

        self.last_sequence = seq;
        self.last_event_time = Some(event.time());
        true
    }

    fn apply_open(&mut self, e: &OpenEvent) {
        let (Some(price), Some(remaining_size)) = (e.price, e.remaining_size) else {
            debug!(order_id = %e.order_id, "open event with no resting price/size, ignoring");
            return;
        };
        self.insert_resting(e.side, e.order_id.clone(), price, remaining_size);
    }

    fn apply_done(&mut self, e: &DoneEvent) {
        match e.reason.as_str() {
            "filled" | "canceled" => {
                if self.remove_indexed(&e.order_id).is_none() {
                    debug!(order_id = %e.order_id, "done for unknown order_id, tolerated");
                }
            }
            other => {
                warn!(order_id = %e.order_id, reason = other, "unhandled done reason");
            }
        }
    }

    fn apply_match(&mut self, e: &MatchEvent) {
        let Some(&(side, price)) = self.index.get(&e.maker_order_id) else {
            debug!(order_id = %e.maker_order_id, "match against unknown maker order_id, tolerated");
            return;
        };
        let Some(level) = self.side_map(side).get_mut(&price) else {
            return;
        };
        let Some(order) = level.iter_mut().find(|o| o.order_id == e.maker_order_id) else {
            return;
        };
        // Clamp rather than underflow (spec.md §8 boundary #9).
        order.remaining_size = (order.remaining_size - e.size).max(Decimal::ZERO);
        if order.remaining_size.is_zero() {
            self.remove_indexed(&e.maker_order_id);
        }
    }

    fn apply_change(&mut self, e: &ChangeEvent) {
        let Some(&(side, price)) = self.index.get(&e.order_id) else {
            debug!(order_id = %e.order_id, "change for unknown order_id, tolerated");
            return;
        };
        let Some(level) = self.side_map(side).get_mut(&price) else {
            return;
        };
        if let Some(order) = level.iter_mut().find(|o| o.order_id == e.order_id) {
            order.remaining_size = e.new_size;
        }
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.keys().next_back().copied()
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.keys().next().copied()
    }

    pub fn lookup(&self, order_id: &OrderId) -> Option<(Side, Decimal)> {
        self.index.get(order_id).copied()
    }
}

impl Default for OrderBook {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn oid(s: &str) -> OrderId {
        OrderId(s.to_string())
    }

    fn snapshot(sequence: u64, bids: &[(&str, &str, &str)], asks: &[(&str, &str, &str)]) -> Snapshot {
        let conv = |rows: &[(&str, &str, &str)]| {
            rows.iter()
                .map(|(id, price, size)| SnapshotOrder {
                    order_id: oid(id),
                    price: price.parse().unwrap(),
                    size: size.parse().unwrap(),
                })
                .collect()
        };
        Snapshot {
            sequence,
            bids: conv(bids),
            asks: conv(asks),
        }
    }

    fn open(seq: u64, id: &str, side: Side, price: &str, size: &str) -> FeedEvent {
        FeedEvent::Open(OpenEvent {
            sequence: seq,
            time: Utc::now(),
            product_id: ProductId::BTC_USD,
            order_id: oid(id),
            side,
            price: Some(price.parse().unwrap()),
            remaining_size: Some(size.parse().unwrap()),
        })
    }

    fn done(seq: u64, id: &str, side: Side, reason: &str) -> FeedEvent {
        FeedEvent::Done(DoneEvent {
            sequence: seq,
            time: Utc::now(),
            product_id: ProductId::BTC_USD,
            order_id: oid(id),
            side,
            reason: reason.to_string(),
        })
    }

    fn matched(seq: u64, maker: &str, taker: &str, side: Side, price: &str, size: &str) -> FeedEvent {
        FeedEvent::Match(MatchEvent {
            sequence: seq,
            time: Utc::now(),
            product_id: ProductId::BTC_USD,
            maker_order_id: oid(maker),
            taker_order_id: oid(taker),
            side,
            price: price.parse().unwrap(),
            size: size.parse().unwrap(),
        })
    }

    /// S1: snapshot + buffered replay.
    #[test]
    fn s1_snapshot_and_replay() {
        let mut book = OrderBook::new();
        book.ingest_snapshot(snapshot(
            100,
            &[("A", "100.00", "1")],
            &[("B", "101.00", "1")],
        ))
        .unwrap();

        // seq 98 would have been discarded upstream by the synchronizer;
        // the book itself drops it too since it's <= last_sequence.
        let stale = open(98, "Z", Side::Bid, "1.00", "1");
        assert!(book.process_event(&stale));
        assert_eq!(book.last_sequence, 100);

        assert!(book.process_event(&open(101, "C", Side::Bid, "100.50", "2")));
        assert!(book.process_event(&done(102, "A", Side::Bid, "filled")));

        assert_eq!(book.last_sequence, 102);
        assert_eq!(book.best_bid(), Some(dec!(100.50)));
        assert_eq!(book.best_ask(), Some(dec!(101.00)));
        assert!(!book.bids.contains_key(&dec!(100.00)));
        assert_eq!(book.bids[&dec!(100.50)][0].remaining_size, dec!(2));
    }

    /// S2: sequence gap poisons the book.
    #[test]
    fn s2_sequence_gap_poisons_book() {
        let mut book = OrderBook::new();
        book.ingest_snapshot(snapshot(200, &[], &[])).unwrap();
        let gap = open(202, "X", Side::Bid, "1", "1");
        assert!(!book.process_event(&gap));
        // last_sequence must not have advanced past the gap.
        assert_eq!(book.last_sequence, 200);
    }

    /// S3 / boundary #9: match driving remaining_size to (or past) zero removes the order.
    #[test]
    fn s3_match_to_zero_removes_order() {
        let mut book = OrderBook::new();
        book.ingest_snapshot(snapshot(1, &[("X", "100", "0.5")], &[])).unwrap();
        assert!(book.process_event(&matched(2, "X", "taker", Side::Bid, "100", "0.5")));
        assert!(!book.bids.contains_key(&dec!(100)));
        assert_eq!(book.lookup(&oid("X")), None);
    }

    /// Boundary #9: an oversized match clamps to zero instead of underflowing.
    #[test]
    fn match_overfill_clamps_to_zero() {
        let mut book = OrderBook::new();
        book.ingest_snapshot(snapshot(1, &[("X", "100", "0.5")], &[])).unwrap();
        assert!(book.process_event(&matched(2, "X", "taker", Side::Bid, "100", "10")));
        assert!(!book.bids.contains_key(&dec!(100)));
    }

    /// Idempotence #6: re-applying a done for an already-removed order is a no-op.
    #[test]
    fn done_twice_is_tolerated() {
        let mut book = OrderBook::new();
        book.ingest_snapshot(snapshot(1, &[("X", "100", "1")], &[])).unwrap();
        assert!(book.process_event(&done(2, "X", Side::Bid, "canceled")));
        // Re-delivering the same done at a later sequence is just another
        // "unknown order_id" done, tolerated rather than fatal.
        assert!(book.process_event(&done(3, "X", Side::Bid, "canceled")));
        assert!(book.bids.is_empty());
    }

    /// Equivalence #7: snapshot+replay equals snapshotting at the final sequence directly.
    #[test]
    fn s7_replay_equivalence() {
        let mut via_replay = OrderBook::new();
        via_replay.ingest_snapshot(snapshot(1, &[("A", "100", "1")], &[])).unwrap();
        via_replay.process_event(&open(2, "B", Side::Bid, "100", "2"));
        via_replay.process_event(&done(3, "A", Side::Bid, "filled"));

        let mut direct = OrderBook::new();
        direct
            .ingest_snapshot(snapshot(3, &[("B", "100", "2")], &[]))
            .unwrap();

        assert_eq!(via_replay.best_bid(), direct.best_bid());
        assert_eq!(via_replay.last_sequence, direct.last_sequence);
        assert_eq!(
            via_replay.bids[&dec!(100)].len(),
            direct.bids[&dec!(100)].len()
        );
    }

    #[test]
    fn open_without_price_is_ignored() {
        let mut book = OrderBook::new();
        book.ingest_snapshot(snapshot(1, &[], &[])).unwrap();
        let market_order_open = FeedEvent::Open(OpenEvent {
            sequence: 2,
            time: Utc::now(),
            product_id: ProductId::BTC_USD,
            order_id: oid("M"),
            side: Side::Bid,
            price: None,
            remaining_size: None,
        });
        assert!(book.process_event(&market_order_open));
        assert!(book.bids.is_empty());
        assert_eq!(book.lookup(&oid("M")), None);
    }

    #[test]
    fn change_overwrites_remaining_size() {
        let mut book = OrderBook::new();
        book.ingest_snapshot(snapshot(1, &[("X", "100", "5")], &[])).unwrap();
        let chg = FeedEvent::Change(ChangeEvent {
            sequence: 2,
            time: Utc::now(),
            product_id: ProductId::BTC_USD,
            order_id: oid("X"),
            side: Side::Bid,
            new_size: dec!(2),
        });
        assert!(book.process_event(&chg));
        assert_eq!(book.bids[&dec!(100)][0].remaining_size, dec!(2));
    }

    #[test]
    fn ingest_snapshot_twice_fails() {
        let mut book = OrderBook::new();
        book.ingest_snapshot(snapshot(1, &[], &[])).unwrap();
        assert!(matches!(
            book.ingest_snapshot(snapshot(2, &[], &[])),
            Err(BookError::AlreadyInitialized)
        ));
    }

    #[test]
    fn fifo_order_preserved_within_a_level() {
        let mut book = OrderBook::new();
        book.ingest_snapshot(snapshot(1, &[], &[])).unwrap();
        book.process_event(&open(2, "first", Side::Bid, "100", "1"));
        book.process_event(&open(3, "second", Side::Bid, "100", "1"));
        let level = &book.bids[&dec!(100)];
        assert_eq!(level[0].order_id, oid("first"));
        assert_eq!(level[1].order_id, oid("second"));
    }
}
