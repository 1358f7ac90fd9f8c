use thiserror::Error;

/// Errors surfaced while mutating or querying the replicated [`crate::orderbook::OrderBook`].
#[derive(Error, Debug)]
pub enum BookError {
    #[error("order book already initialized from a snapshot")]
    AlreadyInitialized,
}

/// Errors surfaced by [`crate::feed::FeedSynchronizer`].
///
/// Every variant here is a *transient* condition the supervisor loop in
/// `main.rs` retries past with backoff — nothing in this enum aborts the
/// process on its own.
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("websocket connect failed: {0}")]
    Connect(String),

    #[error("websocket closed by peer")]
    ClosedByPeer,

    #[error("no messages received for {0:?}, feed considered stale")]
    Stale(std::time::Duration),

    #[error("snapshot request failed: {0}")]
    Snapshot(#[from] ExchangeError),

    #[error("malformed feed message: {0}")]
    Parse(String),

    #[error("sequence gap detected: book poisoned, restarting synchronization")]
    SequenceGap,
}

/// Errors surfaced by [`crate::exchange::ExchangeClient`] calls.
#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected response shape: {0}")]
    UnexpectedResponse(String),
}

/// Errors surfaced by [`crate::market_maker`]'s control loop.
#[derive(Error, Debug)]
pub enum MarketMakerError {
    #[error("exchange request failed: {0}")]
    Exchange(#[from] ExchangeError),
}
