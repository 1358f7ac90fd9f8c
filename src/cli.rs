//! Command-line surface (spec.md §1 treats argument parsing itself as an
//! external collaborator — only the shape of the flags is specified).
//!
//! The two booleans are independent, not a subcommand: you can run
//! display-only (just watch the book), trading-only (headless bot), both,
//! or neither (a no-op process, same as the venue's own bot).

use clap::Parser;
use rust_decimal::Decimal;
use std::time::Duration;

use crate::feed::FeedConfig;
use crate::market_maker::MarketMakerConfig;

#[derive(Parser, Debug, Clone)]
#[command(name = "market-maker-bot")]
#[command(version, about = "A BTC-USD order-book replica and market-making client")]
pub struct Cli {
    /// Print a live status line to stdout.
    #[arg(short = 'c', long = "command-line")]
    pub command_line: bool,

    /// Actually place and cancel orders against the exchange.
    #[arg(short = 't', long = "trade")]
    pub trading: bool,

    /// Base URL of the exchange's authenticated REST API.
    #[arg(long, default_value = "https://api.exchange.coinbase.com")]
    pub rest_base_url: String,

    /// URL of the exchange's streaming feed.
    #[arg(long, default_value = "wss://ws-feed.exchange.coinbase.com")]
    pub ws_url: String,

    #[arg(long, default_value = "0.03")]
    pub bid_spread: Decimal,

    #[arg(long, default_value = "0.03")]
    pub ask_spread: Decimal,

    #[arg(long, default_value = "0.50")]
    pub bid_too_far_adjustment_spread: Decimal,

    #[arg(long, default_value = "0.50")]
    pub bid_too_close_adjustment_spread: Decimal,

    #[arg(long, default_value = "0.50")]
    pub ask_too_far_adjustment_spread: Decimal,

    #[arg(long, default_value = "0.50")]
    pub ask_too_close_adjustment_spread: Decimal,

    /// Size (in BTC) posted on each side, per tick.
    #[arg(long, default_value = "0.01")]
    pub order_size: Decimal,

    /// Additive offset added to a side's target price after a post-only rejection.
    #[arg(long, default_value = "0.04")]
    pub rejection_penalty: Decimal,

    /// How often the market maker re-evaluates its quotes, in milliseconds.
    #[arg(long, default_value_t = 5)]
    pub tick_interval_ms: u64,

    /// How often account balances are refreshed from the exchange, in seconds.
    #[arg(long, default_value_t = 30)]
    pub balance_refresh_secs: u64,

    /// Delay before the market maker starts quoting, giving the feed time to
    /// replicate the book, in seconds.
    #[arg(long, default_value_t = 10)]
    pub startup_delay_secs: u64,
}

impl Cli {
    pub fn market_maker_config(&self) -> MarketMakerConfig {
        MarketMakerConfig {
            bid_spread: self.bid_spread,
            ask_spread: self.ask_spread,
            bid_too_far_adjustment_spread: self.bid_too_far_adjustment_spread,
            bid_too_close_adjustment_spread: self.bid_too_close_adjustment_spread,
            ask_too_far_adjustment_spread: self.ask_too_far_adjustment_spread,
            ask_too_close_adjustment_spread: self.ask_too_close_adjustment_spread,
            order_size: self.order_size,
            rejection_penalty: self.rejection_penalty,
            tick_interval: Duration::from_millis(self.tick_interval_ms),
            balance_refresh_interval: Duration::from_secs(self.balance_refresh_secs),
            startup_delay: Duration::from_secs(self.startup_delay_secs),
            display: self.command_line,
        }
    }

    pub fn feed_config(&self) -> FeedConfig {
        FeedConfig {
            buffer_size: 20,
            stale_timeout: Duration::from_secs(30),
            display: self.command_line && !self.trading,
        }
    }
}
