use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use market_maker_bot::cli::Cli;
use market_maker_bot::exchange::{ExchangeClient, RestExchangeClient};
use market_maker_bot::feed::{FeedConnection, FeedSynchronizer, FeedTransport};
use market_maker_bot::instrument::ProductId;
use market_maker_bot::market_maker::{run_balance_refresher, MarketMaker};
use market_maker_bot::state::AppState;
use market_maker_bot::utils::shutdown_token;
use market_maker_bot::errors::FeedError;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMsg;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

struct WebSocketConnection {
    stream: tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
}

#[async_trait::async_trait]
impl FeedConnection for WebSocketConnection {
    async fn recv(&mut self) -> Option<Result<String, FeedError>> {
        loop {
            match self.stream.next().await? {
                Ok(WsMsg::Text(text)) => return Some(Ok(text.to_string())),
                Ok(WsMsg::Close(_)) => return None,
                Ok(_) => continue,
                Err(e) => return Some(Err(FeedError::Connect(e.to_string()))),
            }
        }
    }
}

struct WebSocketTransport {
    ws_url: String,
}

#[async_trait::async_trait]
impl FeedTransport for WebSocketTransport {
    async fn connect(&self, product_id: ProductId) -> Result<Box<dyn FeedConnection>, FeedError> {
        let (mut stream, _response) = connect_async(&self.ws_url)
            .await
            .map_err(|e| FeedError::Connect(e.to_string()))?;
        let subscribe = serde_json::json!({
            "type": "subscribe",
            "product_id": product_id.code(),
        });
        stream
            .send(WsMsg::Text(subscribe.to_string().into()))
            .await
            .map_err(|e| FeedError::Connect(e.to_string()))?;
        Ok(Box::new(WebSocketConnection { stream }))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    let token = shutdown_token();

    let state = AppState::new();
    let http = reqwest::Client::new();
    let exchange: Arc<dyn ExchangeClient> = Arc::new(RestExchangeClient::new(http, cli.rest_base_url.clone()));
    let transport: Arc<dyn FeedTransport> = Arc::new(WebSocketTransport { ws_url: cli.ws_url.clone() });

    let (maker_tx, maker_rx) = mpsc::channel(256);

    let feed_sync = FeedSynchronizer::new(
        transport,
        exchange.clone(),
        ProductId::BTC_USD,
        cli.feed_config(),
        state.order_book.clone(),
        state.maker_orders.clone(),
        maker_tx,
    );

    let mut tasks = tokio::task::JoinSet::new();

    let feed_token = token.clone();
    tasks.spawn(async move {
        feed_sync.run(feed_token).await;
    });

    if cli.trading {
        let mm_config = cli.market_maker_config();
        let mm_token = token.clone();
        let mm_exchange = exchange.clone();
        let mm_book = state.order_book.clone();
        let mm_balances = state.balances.clone();
        let mm_maker_orders = state.maker_orders.clone();
        tasks.spawn(async move {
            let mut mm = MarketMaker::new(
                mm_exchange,
                ProductId::BTC_USD,
                mm_config,
                mm_book,
                mm_balances,
                mm_maker_orders,
            );
            if let Err(e) = mm.run(maker_rx, mm_token).await {
                tracing::error!(error = %e, "market maker exited");
            }
        });

        let balance_token = token.clone();
        let balance_exchange = exchange.clone();
        let balances = state.balances.clone();
        tasks.spawn(async move {
            run_balance_refresher(
                balance_exchange,
                balances,
                mm_config.balance_refresh_interval,
                balance_token,
            )
            .await;
        });
    } else {
        // Nobody drains the maker-event channel outside trading mode; drop
        // the receiver so the feed task's sends don't pile up.
        drop(maker_rx);
    }

    tasks.join_all().await;
    Ok(())
}
