//! Market Stream Engine Binary
//!
//! Connects to one venue stream and logs the typed events it produces.
//!
//! # Usage
//!
//! ```bash
//! STREAM_VENUE=binance STREAM_SYMBOLS=btcusdt cargo run --bin market-stream-engine
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `STREAM_VENUE`: binance | bybit | upbit
//! - `STREAM_SYMBOLS`: Comma-separated symbols (public streams)
//!
//! ## Optional
//! - `STREAM_KIND`: public | private (default: public; private is Bybit only)
//! - `STREAM_CHANNELS`: orderbook,trades,ticker (default: orderbook,trades)
//! - `STREAM_URL`: Endpoint override
//! - `STREAM_API_KEY` / `STREAM_API_SECRET`: Private stream credentials
//! - `STREAM_QUEUE_CAPACITY`: Processing queue size (default: 1000)
//! - `STREAM_HEARTBEAT_INTERVAL_SECS`: Keepalive override
//! - `STREAM_CONNECT_TIMEOUT_SECS` / `STREAM_AUTH_TIMEOUT_SECS` (default: 10)
//! - `STREAM_RECONNECT_DELAY_INITIAL_MS`, `STREAM_RECONNECT_DELAY_MAX_SECS`,
//!   `STREAM_RECONNECT_MULTIPLIER`, `STREAM_MAX_RECONNECT_ATTEMPTS`
//! - `STREAM_METRICS_PORT`: Prometheus port (default: 0 = disabled)
//! - `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`
//! - `RUST_LOG`: Log level (default: info)

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use market_stream_engine::application::ports::{
    AuthPolicy, ConnectionPolicy, MessageClassifier, PrivateParser, PublicParser,
};
use market_stream_engine::application::services::{
    AuthSignal, MessageHandler, PrivateMessageHandler, PublicMessageHandler,
};
use market_stream_engine::infrastructure::telemetry;
use market_stream_engine::infrastructure::venues::{
    BinanceClassifier, BinanceParser, BinancePolicy, BybitClassifier, BybitPolicy,
    BybitPrivateParser, BybitPublicParser, StreamRequest, SubscribeRequest, TopicRequest,
    UpbitClassifier, UpbitParser, UpbitPolicy, binance, bybit, upbit,
};
use market_stream_engine::{
    Channel, ConnectionEngine, ConnectionState, EngineSettings, NoAuth, SignedAuth, StreamKind,
    Venue, init_metrics,
};
use tokio::signal;

/// Depth requested from Bybit orderbook topics.
const BYBIT_BOOK_DEPTH: u16 = 50;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        anyhow::bail!("failed to install rustls crypto provider");
    }

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Market Stream Engine");

    let settings = EngineSettings::from_env().context("invalid configuration")?;
    log_config(&settings);

    if settings.metrics_port > 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], settings.metrics_port));
        let bound = init_metrics(addr).context("failed to start metrics exporter")?;
        tracing::info!(addr = %bound, "Prometheus metrics listening");
    }

    match (settings.venue, settings.kind) {
        (Venue::Binance, StreamKind::Public) => {
            let url = settings.url.clone().unwrap_or_else(|| binance::PUBLIC_URL.to_string());
            let policy = BinancePolicy::new(url, settings.reconnection_policy());
            let handler = public_handler(BinanceClassifier, BinanceParser);
            let request = StreamRequest::subscribe(1);
            let request = with_channels(&settings, request, |r, channel, symbols| match channel {
                Channel::Orderbook => r.with_depth(symbols),
                Channel::Trades => r.with_trades(symbols),
                Channel::Ticker => r.with_book_ticker(symbols),
            });
            run(&settings, Arc::new(policy), Arc::new(NoAuth), handler, vec![request.to_json()?]).await
        }
        (Venue::Bybit, StreamKind::Public) => {
            let url = settings
                .url
                .clone()
                .unwrap_or_else(|| bybit::PUBLIC_SPOT_URL.to_string());
            let mut policy = BybitPolicy::new(url, settings.reconnection_policy());
            if let Some(interval) = settings.websocket.heartbeat_interval {
                policy = policy.with_heartbeat(interval, bybit::PING_TIMEOUT);
            }
            let handler = public_handler(BybitClassifier, BybitPublicParser);
            let request = with_channels(&settings, TopicRequest::subscribe(), |r, channel, symbols| {
                match channel {
                    Channel::Orderbook => r.with_orderbook(BYBIT_BOOK_DEPTH, symbols),
                    Channel::Trades => r.with_trades(symbols),
                    Channel::Ticker => r.with_tickers(symbols),
                }
            });
            run(&settings, Arc::new(policy), Arc::new(NoAuth), handler, vec![request.to_json()?]).await
        }
        (Venue::Bybit, StreamKind::Private) => {
            let url = settings.url.clone().unwrap_or_else(|| bybit::PRIVATE_URL.to_string());
            let mut policy = BybitPolicy::new(url, settings.reconnection_policy());
            if let Some(interval) = settings.websocket.heartbeat_interval {
                policy = policy.with_heartbeat(interval, bybit::PING_TIMEOUT);
            }
            let signal = Arc::new(AuthSignal::new());
            let auth = SignedAuth::new(settings.credentials.clone(), Arc::clone(&signal))
                .with_timeout(settings.websocket.auth_timeout);
            let handler = private_handler(BybitClassifier, BybitPrivateParser, signal);
            let request = TopicRequest::subscribe().with_private_topics();
            run(&settings, Arc::new(policy), Arc::new(auth), handler, vec![request.to_json()?]).await
        }
        (Venue::Upbit, StreamKind::Public) => {
            let url = settings.url.clone().unwrap_or_else(|| upbit::PUBLIC_URL.to_string());
            let mut policy = UpbitPolicy::new(url, settings.reconnection_policy());
            if let Some(interval) = settings.websocket.heartbeat_interval {
                policy = policy.with_ping_interval(interval);
            }
            let handler = public_handler(UpbitClassifier, UpbitParser);
            let request = with_channels(&settings, SubscribeRequest::new(), |r, channel, symbols| {
                match channel {
                    Channel::Orderbook => r.with_orderbook(symbols),
                    Channel::Trades => r.with_trades(symbols),
                    Channel::Ticker => r.with_tickers(symbols),
                }
            });
            run(&settings, Arc::new(policy), Arc::new(NoAuth), handler, vec![request.to_json()?]).await
        }
        (venue, kind) => anyhow::bail!("{} streams are not available on {venue}", kind.as_str()),
    }
}

/// Fold every configured channel into a venue request builder.
fn with_channels<R>(
    settings: &EngineSettings,
    request: R,
    add: impl Fn(R, Channel, &[String]) -> R,
) -> R {
    settings
        .channels
        .iter()
        .fold(request, |request, channel| add(request, *channel, &settings.symbols))
}

/// Public handler with logging callbacks.
fn public_handler<C, P>(classifier: C, parser: P) -> Arc<PublicMessageHandler<C, P>>
where
    C: MessageClassifier,
    P: PublicParser,
{
    let handler = PublicMessageHandler::new(classifier, parser);
    handler.on_orderbook(|book| {
        tracing::debug!(
            symbol = %book.symbol,
            bids = book.bids.len(),
            asks = book.asks.len(),
            snapshot = book.is_snapshot,
            "Orderbook"
        );
        Ok(())
    });
    handler.on_trade(|trade| {
        tracing::debug!(
            symbol = %trade.symbol,
            side = ?trade.side,
            price = %trade.price,
            quantity = %trade.quantity,
            "Trade"
        );
        Ok(())
    });
    handler.on_ticker(|ticker| {
        tracing::debug!(symbol = %ticker.symbol, mid = ?ticker.mid_price(), "Ticker");
        Ok(())
    });
    handler.on_exchange_error(|reason| {
        tracing::warn!(reason = %reason, "Exchange error");
        Ok(())
    });
    Arc::new(handler)
}

/// Private handler with logging callbacks.
fn private_handler<C, P>(
    classifier: C,
    parser: P,
    signal: Arc<AuthSignal>,
) -> Arc<PrivateMessageHandler<C, P>>
where
    C: MessageClassifier,
    P: PrivateParser,
{
    let handler = PrivateMessageHandler::new(classifier, parser, signal);
    handler.on_order_update(|order| {
        tracing::info!(
            order_id = %order.order_id,
            symbol = %order.symbol,
            status = ?order.status,
            filled = %order.filled_quantity,
            "Order update"
        );
        Ok(())
    });
    handler.on_position_update(|position| {
        tracing::info!(symbol = %position.symbol, size = %position.size, "Position update");
        Ok(())
    });
    handler.on_balance_update(|balance| {
        tracing::info!(
            asset = %balance.asset,
            total = %balance.total,
            available = %balance.available,
            "Balance update"
        );
        Ok(())
    });
    handler.on_execution_report(|fill| {
        tracing::info!(
            order_id = %fill.order_id,
            price = %fill.price,
            quantity = %fill.quantity,
            "Execution"
        );
        Ok(())
    });
    handler.on_exchange_error(|reason| {
        tracing::warn!(reason = %reason, "Exchange error");
        Ok(())
    });
    Arc::new(handler)
}

/// Start the engine, subscribe, and run until a shutdown signal or a
/// terminal disconnect.
async fn run<H: MessageHandler>(
    settings: &EngineSettings,
    policy: Arc<dyn ConnectionPolicy>,
    auth: Arc<dyn AuthPolicy>,
    handler: Arc<H>,
    subscriptions: Vec<String>,
) -> anyhow::Result<()> {
    let engine = ConnectionEngine::new(policy, auth, handler, settings.engine_config());

    let (terminal_tx, mut terminal_rx) = tokio::sync::mpsc::channel(1);
    engine.on_state_change(move |change| {
        match change.state {
            ConnectionState::Error | ConnectionState::Reconnecting => tracing::warn!(
                state = change.state.as_str(),
                category = ?change.category,
                reason = ?change.reason,
                "Connection state changed"
            ),
            _ => tracing::info!(state = change.state.as_str(), "Connection state changed"),
        }
        if change.is_terminal() {
            let _ = terminal_tx.try_send(change.clone());
        }
        Ok(())
    });

    for subscription in subscriptions {
        engine.subscribe(subscription).await?;
    }
    engine.initialize()?;

    tracing::info!(venue = %engine.venue(), "Market stream engine ready");

    tokio::select! {
        () = await_shutdown() => {}
        Some(change) = terminal_rx.recv() => {
            tracing::error!(
                category = ?change.category,
                reason = ?change.reason,
                "Connection ended permanently"
            );
        }
    }

    engine.close().await;

    let metrics = engine.performance_metrics();
    let queue = engine.queue_stats();
    tracing::info!(
        messages = metrics.message_count,
        errors = metrics.error_count,
        callback_errors = metrics.callback_errors,
        dropped = queue.dropped,
        "Market stream engine stopped"
    );
    Ok(())
}

/// Log the parsed configuration.
fn log_config(settings: &EngineSettings) {
    tracing::info!(
        venue = %settings.venue,
        kind = settings.kind.as_str(),
        symbols = ?settings.symbols,
        channels = ?settings.channels,
        credentials = settings.credentials.is_some(),
        queue_capacity = settings.queue_capacity,
        metrics_port = settings.metrics_port,
        "Configuration loaded"
    );
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
