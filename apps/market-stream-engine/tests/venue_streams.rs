//! Venue Keepalive and Framing Tests
//!
//! Bybit application-level ping/pong and Upbit binary frames over a
//! local WebSocket server.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rust_decimal_macros::dec;

use market_stream_engine::infrastructure::venues::{
    BybitClassifier, BybitPolicy, BybitPublicParser, SubscribeRequest, TopicRequest,
    UpbitClassifier, UpbitParser, UpbitPolicy,
};
use market_stream_engine::{
    ConnectionEngine, ConnectionState, EngineConfig, ErrorCategory, NoAuth, OrderBook,
    PublicMessageHandler, StateChange,
};

use common::{TestServer, eventually, fast_reconnection};

const UPBIT_ORDERBOOK: &str = r#"{"type":"orderbook","code":"KRW-BTC","timestamp":1704867306396,"total_ask_size":7.30,"total_bid_size":1.95,"orderbook_units":[{"ask_price":62560000.0,"bid_price":62555000.0,"ask_size":0.01,"bid_size":0.23},{"ask_price":62565000,"bid_price":62550000,"ask_size":1.5E-4,"bid_size":0.005}],"stream_type":"SNAPSHOT","level":0}"#;

fn bybit_engine(
    policy: BybitPolicy,
) -> ConnectionEngine<PublicMessageHandler<BybitClassifier, BybitPublicParser>> {
    ConnectionEngine::new(
        Arc::new(policy),
        Arc::new(NoAuth),
        Arc::new(PublicMessageHandler::new(BybitClassifier, BybitPublicParser)),
        EngineConfig::default(),
    )
}

#[tokio::test]
async fn test_bybit_answers_server_ping() {
    let mut server = TestServer::start().await;
    let engine = bybit_engine(BybitPolicy::new(server.url(), fast_reconnection(0)));

    let subscription = TopicRequest::subscribe()
        .with_trades(&["BTCUSDT".to_string()])
        .to_json()
        .unwrap();
    engine.subscribe(subscription.clone()).await.unwrap();
    engine.initialize().unwrap();

    let mut peer = server.accept().await;
    assert_eq!(peer.next_text().await, subscription);

    peer.send_text(r#"{"op":"ping"}"#).await;
    assert_eq!(peer.next_text().await, r#"{"op":"pong"}"#);
    assert_eq!(engine.state(), ConnectionState::Connected);

    engine.close().await;
}

#[tokio::test]
async fn test_bybit_silent_peer_times_out_and_reconnects() {
    let mut server = TestServer::start().await;
    let policy = BybitPolicy::new(server.url(), fast_reconnection(0))
        .with_heartbeat(Duration::from_millis(50), Duration::from_millis(150));
    let engine = bybit_engine(policy);

    let errors = Arc::new(Mutex::new(Vec::<StateChange>::new()));
    let sink = Arc::clone(&errors);
    engine.on_state_change(move |change| {
        if change.state == ConnectionState::Error {
            sink.lock().push(change.clone());
        }
        Ok(())
    });
    engine.initialize().unwrap();

    let mut first = server.accept().await;
    assert_eq!(first.next_text().await, r#"{"op":"ping"}"#);

    let _second = server.accept().await;
    assert!(eventually(|| !errors.lock().is_empty()).await);
    assert_eq!(errors.lock()[0].category, Some(ErrorCategory::Timeout));

    engine.close().await;
}

#[tokio::test]
async fn test_upbit_binary_frames_and_keepalive() {
    let mut server = TestServer::start().await;
    let policy = UpbitPolicy::new(server.url(), fast_reconnection(0))
        .with_ping_interval(Duration::from_millis(50));
    let handler = PublicMessageHandler::new(UpbitClassifier, UpbitParser);

    let books = Arc::new(Mutex::new(Vec::<OrderBook>::new()));
    let sink = Arc::clone(&books);
    handler.on_orderbook(move |book| {
        sink.lock().push(book.clone());
        Ok(())
    });

    let engine = ConnectionEngine::new(
        Arc::new(policy),
        Arc::new(NoAuth),
        Arc::new(handler),
        EngineConfig::default(),
    );

    let subscription = SubscribeRequest::with_ticket("test-ticket")
        .with_orderbook(&["krw-btc".to_string()])
        .to_json()
        .unwrap();
    engine.subscribe(subscription.clone()).await.unwrap();
    engine.initialize().unwrap();

    let mut peer = server.accept().await;
    assert_eq!(peer.next_text().await, subscription);
    assert_eq!(peer.next_text().await, "PING");

    peer.send_binary(br#"{"status":"UP"}"#).await;
    peer.send_binary(UPBIT_ORDERBOOK.as_bytes()).await;

    assert!(eventually(|| books.lock().len() == 1).await);
    let book = books.lock()[0].clone();
    assert_eq!(book.symbol, "KRW-BTC");
    assert!(book.is_snapshot);
    assert_eq!(book.bids.len(), 2);
    assert_eq!(book.best_bid(), Some(dec!(62555000.0)));
    assert_eq!(book.asks[1].quantity, dec!(0.00015));
    assert_eq!(engine.performance_metrics().error_count, 0);

    engine.close().await;
}
