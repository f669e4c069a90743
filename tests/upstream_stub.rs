//! End-to-end checks against a local stand-in for CryptoCompare.

use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use corr_screener::error::FetchError;
use corr_screener::market_data::{CryptoCompareClient, HistoryFetcher, MarketData};
use corr_screener::proxy::{self, ProxyState};
use corr_screener::registry;
use corr_screener::response_cache::ResponseCache;
use corr_screener::storage_utils::AppConfig;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Default)]
struct Upstream {
    hits: AtomicUsize,
}

#[derive(Deserialize)]
struct HistoQuery {
    fsym: String,
}

const START: i64 = 1_700_000_000;

fn candles(fsym: &str) -> Vec<serde_json::Value> {
    let base = [100.0, 103.0, 101.0, 104.0, 102.0, 107.0, 106.0, 109.0];
    let factor = match fsym {
        "BTC" => 1.0,
        "ETH" => 0.05,
        _ => 3.0,
    };
    base.iter()
        .enumerate()
        .map(|(i, p)| serde_json::json!({ "time": START + i as i64 * 3600, "close": p * factor }))
        .collect()
}

async fn top(State(up): State<Arc<Upstream>>) -> impl IntoResponse {
    up.hits.fetch_add(1, Ordering::SeqCst);
    axum::Json(serde_json::json!({
        "Message": "Success",
        "Data": [
            { "CoinInfo": { "Name": "BTC", "FullName": "Bitcoin" } },
            { "CoinInfo": { "Name": "ETH", "FullName": "Ethereum" } },
            { "CoinInfo": { "Name": "DOWN", "FullName": "Broken Coin" } },
            { "CoinInfo": { "Name": "SOL", "FullName": "Solana" } }
        ]
    }))
}

async fn histohour(State(up): State<Arc<Upstream>>, Query(q): Query<HistoQuery>) -> impl IntoResponse {
    up.hits.fetch_add(1, Ordering::SeqCst);
    if q.fsym == "DOWN" {
        return (StatusCode::SERVICE_UNAVAILABLE, "maintenance ".repeat(40)).into_response();
    }
    axum::Json(serde_json::json!({
        "Response": "Success",
        "Data": { "Aggregated": false, "Data": candles(&q.fsym) }
    }))
    .into_response()
}

async fn spawn(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn spawn_upstream() -> (SocketAddr, Arc<Upstream>) {
    let upstream = Arc::new(Upstream::default());
    let app = Router::new()
        .route("/data/top/mktcapfull", get(top))
        .route("/data/v2/histohour", get(histohour))
        .with_state(Arc::clone(&upstream));
    (spawn(app).await, upstream)
}

#[tokio::test]
async fn client_parses_history_and_reports_status_errors() {
    let (addr, _) = spawn_upstream().await;
    let client = CryptoCompareClient::new(&format!("http://{addr}"), "USD", Arc::default()).unwrap();

    let prices = client.fetch_history("BTC", 1).await.unwrap();
    assert_eq!(prices.len(), 8);
    assert_eq!(prices[0].timestamp, START * 1000);

    match client.fetch_history("DOWN", 1).await {
        Err(FetchError::Status { status, body }) => {
            assert_eq!(status, 503);
            assert_eq!(body.chars().count(), 200);
        }
        other => panic!("unexpected {other:?}"),
    }

    let found = client.lookup_asset("SOL", 100).await.unwrap().unwrap();
    assert_eq!(found.name, "Solana");
    assert_eq!(found.rank, Some(4));
}

#[tokio::test]
async fn full_refresh_skips_broken_asset() {
    let (addr, upstream) = spawn_upstream().await;
    let client = CryptoCompareClient::new(&format!("http://{addr}"), "USD", Arc::default()).unwrap();
    let config = AppConfig {
        base_url: format!("http://{addr}"),
        window: 5,
        top_limit: 3,
        ..AppConfig::default()
    };

    let rows = registry::build_rows(&client, &config, &BTreeSet::new()).await.unwrap();

    let symbols: Vec<&str> = rows.iter().map(|r| r.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["ETH", "SOL"]);
    for row in &rows {
        let corr = row.correlation.value().unwrap();
        assert!((corr - 1.0).abs() < 1e-9, "{}: {corr}", row.symbol);
    }

    // Everything is cached now: a second refresh stays off the network.
    let hits = upstream.hits.load(Ordering::SeqCst);
    registry::build_rows(&client, &config, &BTreeSet::new()).await.unwrap();
    assert_eq!(upstream.hits.load(Ordering::SeqCst), hits);
}

#[tokio::test]
async fn proxy_relays_and_caches_verbatim() {
    let (upstream_addr, upstream) = spawn_upstream().await;
    let cache = Arc::new(ResponseCache::new(Duration::from_secs(120)));
    let state = Arc::new(ProxyState::new(&format!("http://{upstream_addr}"), cache).unwrap());
    let proxy_addr = spawn(proxy::router(state)).await;
    let http = reqwest::Client::new();

    let first = http
        .get(format!("http://{proxy_addr}/api/top-mktcap?limit=4"))
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 200);
    let first_body = first.text().await.unwrap();
    let second_body = http
        .get(format!("http://{proxy_addr}/api/top-mktcap?limit=4"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(first_body, second_body);
    assert_eq!(upstream.hits.load(Ordering::SeqCst), 1);

    // Upstream failures are relayed and cached like any other response.
    for _ in 0..2 {
        let down = http
            .get(format!("http://{proxy_addr}/api/histohour?fsym=DOWN"))
            .send()
            .await
            .unwrap();
        assert_eq!(down.status(), 503);
    }
    assert_eq!(upstream.hits.load(Ordering::SeqCst), 2);

    let missing = http
        .get(format!("http://{proxy_addr}/api/histohour"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 400);
    let body: serde_json::Value = missing.json().await.unwrap();
    assert_eq!(body["error"], "fsym required");
}

/// Accepts connections and hangs up without answering.
async fn spawn_hangup() -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepted);
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            drop(socket);
        }
    });
    (addr, accepted)
}

#[tokio::test]
async fn proxy_reports_transport_failures_without_caching_them() {
    let (upstream_addr, accepted) = spawn_hangup().await;
    let cache = Arc::new(ResponseCache::new(Duration::from_secs(120)));
    let state = Arc::new(ProxyState::new(&format!("http://{upstream_addr}"), cache).unwrap());
    let proxy_addr = spawn(proxy::router(state)).await;
    let http = reqwest::Client::new();
    let url = format!("http://{proxy_addr}/api/histohour?fsym=ETH");

    let first = http.get(&url).send().await.unwrap();
    assert_eq!(first.status(), 500);
    let body: serde_json::Value = first.json().await.unwrap();
    assert_eq!(body, serde_json::json!({ "error": "proxy error" }));
    let after_first = accepted.load(Ordering::SeqCst);
    assert!(after_first >= 1);

    // Nothing was stored, so the same request goes upstream again.
    let second = http.get(&url).send().await.unwrap();
    assert_eq!(second.status(), 500);
    assert!(accepted.load(Ordering::SeqCst) > after_first);
}
