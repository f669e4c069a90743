//! Caching reverse proxy in front of CryptoCompare.
//!
//! Two routes are forwarded; upstream status and body are relayed verbatim
//! and cached per full upstream URL.

use axum::Router;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::response_cache::{CachedResponse, ResponseCache};

pub struct ProxyState {
    client: Client,
    base_url: String,
    cache: Arc<ResponseCache>,
}

impl ProxyState {
    pub fn new(base_url: &str, cache: Arc<ResponseCache>) -> anyhow::Result<Self> {
        Ok(Self {
            client: Client::builder().build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            cache,
        })
    }
}

#[derive(Deserialize, Debug)]
pub struct TopParams {
    #[serde(default = "default_top_limit")]
    limit: u32,
    #[serde(default = "default_tsym")]
    tsym: String,
}

#[derive(Deserialize, Debug)]
pub struct HistoParams {
    fsym: Option<String>,
    #[serde(default = "default_tsym")]
    tsym: String,
    #[serde(default = "default_history_limit")]
    limit: u32,
}

fn default_top_limit() -> u32 {
    10
}

fn default_history_limit() -> u32 {
    200
}

fn default_tsym() -> String {
    "USD".to_string()
}

fn relay(response: CachedResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    (status, [(header::CONTENT_TYPE, "application/json")], response.body).into_response()
}

fn proxy_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        axum::Json(json!({ "error": "proxy error" })),
    )
        .into_response()
}

async fn forward(state: &ProxyState, url: String) -> Response {
    match state.cache.get_or_fetch(&state.client, &url).await {
        Ok(cached) => relay(cached),
        Err(e) => {
            tracing::error!(%url, error = %e, "upstream request failed");
            proxy_error()
        }
    }
}

async fn top_mktcap(State(state): State<Arc<ProxyState>>, Query(params): Query<TopParams>) -> Response {
    let url = format!(
        "{}/data/top/mktcapfull?tsym={}&limit={}",
        state.base_url, params.tsym, params.limit
    );
    forward(&state, url).await
}

async fn histohour(State(state): State<Arc<ProxyState>>, Query(params): Query<HistoParams>) -> Response {
    let Some(fsym) = params.fsym.filter(|s| !s.is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            axum::Json(json!({ "error": "fsym required" })),
        )
            .into_response();
    };
    let url = format!(
        "{}/data/v2/histohour?fsym={}&tsym={}&limit={}",
        state.base_url, fsym, params.tsym, params.limit
    );
    forward(&state, url).await
}

pub fn router(state: Arc<ProxyState>) -> Router {
    Router::new()
        .route("/api/top-mktcap", get(top_mktcap))
        .route("/api/histohour", get(histohour))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: Arc<ProxyState>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("CryptoCompare proxy listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down proxy");
        })
        .await?;
    Ok(())
}
