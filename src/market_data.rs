//! CryptoCompare client: market-cap ranking and hourly candles.

use crate::error::FetchError;
use crate::response_cache::ResponseCache;
use crate::returns::PriceSample;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::sync::Arc;

/// `histohour` refuses more than this many candles per request.
pub const MAX_HISTORY_HOURS: u32 = 500;

/// One row of the market-cap ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub symbol: String,
    pub name: String,
    pub rank: Option<u32>,
}

/// Source of price history for a single asset.
#[async_trait]
pub trait HistoryFetcher: Send + Sync {
    async fn fetch_history(&self, symbol: &str, days: u32) -> Result<Vec<PriceSample>, FetchError>;
}

/// Full market-data collaborator used by the registry.
#[async_trait]
pub trait MarketData: HistoryFetcher {
    async fn fetch_top_assets(&self, limit: u32) -> Result<Vec<Asset>, FetchError>;

    /// Finds one asset by symbol. CryptoCompare has no per-symbol rank
    /// endpoint, so the default searches a fetched batch.
    async fn lookup_asset(&self, symbol: &str, search_limit: u32) -> Result<Option<Asset>, FetchError> {
        let batch = self.fetch_top_assets(search_limit).await?;
        Ok(batch.into_iter().find(|a| a.symbol == symbol))
    }
}

pub fn history_hours(days: u32) -> u32 {
    days.saturating_mul(24).min(MAX_HISTORY_HOURS)
}

// --- Wire formats ---

#[derive(Deserialize, Debug)]
struct Envelope<T> {
    #[serde(rename = "Response")]
    response: Option<String>,
    #[serde(rename = "Message")]
    message: Option<String>,
    #[serde(rename = "Data")]
    data: Option<T>,
}

#[derive(Deserialize, Debug)]
struct TopEntry {
    #[serde(rename = "CoinInfo", default)]
    coin_info: CoinInfo,
}

#[derive(Deserialize, Debug, Default)]
struct CoinInfo {
    #[serde(rename = "Name")]
    name: Option<String>,
    #[serde(rename = "FullName")]
    full_name: Option<String>,
}

#[derive(Deserialize, Debug)]
struct HistoryData {
    #[serde(rename = "Data", default)]
    candles: Vec<Candle>,
}

#[derive(Deserialize, Debug)]
struct Candle {
    /// Seconds since the epoch.
    time: i64,
    #[serde(default, deserialize_with = "deserialize_f64_lenient")]
    close: Option<f64>,
}

struct LenientF64Visitor;

impl<'de> Visitor<'de> for LenientF64Visitor {
    type Value = Option<f64>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a float, an integer, a numeric string or null")
    }

    fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E> {
        Ok(Some(v))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
        Ok(Some(v as f64))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
        Ok(Some(v as f64))
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        if v.trim().is_empty() {
            Ok(None)
        } else {
            v.trim().parse::<f64>().map(Some).map_err(E::custom)
        }
    }

    fn visit_unit<E>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_none<E>(self) -> Result<Self::Value, E> {
        Ok(None)
    }
}

fn deserialize_f64_lenient<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(LenientF64Visitor)
}

fn parse_envelope<T: for<'de> Deserialize<'de>>(body: &str, what: &str) -> Result<T, FetchError> {
    let envelope: Envelope<T> = serde_json::from_str(body)
        .map_err(|e| FetchError::Shape(format!("{what}: {e}")))?;

    if envelope.response.as_deref() == Some("Error") {
        return Err(FetchError::Api(
            envelope.message.unwrap_or_else(|| format!("{what} error")),
        ));
    }
    envelope
        .data
        .ok_or_else(|| FetchError::Shape(format!("{what}: missing Data")))
}

/// Parses a `top/mktcapfull` body. Ranks follow list position.
pub fn parse_top_assets(body: &str) -> Result<Vec<Asset>, FetchError> {
    let entries: Vec<TopEntry> = parse_envelope(body, "top-mktcap")?;

    Ok(entries
        .into_iter()
        .enumerate()
        .filter_map(|(idx, entry)| {
            let CoinInfo { name, full_name } = entry.coin_info;
            let symbol = name.filter(|n| !n.is_empty())?;
            Some(Asset {
                name: full_name.unwrap_or_else(|| symbol.clone()),
                symbol,
                rank: Some(idx as u32 + 1),
            })
        })
        .collect())
}

/// Parses a `v2/histohour` body into close prices stamped in milliseconds.
/// Candles without a finite close are dropped.
pub fn parse_history(body: &str) -> Result<Vec<PriceSample>, FetchError> {
    let data: HistoryData = parse_envelope(body, "histohour")?;

    Ok(data
        .candles
        .into_iter()
        .filter_map(|c| {
            let price = c.close.filter(|p| p.is_finite())?;
            Some(PriceSample {
                timestamp: c.time * 1000,
                price,
            })
        })
        .collect())
}

// --- HTTP client ---

pub struct CryptoCompareClient {
    client: Client,
    base_url: String,
    quote_symbol: String,
    cache: Arc<ResponseCache>,
}

impl CryptoCompareClient {
    pub fn new(base_url: &str, quote_symbol: &str, cache: Arc<ResponseCache>) -> anyhow::Result<Self> {
        let client = Client::builder().pool_max_idle_per_host(8).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            quote_symbol: quote_symbol.to_string(),
            cache,
        })
    }

    pub fn top_url(&self, limit: u32) -> String {
        format!(
            "{}/data/top/mktcapfull?tsym={}&limit={}",
            self.base_url, self.quote_symbol, limit
        )
    }

    pub fn history_url(&self, symbol: &str, hours: u32) -> String {
        format!(
            "{}/data/v2/histohour?fsym={}&tsym={}&limit={}",
            self.base_url, symbol, self.quote_symbol, hours
        )
    }

    async fn get_body(&self, url: &str) -> Result<String, FetchError> {
        let response = self.cache.get_or_fetch(&self.client, url).await?;
        if !response.is_success() {
            return Err(FetchError::status(response.status, &response.body));
        }
        Ok(response.body)
    }
}

#[async_trait]
impl HistoryFetcher for CryptoCompareClient {
    async fn fetch_history(&self, symbol: &str, days: u32) -> Result<Vec<PriceSample>, FetchError> {
        let url = self.history_url(symbol, history_hours(days));
        let body = self.get_body(&url).await?;
        parse_history(&body)
    }
}

#[async_trait]
impl MarketData for CryptoCompareClient {
    async fn fetch_top_assets(&self, limit: u32) -> Result<Vec<Asset>, FetchError> {
        let body = self.get_body(&self.top_url(limit)).await?;
        parse_top_assets(&body)
    }
}
