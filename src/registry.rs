//! Working set of displayed assets: the market-cap leaders plus whatever the
//! user added, with the user additions persisted between runs.

use crate::error::{FetchError, RegistryError};
use crate::market_data::{Asset, MAX_HISTORY_HOURS, MarketData};
use crate::pipeline::{self, CorrelationResult};
use crate::storage_utils::{AppConfig, SymbolStore};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};

/// Longest history the provider will serve, rounded up to whole days.
pub const MAX_DAYS: u32 = MAX_HISTORY_HOURS.div_ceil(24);

// Tickers may carry punctuation ("USDT.E"). Whether a symbol exists is up to
// the ranking lookup.
static SYMBOL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\S+$").expect("symbol pattern compiles"));

pub fn clamp_days(days: u32) -> u32 {
    days.clamp(1, MAX_DAYS)
}

/// Trims and upper-cases user input, rejecting empty input and anything
/// with whitespace inside.
pub fn normalize_symbol(raw: &str) -> Result<String, RegistryError> {
    let symbol = raw.trim().to_uppercase();
    if !SYMBOL_RE.is_match(&symbol) {
        return Err(RegistryError::InvalidSymbol(raw.trim().to_string()));
    }
    Ok(symbol)
}

/// Replaces the row with the same symbol or appends. Returns `true` when the
/// row is new.
pub fn upsert_row(rows: &mut Vec<CorrelationResult>, row: CorrelationResult) -> bool {
    match rows.iter_mut().find(|r| r.symbol == row.symbol) {
        Some(existing) => {
            *existing = row;
            false
        }
        None => {
            rows.push(row);
            true
        }
    }
}

/// Computes a full table: the top assets first, then saved custom symbols that
/// are not already among them.
///
/// The reference series is fetched once and shared by every candidate. A
/// failure for one asset only drops that asset; failing to obtain the ranking
/// or the reference history fails the whole refresh.
pub async fn build_rows(
    market: &dyn MarketData,
    config: &AppConfig,
    custom: &BTreeSet<String>,
) -> Result<Vec<CorrelationResult>, FetchError> {
    let params = config.params();
    let reference_symbol = config.reference_symbol.as_str();

    let top = market.fetch_top_assets(config.top_limit + 1).await?;
    if !top.iter().any(|a| a.symbol == reference_symbol) {
        return Err(FetchError::Shape(format!(
            "{reference_symbol} not found in the market-cap ranking"
        )));
    }
    let alts: Vec<Asset> = top
        .into_iter()
        .filter(|a| a.symbol != reference_symbol)
        .take(config.top_limit as usize)
        .collect();

    tracing::info!(reference = reference_symbol, days = params.days, "loading reference history");
    let reference = pipeline::reference_returns(market, reference_symbol, params.days).await?;

    let mut rows = pipeline::compute_batch(
        &reference,
        market,
        &alts,
        &params,
        config.max_concurrent_fetches,
    )
    .await;

    log_refresh(&rows, "top assets");

    let pending: Vec<&String> = custom
        .iter()
        .filter(|s| !rows.iter().any(|r| &r.symbol == *s))
        .collect();
    if pending.is_empty() {
        return Ok(rows);
    }

    // One ranking fetch serves every saved symbol.
    let ranking = match market.fetch_top_assets(config.lookup_limit).await {
        Ok(ranking) => ranking,
        Err(e) => {
            tracing::warn!(error = %e, "could not resolve saved symbols");
            return Ok(rows);
        }
    };
    let saved: Vec<Asset> = pending
        .into_iter()
        .filter_map(|symbol| {
            let found = ranking.iter().find(|a| &a.symbol == symbol).cloned();
            if found.is_none() {
                tracing::warn!(%symbol, "saved symbol is no longer in the ranking");
            }
            found
        })
        .collect();

    let saved_rows = pipeline::compute_batch(
        &reference,
        market,
        &saved,
        &params,
        config.max_concurrent_fetches,
    )
    .await;
    for row in saved_rows {
        upsert_row(&mut rows, row);
    }
    log_refresh(&rows, "saved symbols");
    Ok(rows)
}

fn log_refresh(rows: &[CorrelationResult], stage: &str) {
    let undefined = rows.iter().filter(|r| !r.correlation.is_defined()).count();
    tracing::info!(stage, rows = rows.len(), undefined, "correlations ready");
}

/// Resolves user input to a ranked asset and correlates it against a freshly
/// fetched reference series.
pub async fn correlate_symbol(
    market: &dyn MarketData,
    config: &AppConfig,
    raw: &str,
) -> Result<CorrelationResult, RegistryError> {
    let symbol = normalize_symbol(raw)?;
    let asset = market
        .lookup_asset(&symbol, config.lookup_limit)
        .await?
        .ok_or_else(|| RegistryError::NotFound(symbol.clone()))?;

    let params = config.params();
    let reference = pipeline::reference_returns(market, &config.reference_symbol, params.days).await?;
    Ok(pipeline::compute_correlation(&reference, market, &asset, &params).await?)
}

pub struct AssetRegistry {
    market: Arc<dyn MarketData>,
    store: Arc<dyn SymbolStore>,
    config: AppConfig,
    custom: BTreeSet<String>,
    rows: Vec<CorrelationResult>,
}

impl AssetRegistry {
    pub async fn load(
        market: Arc<dyn MarketData>,
        store: Arc<dyn SymbolStore>,
        config: AppConfig,
    ) -> anyhow::Result<Self> {
        let custom = store.load().await?;
        tracing::debug!(count = custom.len(), "loaded custom symbols");
        Ok(Self {
            market,
            store,
            config,
            custom,
            rows: Vec::new(),
        })
    }

    pub fn rows(&self) -> &[CorrelationResult] {
        &self.rows
    }

    pub fn custom_symbols(&self) -> &BTreeSet<String> {
        &self.custom
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn market(&self) -> Arc<dyn MarketData> {
        Arc::clone(&self.market)
    }

    /// Swaps in rows computed elsewhere, e.g. by a background refresh.
    pub fn replace_rows(&mut self, rows: Vec<CorrelationResult>) {
        self.rows = rows;
    }

    pub async fn refresh(&mut self) -> Result<&[CorrelationResult], FetchError> {
        let rows = build_rows(self.market.as_ref(), &self.config, &self.custom).await?;
        self.rows = rows;
        Ok(&self.rows)
    }

    /// Looks the symbol up in the ranking, correlates it and shows it. Symbols
    /// that were not on screen yet are remembered across runs.
    pub async fn add(&mut self, raw: &str) -> Result<CorrelationResult, RegistryError> {
        let row = correlate_symbol(self.market.as_ref(), &self.config, raw).await?;
        self.accept(row.clone()).await?;
        Ok(row)
    }

    /// Shows a row produced by [`correlate_symbol`], persisting its symbol when
    /// it was not displayed before. Returns whether the row is new.
    pub async fn accept(&mut self, row: CorrelationResult) -> anyhow::Result<bool> {
        let symbol = row.symbol.clone();
        if !upsert_row(&mut self.rows, row) {
            return Ok(false);
        }
        self.custom.insert(symbol.clone());
        self.store.save(&self.custom).await?;
        tracing::info!(%symbol, "added custom symbol");
        Ok(true)
    }

    /// Drops the symbol from the table and from the saved set. Returns whether
    /// anything changed.
    pub async fn remove(&mut self, raw: &str) -> anyhow::Result<bool> {
        let symbol = raw.trim().to_uppercase();
        let before = self.rows.len();
        self.rows.retain(|r| r.symbol != symbol);
        let was_custom = self.custom.remove(&symbol);
        if was_custom {
            self.store.save(&self.custom).await?;
            tracing::info!(%symbol, "removed custom symbol");
        }
        Ok(was_custom || self.rows.len() != before)
    }
}
