//! Per-asset correlation pipeline: history → returns → sync → correlation.

use crate::correlation::{Correlation, rolling_correlation};
use crate::error::FetchError;
use crate::market_data::{Asset, HistoryFetcher};
use crate::returns::{ReturnSample, build_returns, first_unsorted};
use crate::sync::{DEFAULT_TOLERANCE_MS, sync_returns};
use futures::future::join_all;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrelationParams {
    pub window: usize,
    pub days: u32,
    pub tolerance_ms: i64,
}

impl Default for CorrelationParams {
    fn default() -> Self {
        Self {
            window: 30,
            days: 7,
            tolerance_ms: DEFAULT_TOLERANCE_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationResult {
    pub symbol: String,
    pub name: String,
    pub rank: Option<u32>,
    pub correlation: Correlation,
}

async fn fetch_returns<F>(
    fetcher: &F,
    symbol: &str,
    days: u32,
) -> Result<Vec<ReturnSample>, FetchError>
where
    F: HistoryFetcher + ?Sized,
{
    let prices = fetcher.fetch_history(symbol, days).await?;
    // The synchronizer's cursor never moves back, so unsorted input would
    // silently misalign.
    if let Some(idx) = first_unsorted(&prices, |p| p.timestamp) {
        return Err(FetchError::Shape(format!(
            "{symbol} history goes back in time at index {idx}"
        )));
    }
    Ok(build_returns(&prices))
}

/// Builds the reference series shared read-only by every candidate of a
/// refresh cycle.
pub async fn reference_returns<F>(
    fetcher: &F,
    symbol: &str,
    days: u32,
) -> Result<Vec<ReturnSample>, FetchError>
where
    F: HistoryFetcher + ?Sized,
{
    fetch_returns(fetcher, symbol, days).await
}

/// Correlates one candidate against the reference returns.
pub async fn compute_correlation<F>(
    reference: &[ReturnSample],
    fetcher: &F,
    candidate: &Asset,
    params: &CorrelationParams,
) -> Result<CorrelationResult, FetchError>
where
    F: HistoryFetcher + ?Sized,
{
    let returns = fetch_returns(fetcher, &candidate.symbol, params.days).await?;
    let synced = sync_returns(reference, &returns, params.tolerance_ms);
    let correlation = rolling_correlation(&synced.reference, &synced.candidate, params.window);

    tracing::debug!(
        symbol = %candidate.symbol,
        returns = returns.len(),
        synced = synced.len(),
        ?correlation,
        "correlation computed"
    );

    Ok(CorrelationResult {
        symbol: candidate.symbol.clone(),
        name: candidate.name.clone(),
        rank: candidate.rank,
        correlation,
    })
}

/// Runs the pipeline for every candidate, at most `concurrency` fetches at a
/// time. Output keeps input order; a failed candidate is logged and left out
/// without affecting the others.
pub async fn compute_batch<F>(
    reference: &[ReturnSample],
    fetcher: &F,
    candidates: &[Asset],
    params: &CorrelationParams,
    concurrency: usize,
) -> Vec<CorrelationResult>
where
    F: HistoryFetcher + ?Sized,
{
    let mut rows = Vec::with_capacity(candidates.len());

    for batch in candidates.chunks(concurrency.max(1)) {
        let tasks = batch
            .iter()
            .map(|candidate| compute_correlation(reference, fetcher, candidate, params));
        let results = join_all(tasks).await;

        for (candidate, result) in batch.iter().zip(results) {
            match result {
                Ok(row) => rows.push(row),
                Err(e) if e.is_transport() => {
                    tracing::warn!(symbol = %candidate.symbol, error = %e, "skipping asset");
                }
                Err(e) => {
                    tracing::error!(symbol = %candidate.symbol, error = %e, "skipping asset, bad payload");
                }
            }
        }
    }
    rows
}
