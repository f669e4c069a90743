//! Price samples and the simple-return series built from them.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceSample {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReturnSample {
    /// Timestamp of the later price in the pair.
    pub timestamp: i64,
    pub value: f64,
}

/// Converts an ascending price series into fractional returns.
///
/// A pair whose earlier price is zero yields no return, so the output can be
/// shorter than `prices.len() - 1`. Synchronization works on timestamps, so
/// the gap is harmless downstream.
pub fn build_returns(prices: &[PriceSample]) -> Vec<ReturnSample> {
    prices
        .windows(2)
        .filter_map(|pair| {
            let (prev, curr) = (pair[0], pair[1]);
            if prev.price == 0.0 {
                return None;
            }
            Some(ReturnSample {
                timestamp: curr.timestamp,
                value: (curr.price - prev.price) / prev.price,
            })
        })
        .collect()
}

/// Returns the index of the first sample that goes back in time, if any.
pub fn first_unsorted<T>(samples: &[T], timestamp: impl Fn(&T) -> i64) -> Option<usize> {
    samples
        .windows(2)
        .position(|w| timestamp(&w[1]) < timestamp(&w[0]))
        .map(|i| i + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prices(points: &[(i64, f64)]) -> Vec<PriceSample> {
        points
            .iter()
            .map(|&(timestamp, price)| PriceSample { timestamp, price })
            .collect()
    }

    #[test]
    fn short_series_have_no_returns() {
        assert!(build_returns(&[]).is_empty());
        assert!(build_returns(&prices(&[(0, 100.0)])).is_empty());
    }

    #[test]
    fn returns_carry_the_later_timestamp() {
        let returns = build_returns(&prices(&[(0, 100.0), (1, 110.0), (2, 99.0)]));

        assert_eq!(returns.len(), 2);
        assert_eq!(returns[0].timestamp, 1);
        assert!((returns[0].value - 0.10).abs() < 1e-12);
        assert_eq!(returns[1].timestamp, 2);
        assert!((returns[1].value - (-0.1)).abs() < 1e-12);
    }

    #[test]
    fn non_zero_series_yield_one_less_return() {
        let series = prices(&[(0, 5.0), (10, 6.0), (20, 4.5), (30, 4.5), (40, 9.0)]);
        assert_eq!(build_returns(&series).len(), series.len() - 1);
    }

    #[test]
    fn zero_prior_price_is_skipped() {
        let returns = build_returns(&prices(&[(0, 1.0), (1, 0.0), (2, 2.0), (3, 3.0)]));

        // (1.0 -> 0.0) is kept, (0.0 -> 2.0) is dropped, (2.0 -> 3.0) is kept.
        assert_eq!(returns.len(), 2);
        assert_eq!(returns[0].timestamp, 1);
        assert_eq!(returns[0].value, -1.0);
        assert_eq!(returns[1].timestamp, 3);
        assert_eq!(returns[1].value, 0.5);
    }

    #[test]
    fn detects_out_of_order_samples() {
        let sorted = prices(&[(0, 1.0), (5, 1.0), (5, 1.0), (9, 1.0)]);
        let unsorted = prices(&[(0, 1.0), (5, 1.0), (4, 1.0)]);

        assert_eq!(first_unsorted(&sorted, |p| p.timestamp), None);
        assert_eq!(first_unsorted(&unsorted, |p| p.timestamp), Some(2));
    }
}
