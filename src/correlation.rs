//! Pearson correlation over the most recent window of paired returns.

use serde::{Serialize, Serializer};
use std::fmt;

/// Outcome of a windowed correlation.
///
/// Both undefined variants render and serialize the same way (`null` / "–");
/// they stay separate so logs can say why a row has no value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Correlation {
    Value(f64),
    InsufficientData,
    ZeroVariance,
}

impl Correlation {
    pub fn value(&self) -> Option<f64> {
        match *self {
            Correlation::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_defined(&self) -> bool {
        matches!(self, Correlation::Value(_))
    }
}

impl fmt::Display for Correlation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Correlation::Value(v) => write!(f, "{:.3}", v),
            _ => f.write_str("–"),
        }
    }
}

impl Serialize for Correlation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.value().serialize(serializer)
    }
}

/// Computes one coefficient from the `window` pairs ending at the shorter
/// length, so index `i` of `a` is always paired with index `i` of `b`.
pub fn rolling_correlation(a: &[f64], b: &[f64], window: usize) -> Correlation {
    let n = a.len().min(b.len());
    if window == 0 || n < window {
        return Correlation::InsufficientData;
    }

    let a = &a[n - window..n];
    let b = &b[n - window..n];
    let len = window as f64;

    let mean_a = a.iter().sum::<f64>() / len;
    let mean_b = b.iter().sum::<f64>() / len;

    let mut num = 0.0;
    let mut den_a = 0.0;
    let mut den_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        let da = x - mean_a;
        let db = y - mean_b;
        num += da * db;
        den_a += da * da;
        den_b += db * db;
    }

    let den = (den_a * den_b).sqrt();
    if den == 0.0 {
        return Correlation::ZeroVariance;
    }
    Correlation::Value(num / den)
}
