//! Pairs two independently sampled return series by timestamp.

use crate::returns::ReturnSample;

pub const DEFAULT_TOLERANCE_MS: i64 = 60_000;

/// Index-aligned return values; both vectors always have the same length.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncedPair {
    pub reference: Vec<f64>,
    pub candidate: Vec<f64>,
}

impl SyncedPair {
    pub fn len(&self) -> usize {
        self.reference.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reference.is_empty()
    }
}

/// Matches every reference sample with the first candidate sample that is not
/// older than `tolerance_ms`, keeping the pair when the two timestamps are
/// within the tolerance in either direction.
///
/// Both inputs must be sorted ascending by timestamp: the candidate cursor only
/// moves forward. Once the candidate series is exhausted the remaining
/// reference samples are dropped. The result is never longer than
/// `reference`, but may be longer than `candidate`.
pub fn sync_returns(
    reference: &[ReturnSample],
    candidate: &[ReturnSample],
    tolerance_ms: i64,
) -> SyncedPair {
    let mut pair = SyncedPair::default();
    let mut j = 0;

    for sample in reference {
        let t_ref = sample.timestamp;
        while j < candidate.len() && candidate[j].timestamp < t_ref - tolerance_ms {
            j += 1;
        }
        let Some(matched) = candidate.get(j) else {
            break;
        };
        // The cursor stays put so one candidate sample can serve several
        // reference samples.
        if (t_ref - matched.timestamp).abs() <= tolerance_ms {
            pair.reference.push(sample.value);
            pair.candidate.push(matched.value);
        }
    }

    pair
}
