use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Aggregation function applied to a window of raw samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Avg,
    Sum,
    Min,
    Max,
    Count,
    P50,
    P95,
    P99,
}

impl FromStr for Aggregation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "avg" | "mean" => Ok(Self::Avg),
            "sum" => Ok(Self::Sum),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "count" => Ok(Self::Count),
            "p50" => Ok(Self::P50),
            "p95" => Ok(Self::P95),
            "p99" => Ok(Self::P99),
            _ => Err(format!("unknown aggregation: {s}")),
        }
    }
}

impl std::fmt::Display for Aggregation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Avg => write!(f, "avg"),
            Self::Sum => write!(f, "sum"),
            Self::Min => write!(f, "min"),
            Self::Max => write!(f, "max"),
            Self::Count => write!(f, "count"),
            Self::P50 => write!(f, "p50"),
            Self::P95 => write!(f, "p95"),
            Self::P99 => write!(f, "p99"),
        }
    }
}

/// Computes the aggregate of `values`, or `None` on an empty window.
///
/// An empty window is "no data" for every aggregation, including `count`:
/// zero rows is indistinguishable from a series that does not exist, and
/// the rule evaluator turns it into a non-triggered result rather than a
/// numeric zero.
pub fn aggregate(values: &[f64], agg: Aggregation) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let result = match agg {
        Aggregation::Avg => values.iter().sum::<f64>() / values.len() as f64,
        Aggregation::Sum => values.iter().sum(),
        Aggregation::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
        Aggregation::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        Aggregation::Count => values.len() as f64,
        Aggregation::P50 => percentile(values, 50.0),
        Aggregation::P95 => percentile(values, 95.0),
        Aggregation::P99 => percentile(values, 99.0),
    };
    Some(result)
}

/// Nearest-rank percentile over an unsorted slice.
///
/// Rank = ceil(p/100 * n), 1-based into the ascending sort, so p100 is the
/// maximum and any p > 0 on a single sample returns that sample.
fn percentile(values: &[f64], p: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = sorted.len();
    let rank = ((p / 100.0) * n as f64).ceil() as usize;
    let idx = rank.clamp(1, n) - 1;
    sorted[idx]
}
