//! Rolling-baseline statistics and z-score anomaly classification.
//!
//! The baseline is the raw series over the lookback window with the most
//! recent evaluation window excluded, so the value being scored never
//! contaminates its own baseline.

use serde::{Deserialize, Serialize};

/// Mean and population standard deviation of a baseline series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaselineStats {
    pub mean: f64,
    pub stddev: f64,
    pub sample_count: usize,
}

/// Computes mean and population standard deviation over `values`.
///
/// Returns zeroed stats for an empty series; the sufficiency check
/// happens in [`score_anomaly`], not here.
pub fn baseline_stats(values: &[f64]) -> BaselineStats {
    let n = values.len();
    if n == 0 {
        return BaselineStats {
            mean: 0.0,
            stddev: 0.0,
            sample_count: 0,
        };
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
    BaselineStats {
        mean,
        stddev: variance.sqrt(),
        sample_count: n,
    }
}

/// Outcome of scoring one value against a baseline.
#[derive(Debug, Clone, PartialEq)]
pub enum AnomalyVerdict {
    Scored(AnomalyScore),
    /// Baseline too small or constant; scoring would be meaningless
    /// (and a constant baseline would divide by zero).
    InsufficientData { sample_count: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnomalyScore {
    pub is_anomaly: bool,
    pub z_score: f64,
    pub baseline_mean: f64,
    pub baseline_stddev: f64,
    /// Linear confidence ramp: 0 at the deviation threshold, 1 at three
    /// times the threshold.
    pub confidence: f64,
    pub sample_count: usize,
}

/// Scores `current` against the baseline.
///
/// `is_anomaly` when `|z| >= deviation_threshold`. Fewer than
/// `min_samples` baseline points or a zero standard deviation yield
/// [`AnomalyVerdict::InsufficientData`].
///
/// # Examples
///
/// ```
/// use llmscope_detect::baseline::{baseline_stats, score_anomaly, AnomalyVerdict};
///
/// // 20 samples, mean 100, population stddev 10
/// let mut series = vec![90.0; 10];
/// series.extend(vec![110.0; 10]);
/// let stats = baseline_stats(&series);
///
/// match score_anomaly(135.0, &stats, 3.0, 10) {
///     AnomalyVerdict::Scored(score) => {
///         assert!(score.is_anomaly);
///         assert!((score.z_score - 3.5).abs() < 1e-9);
///     }
///     AnomalyVerdict::InsufficientData { .. } => panic!("baseline was sufficient"),
/// }
/// ```
pub fn score_anomaly(
    current: f64,
    baseline: &BaselineStats,
    deviation_threshold: f64,
    min_samples: usize,
) -> AnomalyVerdict {
    if baseline.sample_count < min_samples || baseline.stddev == 0.0 {
        return AnomalyVerdict::InsufficientData {
            sample_count: baseline.sample_count,
        };
    }

    let z_score = (current - baseline.mean) / baseline.stddev;
    let is_anomaly = z_score.abs() >= deviation_threshold;
    let confidence =
        ((z_score.abs() - deviation_threshold) / (2.0 * deviation_threshold)).clamp(0.0, 1.0);

    AnomalyVerdict::Scored(AnomalyScore {
        is_anomaly,
        z_score,
        baseline_mean: baseline.mean,
        baseline_stddev: baseline.stddev,
        confidence,
        sample_count: baseline.sample_count,
    })
}
