//! Baseline computation
//!
//! The KQ baseline is taken from the first awake phase of the recording and
//! used to express every window relative to it. One baseline serves the
//! whole sequence; it is not recomputed per phase.

use crate::types::{Baseline, PhaseLabel, WindowRecord};
use tracing::{info, warn};

/// Substring identifying baseline phases
pub const BASELINE_PHASE_MARKER: &str = "awake";

/// Standard deviations below this are replaced by 1
pub const MIN_BASELINE_STD: f64 = 1e-6;

/// Added to the standard deviation in the z-score denominator
pub const ZSCORE_EPSILON: f64 = 1e-12;

/// Mean and sample standard deviation of KQ over the first awake phase.
///
/// Windows count when their midpoint lies inside the phase bounds and their KQ
/// is finite. Falls back to mean 0 / std 1 when no awake phase or no such
/// window exists.
pub fn compute_baseline(records: &[WindowRecord], labels: &[PhaseLabel]) -> Baseline {
    let Some(phase) = labels
        .iter()
        .find(|label| label.name.contains(BASELINE_PHASE_MARKER))
    else {
        warn!("no awake phase loaded, z-scores use mean 0 and std 1");
        return Baseline::default();
    };

    let values: Vec<f64> = records
        .iter()
        .filter(|r| phase.contains(r.t_mid_sec))
        .map(|r| r.kq)
        .filter(|kq| kq.is_finite())
        .collect();

    if values.is_empty() {
        warn!(phase = %phase.name, "awake phase has no usable windows, z-scores use mean 0 and std 1");
        return Baseline {
            phase: Some(phase.name.clone()),
            ..Baseline::default()
        };
    }

    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let std = sample_std(&values, mean);
    let std = if std.is_nan() || std < MIN_BASELINE_STD {
        1.0
    } else {
        std
    };

    info!(phase = %phase.name, windows = values.len(), mean, std, "computed KQ baseline");
    Baseline {
        mean,
        std,
        phase: Some(phase.name.clone()),
        window_count: values.len(),
    }
}

/// `(kq - mean) / (std + epsilon)`
pub fn zscore(kq: f64, baseline: &Baseline) -> f64 {
    (kq - baseline.mean) / (baseline.std + ZSCORE_EPSILON)
}

// ddof = 1; NaN for fewer than two values
fn sample_std(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return f64::NAN;
    }
    let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    (ss / (values.len() - 1) as f64).sqrt()
}
