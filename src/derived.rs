//! Derived metrics
//!
//! Metrics that need the whole window sequence rather than one window:
//! KQ rate of change, centered rolling variance and the baseline z-score.

use crate::baseline::zscore;
use crate::types::{Baseline, DerivedWindow, WindowRecord};

/// Rolling variance neighbourhood (windows, centered)
pub const LOCAL_VARIANCE_WINDOW: usize = 5;

/// Mean spacing of consecutive midpoints, or `fallback_sec` when undefined or zero
pub fn mean_midpoint_spacing(records: &[WindowRecord], fallback_sec: f64) -> f64 {
    if records.len() < 2 {
        return fallback_sec;
    }
    let first = records[0].t_mid_sec;
    let last = records[records.len() - 1].t_mid_sec;
    let dt = (last - first) / (records.len() - 1) as f64;
    if dt.is_nan() || dt == 0.0 {
        fallback_sec
    } else {
        dt
    }
}

/// First difference of KQ divided by `dt`; the first value and NaN rates are 0
pub fn rate_of_change(kq: &[f64], dt: f64) -> Vec<f64> {
    let mut rates = Vec::with_capacity(kq.len());
    if kq.is_empty() {
        return rates;
    }
    rates.push(0.0);
    for pair in kq.windows(2) {
        let rate = (pair[1] - pair[0]) / dt;
        rates.push(if rate.is_nan() { 0.0 } else { rate });
    }
    rates
}

/// Sample variance over a centered neighbourhood of `width` values, clipped at
/// the ends. NaN values are skipped; fewer than two values gives 0.
pub fn rolling_variance(kq: &[f64], width: usize) -> Vec<f64> {
    // Even widths put the extra value before the center
    let before = width / 2;
    let after = width.saturating_sub(1) / 2;
    (0..kq.len())
        .map(|i| {
            let lo = i.saturating_sub(before);
            let hi = (i + after + 1).min(kq.len());
            let values: Vec<f64> = kq[lo..hi].iter().copied().filter(|v| !v.is_nan()).collect();
            if values.len() < 2 {
                return 0.0;
            }
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64
        })
        .collect()
}

/// Attach rate, local variance and z-score to every window record
pub fn derive_metrics(
    records: &[WindowRecord],
    baseline: &Baseline,
    nominal_step_sec: f64,
) -> Vec<DerivedWindow> {
    let kq: Vec<f64> = records.iter().map(|r| r.kq).collect();
    let dt = mean_midpoint_spacing(records, nominal_step_sec);
    let rates = rate_of_change(&kq, dt);
    let variances = rolling_variance(&kq, LOCAL_VARIANCE_WINDOW);

    records
        .iter()
        .zip(rates)
        .zip(variances)
        .map(|((record, dkq_dt), kq_local_variance)| DerivedWindow {
            window: *record,
            dkq_dt,
            kq_local_variance,
            kq_zscore: zscore(record.kq, baseline),
        })
        .collect()
}
