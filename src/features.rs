//! Window feature computation
//!
//! This module slides a fixed-length window over the filtered signal and
//! derives, per window:
//! - Normalized spectral entropy of the channel-averaged Welch spectrum
//! - Mean pairwise coherence over the leading channels
//! - The composite KQ index
//! - Amplitude statistics and band powers

use crate::config::{validate_window, COHERENCE_MAX_CHANNELS};
use crate::error::KqError;
use crate::spectral::{normalized_spectral_entropy, Spectrum, SpectralEstimator};
use crate::types::{BandPowers, ConcatenatedSignal, EegBand, WindowRecord, WindowStats};
use ndarray::{s, ArrayView2, Axis};
use tracing::{debug, info};

/// Floor for total power so relative band powers stay finite
const MIN_TOTAL_POWER: f64 = 1e-12;

/// Sliding window feature engine
pub struct WindowFeatureEngine {
    sfreq: f64,
    window_samples: usize,
    step_samples: usize,
    estimator: SpectralEstimator,
}

impl WindowFeatureEngine {
    /// Convert the window length and overlap to sample counts at `sfreq`
    pub fn new(window_sec: f64, overlap_percent: f64, sfreq: f64) -> Result<Self, KqError> {
        validate_window(window_sec, overlap_percent)?;
        let window_samples = (window_sec * sfreq).round() as usize;
        if window_samples < 2 {
            return Err(KqError::InvalidConfig(format!(
                "window of {window_sec} s at {sfreq} Hz has fewer than 2 samples"
            )));
        }
        let step_samples = (window_samples as f64 * (1.0 - overlap_percent / 100.0)).round() as usize;
        if step_samples == 0 {
            return Err(KqError::InvalidConfig(format!(
                "overlap of {overlap_percent} % leaves no window step"
            )));
        }

        Ok(Self {
            sfreq,
            window_samples,
            step_samples,
            estimator: SpectralEstimator::new(),
        })
    }

    pub fn window_samples(&self) -> usize {
        self.window_samples
    }

    pub fn step_samples(&self) -> usize {
        self.step_samples
    }

    /// Compute one record per window, in increasing time order.
    ///
    /// Signals shorter than one window yield no records.
    pub fn compute(&mut self, signal: &ConcatenatedSignal) -> Vec<WindowRecord> {
        let n_samples = signal.n_samples();
        let mut records = Vec::new();
        let mut pos = 0;
        while pos + self.window_samples <= n_samples {
            let window = signal.data.slice(s![.., pos..pos + self.window_samples]);
            records.push(self.compute_window(window, pos));
            pos += self.step_samples;
        }

        let degenerate = records.iter().filter(|r| r.kq.is_nan()).count();
        info!(
            windows = records.len(),
            degenerate,
            window_samples = self.window_samples,
            step_samples = self.step_samples,
            "computed window features"
        );
        records
    }

    fn compute_window(&mut self, window: ArrayView2<'_, f64>, pos: usize) -> WindowRecord {
        let sfreq = self.sfreq;
        let channels: Vec<Vec<f64>> = window.axis_iter(Axis(0)).map(|row| row.to_vec()).collect();

        // One Welch spectrum per channel, shared by entropy and band statistics
        let spectra = channels
            .iter()
            .map(|x| self.estimator.welch(x, sfreq, self.window_samples))
            .collect::<Result<Vec<Spectrum>, KqError>>();

        let t_start_sec = pos as f64 / sfreq;
        let entropy = spectra_entropy(&spectra).unwrap_or_else(|reason| {
            debug!(t_start_sec, error = %reason, "entropy undefined for window");
            f64::NAN
        });

        let n_coherence = channels.len().min(COHERENCE_MAX_CHANNELS);
        let coherence = self
            .estimator
            .mean_pairwise_coherence(&channels[..n_coherence])
            .unwrap_or_else(|e| {
                debug!(t_start_sec, error = %e, "coherence undefined for window");
                f64::NAN
            });

        let stats = match &spectra {
            Ok(spectra) => window_stats(window, spectra),
            Err(_) => amplitude_stats(window),
        };

        WindowRecord {
            t_start_sec,
            t_end_sec: (pos + self.window_samples) as f64 / sfreq,
            t_mid_sec: (pos + self.window_samples / 2) as f64 / sfreq,
            kq: composite_index(coherence, entropy),
            coherence,
            entropy,
            stats,
        }
    }
}

/// KQ = C · (1 − H); NaN in either input propagates
pub fn composite_index(coherence: f64, entropy: f64) -> f64 {
    coherence * (1.0 - entropy)
}

/// Entropy of the plain channel mean of the spectra
fn window_entropy(spectra: &[Spectrum]) -> Result<f64, KqError> {
    let n_bins = spectra.first().map(Spectrum::len).unwrap_or(0);
    let n_channels = spectra.len() as f64;
    let mean: Vec<f64> = (0..n_bins)
        .map(|k| spectra.iter().map(|s| s.values[k]).sum::<f64>() / n_channels)
        .collect();
    normalized_spectral_entropy(&mean)
}

/// Entropy of the window spectra, or the reason it is undefined
fn spectra_entropy(spectra: &Result<Vec<Spectrum>, KqError>) -> Result<f64, String> {
    match spectra {
        Ok(spectra) => window_entropy(spectra).map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    }
}

/// Channel mean ignoring non-finite values; bins with no finite value become 0
fn robust_mean_spectrum(spectra: &[Spectrum]) -> Vec<f64> {
    let n_bins = spectra.first().map(Spectrum::len).unwrap_or(0);
    (0..n_bins)
        .map(|k| {
            let (sum, count) = spectra
                .iter()
                .map(|s| s.values[k])
                .filter(|v| v.is_finite())
                .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
            if count == 0 {
                0.0
            } else {
                sum / count as f64
            }
        })
        .collect()
}

/// Amplitude statistics plus absolute and relative band powers
fn window_stats(window: ArrayView2<'_, f64>, spectra: &[Spectrum]) -> WindowStats {
    let mut stats = amplitude_stats(window);
    let Some(freqs) = spectra.first().map(|s| &s.freqs) else {
        return stats;
    };

    let psd = robust_mean_spectrum(spectra);
    let mut total_power: f64 = psd.iter().sum();
    if total_power <= 0.0 {
        total_power = MIN_TOTAL_POWER;
    }

    for band in EegBand::ALL {
        let (low, high) = band.range_hz();
        let power: f64 = freqs
            .iter()
            .zip(&psd)
            .filter(|(f, _)| **f >= low && **f < high)
            .map(|(_, p)| p)
            .sum();
        stats.band_power.set(band, power);
        stats.relative_power.set(band, power / total_power);
    }
    stats.total_power = total_power;
    stats
}

/// GFP, mean and population variance; band powers left at zero
fn amplitude_stats(window: ArrayView2<'_, f64>) -> WindowStats {
    let gfp = if window.is_empty() {
        f64::NAN
    } else {
        window.std_axis(Axis(0), 0.0).mean().unwrap_or(f64::NAN)
    };
    let mean_amplitude = window.mean().unwrap_or(f64::NAN);
    let variance = if window.is_empty() {
        f64::NAN
    } else {
        window.var(0.0)
    };

    WindowStats {
        gfp,
        mean_amplitude,
        variance,
        total_power: MIN_TOTAL_POWER,
        band_power: BandPowers::default(),
        relative_power: BandPowers::default(),
    }
}
