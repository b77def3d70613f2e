//! Spectral estimators
//!
//! Welch power spectral density, magnitude-squared coherence and normalized
//! spectral entropy. Segmentation follows the usual Welch conventions:
//! periodic Hann window, 50 % overlap, constant detrend per segment and a
//! one-sided density-scaled spectrum.

use crate::error::KqError;
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

/// Default segment length for coherence estimation
pub const COHERENCE_NPERSEG: usize = 256;

/// Guard against division by zero and `log2(0)`
const EPS: f64 = 1e-12;

/// One-sided spectrum: frequency bins and the value at each bin
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    pub freqs: Vec<f64>,
    pub values: Vec<f64>,
}

impl Spectrum {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Windowed one-sided FFTs of every Welch segment of one signal
#[derive(Debug, Clone)]
pub struct SegmentSpectra {
    nperseg: usize,
    segments: Vec<Vec<Complex<f64>>>,
}

impl SegmentSpectra {
    pub fn n_segments(&self) -> usize {
        self.segments.len()
    }

    pub fn n_bins(&self) -> usize {
        self.nperseg / 2 + 1
    }
}

/// Welch-style estimator holding a cached FFT planner
pub struct SpectralEstimator {
    planner: FftPlanner<f64>,
}

impl Default for SpectralEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl SpectralEstimator {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
        }
    }

    /// Split `x` into half-overlapping segments of `nperseg` (clipped to the
    /// signal length), detrend, window and transform each one.
    pub fn segment_spectra(&mut self, x: &[f64], nperseg: usize) -> Result<SegmentSpectra, KqError> {
        let n = x.len();
        let nperseg = nperseg.min(n);
        if nperseg == 0 {
            return Err(KqError::NumericDegeneracy("empty signal".to_string()));
        }
        let noverlap = nperseg / 2;
        let step = nperseg - noverlap;
        let n_segments = (n - noverlap) / step;

        let window = hann_periodic(nperseg);
        let n_bins = nperseg / 2 + 1;
        let fft = self.planner.plan_fft_forward(nperseg);

        let mut segments = Vec::with_capacity(n_segments);
        for k in 0..n_segments {
            let chunk = &x[k * step..k * step + nperseg];
            let mean = chunk.iter().sum::<f64>() / nperseg as f64;
            let mut buf: Vec<Complex<f64>> = chunk
                .iter()
                .zip(&window)
                .map(|(&v, &w)| Complex::new((v - mean) * w, 0.0))
                .collect();
            fft.process(&mut buf);
            buf.truncate(n_bins);
            segments.push(buf);
        }

        Ok(SegmentSpectra { nperseg, segments })
    }

    /// Welch power spectral density (V²/Hz)
    pub fn welch(&mut self, x: &[f64], fs: f64, nperseg: usize) -> Result<Spectrum, KqError> {
        let spectra = self.segment_spectra(x, nperseg)?;
        if spectra.n_segments() == 0 {
            return Err(KqError::NumericDegeneracy("no complete Welch segment".to_string()));
        }

        let nperseg = spectra.nperseg;
        let window = hann_periodic(nperseg);
        let scale = 1.0 / (fs * window.iter().map(|w| w * w).sum::<f64>());
        let n_bins = spectra.n_bins();

        let mut psd = vec![0.0; n_bins];
        for segment in &spectra.segments {
            for (acc, c) in psd.iter_mut().zip(segment) {
                *acc += c.norm_sqr();
            }
        }
        let n_segments = spectra.n_segments() as f64;
        for (i, p) in psd.iter_mut().enumerate() {
            *p *= scale / n_segments;
            if is_doubled_bin(i, nperseg) {
                *p *= 2.0;
            }
        }

        Ok(Spectrum {
            freqs: frequencies(nperseg, fs),
            values: psd,
        })
    }

    /// Magnitude-squared coherence of two signals.
    ///
    /// `nperseg` defaults to [`COHERENCE_NPERSEG`], clipped to the signal length.
    pub fn coherence(
        &mut self,
        x: &[f64],
        y: &[f64],
        fs: f64,
        nperseg: Option<usize>,
    ) -> Result<Spectrum, KqError> {
        if x.len() != y.len() {
            return Err(KqError::NumericDegeneracy(format!(
                "coherence inputs differ in length ({} vs {})",
                x.len(),
                y.len()
            )));
        }
        let nperseg = nperseg.unwrap_or(COHERENCE_NPERSEG);
        let sx = self.segment_spectra(x, nperseg)?;
        let sy = self.segment_spectra(y, nperseg)?;
        let values = coherence_from_spectra(&sx, &sy)?;
        Ok(Spectrum {
            freqs: frequencies(sx.nperseg, fs),
            values,
        })
    }

    /// Mean coherence over every unordered pair of `channels`, each pair first
    /// averaged over frequency. Zero when fewer than two channels are given.
    pub fn mean_pairwise_coherence(&mut self, channels: &[Vec<f64>]) -> Result<f64, KqError> {
        if channels.len() < 2 {
            return Ok(0.0);
        }
        let spectra = channels
            .iter()
            .map(|x| self.segment_spectra(x, COHERENCE_NPERSEG))
            .collect::<Result<Vec<_>, _>>()?;

        let mut sum = 0.0;
        let mut pairs = 0usize;
        for i in 0..spectra.len() {
            for j in i + 1..spectra.len() {
                let cxy = coherence_from_spectra(&spectra[i], &spectra[j])?;
                sum += cxy.iter().sum::<f64>() / cxy.len() as f64;
                pairs += 1;
            }
        }
        Ok(sum / pairs as f64)
    }
}

/// `|Pxy|² / (Pxx·Pyy)` per bin. Scaling and one-sided doubling cancel, so raw
/// segment averages are enough. Bins with zero auto-power come out NaN.
fn coherence_from_spectra(sx: &SegmentSpectra, sy: &SegmentSpectra) -> Result<Vec<f64>, KqError> {
    let n_segments = sx.n_segments();
    if n_segments == 0 || n_segments != sy.n_segments() || sx.nperseg != sy.nperseg {
        return Err(KqError::NumericDegeneracy(
            "coherence segments do not line up".to_string(),
        ));
    }
    let n_bins = sx.n_bins();
    let mut pxx = vec![0.0; n_bins];
    let mut pyy = vec![0.0; n_bins];
    let mut pxy = vec![Complex::new(0.0, 0.0); n_bins];
    for (a, b) in sx.segments.iter().zip(&sy.segments) {
        for k in 0..n_bins {
            pxx[k] += a[k].norm_sqr();
            pyy[k] += b[k].norm_sqr();
            pxy[k] += a[k].conj() * b[k];
        }
    }
    Ok((0..n_bins)
        .map(|k| pxy[k].norm_sqr() / (pxx[k] * pyy[k]))
        .collect())
}

/// Shannon entropy of `psd` viewed as a distribution, divided by `log2(bins)`.
///
/// Fails when there are fewer than two bins, a non-finite value, or no power.
pub fn normalized_spectral_entropy(psd: &[f64]) -> Result<f64, KqError> {
    if psd.len() < 2 {
        return Err(KqError::NumericDegeneracy(format!(
            "entropy needs at least 2 bins, got {}",
            psd.len()
        )));
    }
    if psd.iter().any(|p| !p.is_finite()) {
        return Err(KqError::NumericDegeneracy("non-finite spectrum".to_string()));
    }
    let total: f64 = psd.iter().sum();
    if total <= 0.0 {
        return Err(KqError::NumericDegeneracy("spectrum has no power".to_string()));
    }

    let h: f64 = psd
        .iter()
        .map(|&v| {
            let p = v / (total + EPS);
            -p * (p + EPS).log2()
        })
        .sum();
    Ok(h / (psd.len() as f64).log2())
}

/// Periodic Hann window (the DFT-even form used for spectral estimation)
pub fn hann_periodic(n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![1.0];
    }
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f64::consts::PI * i as f64 / n as f64).cos())
        .collect()
}

/// Bin frequencies `k · fs / nperseg` for the one-sided spectrum
pub fn frequencies(nperseg: usize, fs: f64) -> Vec<f64> {
    (0..nperseg / 2 + 1)
        .map(|k| k as f64 * fs / nperseg as f64)
        .collect()
}

// DC is never doubled; neither is Nyquist when the segment length is even
fn is_doubled_bin(i: usize, nperseg: usize) -> bool {
    let last = nperseg / 2;
    i > 0 && (i < last || (i == last && nperseg % 2 == 1))
}
