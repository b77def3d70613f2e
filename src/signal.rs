//! Time-domain signal transforms
//!
//! - FFT resampling of a multi-channel matrix to a new rate
//! - Butterworth band-pass design and causal application

use crate::error::KqError;
use ndarray::{Array2, ArrayViewMut1, Axis};
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use sci_rs::signal::filter::design::{
    butter_dyn, DigitalFilter, FilterBandType, FilterOutputType, Sos, SosFormatFilter,
};
use sci_rs::signal::filter::sosfilt_dyn;
use tracing::debug;

/// Resample every channel (row) from `sfreq` to `target_sfreq` in the frequency domain.
///
/// The output length is `round(n * target_sfreq / sfreq)`. The spectrum is
/// truncated (downsampling) or zero padded (upsampling); the Nyquist bin of an
/// even-length spectrum is folded or split between both halves.
pub fn resample_fft(data: &Array2<f64>, sfreq: f64, target_sfreq: f64) -> Array2<f64> {
    let (n_channels, n_in) = data.dim();
    if n_in == 0 || (sfreq - target_sfreq).abs() < f64::EPSILON {
        return data.clone();
    }
    let n_out = (n_in as f64 * target_sfreq / sfreq).round() as usize;
    if n_out == 0 {
        return Array2::zeros((n_channels, 0));
    }

    debug!(n_channels, n_in, n_out, sfreq, target_sfreq, "resampling");

    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(n_in);
    let ifft = planner.plan_fft_inverse(n_out);

    let mut out = Array2::<f64>::zeros((n_channels, n_out));
    for (row_in, mut row_out) in data.axis_iter(Axis(0)).zip(out.axis_iter_mut(Axis(0))) {
        let mut spectrum: Vec<Complex<f64>> =
            row_in.iter().map(|&x| Complex::new(x, 0.0)).collect();
        fft.process(&mut spectrum);

        let mut resized = resize_spectrum(&spectrum, n_out);
        ifft.process(&mut resized);

        // rustfft's inverse is unnormalized: y = ifft(Y) * n_out / n_in = raw / n_in
        for (dst, src) in row_out.iter_mut().zip(resized.iter()) {
            *dst = src.re / n_in as f64;
        }
    }
    out
}

fn resize_spectrum(x: &[Complex<f64>], n_out: usize) -> Vec<Complex<f64>> {
    let n_in = x.len();
    let n = n_in.min(n_out);
    let nyq = n / 2 + 1;
    let mut y = vec![Complex::new(0.0, 0.0); n_out];

    // Positive frequencies (and Nyquist, if present)
    y[..nyq].copy_from_slice(&x[..nyq]);
    // Negative frequencies
    if n > 2 {
        let tail = n - nyq;
        y[n_out - tail..].copy_from_slice(&x[n_in - tail..]);
    }

    if n % 2 == 0 {
        let half = n / 2;
        if n_out < n_in {
            y[n_out - half] += x[n_in - half];
        } else if n_in < n_out {
            y[half] *= 0.5;
            y[n_out - half] = y[half];
        }
    }
    y
}

/// Butterworth band-pass as second-order sections
#[derive(Debug, Clone)]
pub struct BandpassFilter {
    sections: Vec<Sos<f64>>,
}

impl BandpassFilter {
    /// Design an `order`-th order band-pass with corners in Hz, normalized by Nyquist
    pub fn butterworth(order: usize, low_hz: f64, high_hz: f64, sfreq: f64) -> Result<Self, KqError> {
        let nyquist = 0.5 * sfreq;
        if !(low_hz > 0.0 && low_hz < high_hz && high_hz < nyquist) {
            return Err(KqError::InvalidConfig(format!(
                "band-pass {low_hz}-{high_hz} Hz is not inside (0, {nyquist}) Hz"
            )));
        }

        let filter = butter_dyn(
            order,
            vec![low_hz / nyquist, high_hz / nyquist],
            Some(FilterBandType::Bandpass),
            Some(false),
            Some(FilterOutputType::Sos),
            None,
        );
        let DigitalFilter::Sos(SosFormatFilter { sos }) = filter else {
            return Err(KqError::InvalidConfig(
                "Butterworth design did not return second-order sections".to_string(),
            ));
        };
        Ok(Self { sections: sos })
    }

    /// Filter one channel causally from zero initial state
    pub fn apply(&self, mut channel: ArrayViewMut1<'_, f64>) {
        let mut sections = self.sections.clone();
        let filtered: Vec<f64> = sosfilt_dyn(channel.iter().copied(), &mut sections);
        for (dst, src) in channel.iter_mut().zip(filtered) {
            *dst = src;
        }
    }

    /// Filter every row of `data` in place
    pub fn apply_rows(&self, data: &mut Array2<f64>) {
        for row in data.axis_iter_mut(Axis(0)) {
            self.apply(row);
        }
    }
}
