//! Core types for the KQ pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: recording segments, the concatenated signal with its phase labels,
//! per-window feature records and their derived metrics.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// One phase's recording after loading and resampling
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Phase label (e.g. `awake_EC`)
    pub phase: String,
    /// Channel names, one per matrix row
    pub channel_names: Vec<String>,
    /// Samples in volts, channels x samples
    pub data: Array2<f64>,
    /// Sampling rate (Hz)
    pub sfreq: f64,
}

impl Segment {
    pub fn n_channels(&self) -> usize {
        self.data.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.data.ncols()
    }

    /// Duration in seconds: samples / sampling rate
    pub fn duration_sec(&self) -> f64 {
        if self.sfreq > 0.0 {
            self.n_samples() as f64 / self.sfreq
        } else {
            0.0
        }
    }
}

/// Position of one phase in the concatenated timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseLabel {
    /// Global start time (seconds)
    pub start_sec: f64,
    /// Global end time (seconds)
    pub end_sec: f64,
    /// Phase name
    pub name: String,
}

impl PhaseLabel {
    pub fn contains(&self, t_sec: f64) -> bool {
        t_sec >= self.start_sec && t_sec <= self.end_sec
    }
}

/// All reconciled segments joined end to end
#[derive(Debug, Clone, PartialEq)]
pub struct ConcatenatedSignal {
    /// Channel names shared by every segment, one per matrix row
    pub channel_names: Vec<String>,
    /// Samples in volts, channels x samples
    pub data: Array2<f64>,
    /// Sampling rate (Hz)
    pub sfreq: f64,
}

impl ConcatenatedSignal {
    pub fn n_channels(&self) -> usize {
        self.data.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.data.ncols()
    }

    /// Total duration in seconds
    pub fn duration_sec(&self) -> f64 {
        if self.sfreq > 0.0 {
            self.n_samples() as f64 / self.sfreq
        } else {
            0.0
        }
    }
}

/// Standard EEG frequency bands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EegBand {
    Delta,
    Theta,
    Alpha,
    Beta,
    Gamma,
}

impl EegBand {
    /// Bands in reporting order
    pub const ALL: [EegBand; 5] = [
        EegBand::Delta,
        EegBand::Theta,
        EegBand::Alpha,
        EegBand::Beta,
        EegBand::Gamma,
    ];

    /// Frequency range in Hz, low edge inclusive, high edge exclusive
    pub fn range_hz(&self) -> (f64, f64) {
        match self {
            EegBand::Delta => (0.5, 4.0),
            EegBand::Theta => (4.0, 8.0),
            EegBand::Alpha => (8.0, 12.0),
            EegBand::Beta => (12.0, 30.0),
            EegBand::Gamma => (30.0, 45.0),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EegBand::Delta => "delta",
            EegBand::Theta => "theta",
            EegBand::Alpha => "alpha",
            EegBand::Beta => "beta",
            EegBand::Gamma => "gamma",
        }
    }
}

/// One value per EEG band
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BandPowers {
    pub delta: f64,
    pub theta: f64,
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

impl BandPowers {
    pub fn get(&self, band: EegBand) -> f64 {
        match band {
            EegBand::Delta => self.delta,
            EegBand::Theta => self.theta,
            EegBand::Alpha => self.alpha,
            EegBand::Beta => self.beta,
            EegBand::Gamma => self.gamma,
        }
    }

    pub fn set(&mut self, band: EegBand, value: f64) {
        match band {
            EegBand::Delta => self.delta = value,
            EegBand::Theta => self.theta = value,
            EegBand::Alpha => self.alpha = value,
            EegBand::Beta => self.beta = value,
            EegBand::Gamma => self.gamma = value,
        }
    }

    /// Sum over all five bands
    pub fn total(&self) -> f64 {
        EegBand::ALL.iter().map(|b| self.get(*b)).sum()
    }
}

/// Amplitude and band-power statistics of one window
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowStats {
    /// Global field power: std across channels per sample, averaged over samples
    pub gfp: f64,
    /// Mean over all channels and samples
    pub mean_amplitude: f64,
    /// Population variance over all channels and samples
    pub variance: f64,
    /// Total power of the averaged spectrum (floored at 1e-12)
    pub total_power: f64,
    /// Absolute power per band
    pub band_power: BandPowers,
    /// Band power divided by total power
    pub relative_power: BandPowers,
}

/// Features of one sliding window
///
/// `kq`, `coherence` and `entropy` are NaN when the window was numerically
/// degenerate; they are never replaced by zero here.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowRecord {
    pub t_start_sec: f64,
    pub t_end_sec: f64,
    pub t_mid_sec: f64,
    /// Composite index: coherence * (1 - entropy)
    pub kq: f64,
    /// Mean pairwise magnitude-squared coherence
    pub coherence: f64,
    /// Normalized spectral entropy in [0, 1]
    pub entropy: f64,
    pub stats: WindowStats,
}

/// A window record together with the metrics that need the full sequence
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DerivedWindow {
    pub window: WindowRecord,
    /// First difference of KQ over the mean midpoint spacing
    pub dkq_dt: f64,
    /// Sample variance of KQ over a centered 5-window neighbourhood
    pub kq_local_variance: f64,
    /// KQ relative to the awake baseline
    pub kq_zscore: f64,
}

/// KQ statistics over the first awake phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub mean: f64,
    pub std: f64,
    /// Phase the statistics were computed over, if any
    pub phase: Option<String>,
    /// Number of windows that contributed
    pub window_count: usize,
}

impl Default for Baseline {
    fn default() -> Self {
        Self {
            mean: 0.0,
            std: 1.0,
            phase: None,
            window_count: 0,
        }
    }
}

/// Producer metadata embedded in run metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Producer {
    pub name: String,
    pub version: String,
    pub instance_id: String,
}

/// Structured record describing one analysis run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: String,
    pub subject_id: String,
    pub dataset_name: String,
    pub analysis_timestamp: String,
    pub sampling_rate_hz: f64,
    pub window_length_sec: f64,
    pub window_overlap_perc: f64,
    pub filter_band_hz: [f64; 2],
    pub channels: Vec<String>,
    pub total_duration_sec: f64,
    pub window_count: usize,
    pub phases_loaded: Vec<PhaseLabel>,
    pub baseline: Baseline,
    pub producer: Producer,
}
