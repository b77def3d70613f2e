//! Pipeline orchestration
//!
//! This module provides the public API of the KQ engine.
//! It runs the full chain from a subject's recordings on disk to the derived
//! per-window time series.

use crate::adapters::{BrainVisionReader, RecordingReader};
use crate::baseline::compute_baseline;
use crate::concat::concatenate_segments;
use crate::config::{AnalysisConfig, PhaseTable, FILTER_BAND_HZ, FILTER_ORDER};
use crate::derived::derive_metrics;
use crate::error::KqError;
use crate::events::{load_event_tables, synchronize_events, EventKind, EventTable};
use crate::features::WindowFeatureEngine;
use crate::loader::SegmentLoader;
use crate::reconcile::reconcile_channels;
use crate::signal::BandpassFilter;
use crate::types::{Baseline, ConcatenatedSignal, DerivedWindow, PhaseLabel};
use serde::Serialize;
use tracing::info;

/// Everything one analysis produces, as plain values
#[derive(Debug, Clone)]
pub struct KqAnalysis {
    pub subject_id: String,
    /// Common channels, in matrix row order
    pub channel_names: Vec<String>,
    pub sfreq: f64,
    pub total_duration_sec: f64,
    pub phases: Vec<PhaseLabel>,
    pub events: EventTable,
    pub baseline: Baseline,
    pub windows: Vec<DerivedWindow>,
}

/// Compact description of an analysis, suitable for printing
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisSummary {
    pub subject_id: String,
    pub channels: usize,
    pub total_duration_sec: f64,
    pub phases: Vec<String>,
    pub windows: usize,
    pub degenerate_windows: usize,
    pub mean_kq: Option<f64>,
    pub baseline: Baseline,
    pub events: usize,
    pub awakenings: usize,
    pub inductions: usize,
    pub dream_reports: usize,
}

impl KqAnalysis {
    /// KQ per window, NaN where undefined
    pub fn kq_values(&self) -> Vec<f64> {
        self.windows.iter().map(|w| w.window.kq).collect()
    }

    pub fn summary(&self) -> AnalysisSummary {
        let finite: Vec<f64> = self.kq_values().into_iter().filter(|v| v.is_finite()).collect();
        let mean_kq = if finite.is_empty() {
            None
        } else {
            Some(finite.iter().sum::<f64>() / finite.len() as f64)
        };
        let kinds = self.events.kind_counts();
        let count = |kind: EventKind| kinds.get(&kind).copied().unwrap_or(0);

        AnalysisSummary {
            subject_id: self.subject_id.clone(),
            channels: self.channel_names.len(),
            total_duration_sec: self.total_duration_sec,
            phases: self.phases.iter().map(|p| p.name.clone()).collect(),
            windows: self.windows.len(),
            degenerate_windows: self.windows.len() - finite.len(),
            mean_kq,
            baseline: self.baseline.clone(),
            events: self.events.len(),
            awakenings: count(EventKind::Awakening),
            inductions: count(EventKind::Induction),
            dream_reports: count(EventKind::Dream),
        }
    }
}

/// Analyze one subject with the BrainVision reader and the default phase table.
///
/// # Example
/// ```ignore
/// let config = AnalysisConfig::new("/data/sedation", "1022");
/// let analysis = analyze_subject(&config)?;
/// println!("{} windows", analysis.windows.len());
/// ```
pub fn analyze_subject(config: &AnalysisConfig) -> Result<KqAnalysis, KqError> {
    KqProcessor::new().analyze(config)
}

/// Configurable processor: swap the recording reader or the phase table.
pub struct KqProcessor {
    reader: Box<dyn RecordingReader>,
    phases: PhaseTable,
}

impl Default for KqProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl KqProcessor {
    /// Create a processor with the BrainVision reader and default phases
    pub fn new() -> Self {
        Self {
            reader: Box::new(BrainVisionReader),
            phases: PhaseTable::default(),
        }
    }

    pub fn with_reader(mut self, reader: impl RecordingReader + 'static) -> Self {
        self.reader = Box::new(reader);
        self
    }

    pub fn with_phase_table(mut self, phases: PhaseTable) -> Self {
        self.phases = phases;
        self
    }

    pub fn phase_table(&self) -> &PhaseTable {
        &self.phases
    }

    /// Run the full pipeline for the subject named in `config`.
    ///
    /// Pipeline stages:
    /// 1. SegmentLoader - read and resample every available phase
    /// 2. reconcile_channels - restrict to the common channel set
    /// 3. concatenate_segments - join in load order, label phases
    /// 4. load_event_tables / synchronize_events - global event onsets
    /// 5. analyze_signal - filter, window features, baseline, derived metrics
    pub fn analyze(&self, config: &AnalysisConfig) -> Result<KqAnalysis, KqError> {
        config.validate()?;
        self.phases.validate()?;
        info!(subject = %config.subject_id, root = %config.dataset_root.display(), "starting analysis");

        let segments = SegmentLoader::new(self.reader.as_ref(), &self.phases)
            .load(&config.dataset_root, &config.subject_id)?;
        let reconciled = reconcile_channels(&config.subject_id, &segments)?;
        let (signal, phases) = concatenate_segments(&reconciled);

        let mut events = load_event_tables(&config.dataset_root, &config.subject_id, &self.phases);
        synchronize_events(&mut events, &phases, &self.phases);

        self.analyze_signal(config, signal, phases, events)
    }

    /// Filter an already concatenated signal and compute its window features
    /// and derived metrics. The signal is consumed; filtering happens in place.
    pub fn analyze_signal(
        &self,
        config: &AnalysisConfig,
        mut signal: ConcatenatedSignal,
        phases: Vec<PhaseLabel>,
        events: EventTable,
    ) -> Result<KqAnalysis, KqError> {
        let mut engine = WindowFeatureEngine::new(config.window_sec, config.overlap_percent, signal.sfreq)?;

        let (low_hz, high_hz) = FILTER_BAND_HZ;
        let filter = BandpassFilter::butterworth(FILTER_ORDER, low_hz, high_hz, signal.sfreq)?;
        filter.apply_rows(&mut signal.data);
        info!(low_hz, high_hz, order = FILTER_ORDER, "applied band-pass filter");

        let records = engine.compute(&signal);
        let baseline = compute_baseline(&records, &phases);
        let windows = derive_metrics(&records, &baseline, config.nominal_step_sec());

        Ok(KqAnalysis {
            subject_id: config.subject_id.clone(),
            total_duration_sec: signal.duration_sec(),
            sfreq: signal.sfreq,
            channel_names: signal.channel_names,
            phases,
            events,
            baseline,
            windows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{write_recording, RawRecording};
    use crate::config::subject_eeg_dir;
    use approx::assert_relative_eq;
    use ndarray::Array2;
    use std::f64::consts::PI;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    /// Three channels: a shared 10 Hz rhythm plus a channel-specific tone, in 0.1 µV units
    fn channels(n: usize, sfreq: f64, seed: usize) -> Vec<Vec<i16>> {
        (0..3)
            .map(|c| {
                (0..n)
                    .map(|t| {
                        let time = t as f64 / sfreq;
                        let shared = (2.0 * PI * 10.0 * time).sin();
                        let own = (2.0 * PI * (20.0 + 3.0 * (c + seed) as f64) * time).sin();
                        (1000.0 * shared + 400.0 * own).round() as i16
                    })
                    .collect()
            })
            .collect()
    }

    fn dataset() -> TempDir {
        let root = TempDir::new().unwrap();
        let dir = subject_eeg_dir(root.path(), "01");
        fs::create_dir_all(&dir).unwrap();
        write_recording(&dir, "sub-01_task-awake_acq-EC", &["Cz", "Fz", "Pz"], 500.0, &channels(5000, 500.0, 0));
        write_recording(
            &dir,
            "sub-01_task-sed_acq-rest_run-1",
            &["Pz", "Fz", "Cz", "Oz"],
            1000.0,
            &{
                let mut c = channels(10000, 1000.0, 1);
                c.push(vec![0; 10000]);
                c
            },
        );
        write_recording(&dir, "sub-01_task-sed2_acq-rest_run-1", &["Cz", "Fz", "Pz"], 500.0, &channels(4000, 500.0, 2));
        fs::write(
            dir.join("sub-01_task-sed2_acq-rest_run-1_events.tsv"),
            "onset\tduration\ttrial_type\n3.5\t0\tawakening\n",
        )
        .unwrap();
        root
    }

    #[test]
    fn test_end_to_end_analysis() {
        let root = dataset();
        let config = AnalysisConfig::new(root.path(), "01");
        let analysis = analyze_subject(&config).unwrap();

        assert_eq!(analysis.channel_names, vec!["Cz", "Fz", "Pz"]);
        assert_eq!(analysis.sfreq, 500.0);
        assert_relative_eq!(analysis.total_duration_sec, 28.0);

        let names: Vec<&str> = analysis.phases.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["awake_EC", "sed_run1", "pre_run1"]);
        assert_relative_eq!(analysis.phases[2].start_sec, 20.0);

        // 28 s, 2 s windows every 1 s
        assert_eq!(analysis.windows.len(), 27);
        assert_eq!(analysis.baseline.phase.as_deref(), Some("awake_EC"));
        for w in &analysis.windows {
            let r = &w.window;
            assert_relative_eq!(r.kq, r.coherence * (1.0 - r.entropy), epsilon = 1e-12);
        }

        assert_eq!(analysis.events.len(), 1);
        assert_relative_eq!(analysis.events.events[0].onset_global.unwrap(), 23.5);

        let summary = analysis.summary();
        assert_eq!(summary.awakenings, 1);
        assert_eq!(summary.windows, 27);
    }

    #[test]
    fn test_phase_without_good_channels_is_skipped() {
        let root = TempDir::new().unwrap();
        let dir = subject_eeg_dir(root.path(), "01");
        fs::create_dir_all(&dir).unwrap();
        write_recording(&dir, "sub-01_task-awake_acq-EC", &["Cz", "Fz", "Pz"], 500.0, &channels(3000, 500.0, 0));
        write_recording(&dir, "sub-01_task-awake_acq-EO", &["Cz", "Fz", "Pz"], 500.0, &channels(3000, 500.0, 1));
        fs::write(
            dir.join("sub-01_task-awake_acq-EO_channels.tsv"),
            "name\ttype\tunits\tstatus\nCz\tEEG\tµV\tbad\nFz\tEEG\tµV\tbad\nPz\tEEG\tµV\tbad\n",
        )
        .unwrap();

        let analysis = analyze_subject(&AnalysisConfig::new(root.path(), "01")).unwrap();
        let names: Vec<&str> = analysis.phases.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["awake_EC"]);
        assert_eq!(analysis.channel_names, vec!["Cz", "Fz", "Pz"]);
        assert_eq!(analysis.windows.len(), 5);
    }

    #[test]
    fn test_single_common_channel_aborts_before_windowing() {
        let root = TempDir::new().unwrap();
        let dir = subject_eeg_dir(root.path(), "01");
        fs::create_dir_all(&dir).unwrap();
        write_recording(&dir, "sub-01_task-awake_acq-EC", &["Cz", "Fz"], 500.0, &channels(3000, 500.0, 0)[..2]);
        write_recording(&dir, "sub-01_task-awake_acq-EO", &["Cz", "Pz"], 500.0, &channels(3000, 500.0, 1)[..2]);

        match analyze_subject(&AnalysisConfig::new(root.path(), "01")) {
            Err(KqError::InsufficientChannels { subject, channels }) => {
                assert_eq!(subject, "01");
                assert_eq!(channels, vec!["Cz".to_string()]);
            }
            other => panic!("expected InsufficientChannels, got {other:?}"),
        }
    }

    #[test]
    fn test_processor_keeps_custom_phase_table() {
        let mut table = PhaseTable::default();
        table.phases.truncate(2);
        let processor = KqProcessor::new().with_phase_table(table.clone());
        assert_eq!(processor.phase_table(), &table);
    }

    #[test]
    fn test_missing_subject_is_missing_data() {
        let root = TempDir::new().unwrap();
        let config = AnalysisConfig::new(root.path(), "99");
        assert!(matches!(analyze_subject(&config), Err(KqError::MissingData { .. })));
    }

    #[test]
    fn test_invalid_window_is_rejected_before_loading() {
        let root = dataset();
        let config = AnalysisConfig::new(root.path(), "01").with_window(2.0, 100.0);
        assert!(matches!(analyze_subject(&config), Err(KqError::InvalidConfig(_))));
    }

    struct FixedReader;

    impl RecordingReader for FixedReader {
        fn read(&self, _header_path: &Path) -> Result<RawRecording, KqError> {
            Err(KqError::UnsupportedFormat("fixed".to_string()))
        }
    }

    #[test]
    fn test_custom_reader_failures_skip_every_phase() {
        let root = dataset();
        let processor = KqProcessor::new().with_reader(FixedReader);
        let config = AnalysisConfig::new(root.path(), "01");
        assert!(matches!(processor.analyze(&config), Err(KqError::MissingData { .. })));
    }

    #[test]
    fn test_analyze_signal_short_signal_has_no_windows() {
        let signal = ConcatenatedSignal {
            channel_names: vec!["A".to_string(), "B".to_string()],
            data: Array2::zeros((2, 600)),
            sfreq: 500.0,
        };
        let config = AnalysisConfig::new("/unused", "01");
        let analysis = KqProcessor::new()
            .analyze_signal(&config, signal, Vec::new(), EventTable::default())
            .unwrap();
        assert!(analysis.windows.is_empty());
        assert_eq!(analysis.baseline, Baseline::default());
        assert_eq!(analysis.summary().mean_kq, None);
    }
}
