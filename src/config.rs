//! Analysis configuration
//!
//! The caller controls four things: dataset root, subject, window length and
//! overlap. Everything else is a fixed analysis constant. The recording naming
//! convention (which phases exist, in what order, and which event task maps to
//! which phase) lives in [`PhaseTable`] so it can be validated or extended
//! without touching the pipeline.

use crate::error::KqError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Every segment is resampled to this rate before reconciliation (Hz)
pub const TARGET_SFREQ: f64 = 500.0;

/// Butterworth band-pass order
pub const FILTER_ORDER: usize = 5;

/// Band-pass corners (Hz)
pub const FILTER_BAND_HZ: (f64, f64) = (0.5, 45.0);

/// Coherence is computed over at most this many leading channels
pub const COHERENCE_MAX_CHANNELS: usize = 20;

/// Default sliding window length (seconds)
pub const DEFAULT_WINDOW_SEC: f64 = 2.0;

/// Default sliding window overlap (percent)
pub const DEFAULT_OVERLAP_PERCENT: f64 = 50.0;

/// Caller-facing configuration for one subject's analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Root of the BIDS-like dataset (contains `sub-<id>/eeg/`)
    pub dataset_root: PathBuf,
    /// Subject identifier without the `sub-` prefix
    pub subject_id: String,
    /// Sliding window length in seconds
    pub window_sec: f64,
    /// Sliding window overlap in percent (0 <= overlap < 100)
    pub overlap_percent: f64,
}

impl AnalysisConfig {
    /// Create a configuration with the default window (2 s, 50 % overlap)
    pub fn new(dataset_root: impl Into<PathBuf>, subject_id: impl Into<String>) -> Self {
        Self {
            dataset_root: dataset_root.into(),
            subject_id: subject_id.into(),
            window_sec: DEFAULT_WINDOW_SEC,
            overlap_percent: DEFAULT_OVERLAP_PERCENT,
        }
    }

    pub fn with_window(mut self, window_sec: f64, overlap_percent: f64) -> Self {
        self.window_sec = window_sec;
        self.overlap_percent = overlap_percent;
        self
    }

    /// Reject window settings that cannot produce a terminating sliding window
    pub fn validate(&self) -> Result<(), KqError> {
        if self.subject_id.trim().is_empty() {
            return Err(KqError::InvalidConfig("subject id is empty".to_string()));
        }
        validate_window(self.window_sec, self.overlap_percent)
    }

    /// `<root>/sub-<id>/eeg`
    pub fn eeg_dir(&self) -> PathBuf {
        subject_eeg_dir(&self.dataset_root, &self.subject_id)
    }

    /// Window step expressed in seconds, used when midpoint spacing is unavailable
    pub fn nominal_step_sec(&self) -> f64 {
        self.window_sec * (1.0 - self.overlap_percent / 100.0)
    }
}

pub(crate) fn validate_window(window_sec: f64, overlap_percent: f64) -> Result<(), KqError> {
    if !(window_sec.is_finite() && window_sec > 0.0) {
        return Err(KqError::InvalidConfig(format!(
            "window length must be positive, got {window_sec}"
        )));
    }
    if !(0.0..100.0).contains(&overlap_percent) {
        return Err(KqError::InvalidConfig(format!(
            "overlap must be in [0, 100), got {overlap_percent}"
        )));
    }
    Ok(())
}

/// `<root>/sub-<id>/eeg`
pub fn subject_eeg_dir(dataset_root: &Path, subject_id: &str) -> PathBuf {
    dataset_root.join(format!("sub-{subject_id}")).join("eeg")
}

/// One recording phase and the file naming fields that locate it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseSpec {
    /// Phase label used in the concatenated timeline (e.g. `sed_run1`)
    pub name: String,
    /// BIDS task entity
    pub task: String,
    /// BIDS acquisition entity
    pub acq: String,
    /// BIDS run entity, absent for single-run tasks
    pub run: Option<u32>,
}

impl PhaseSpec {
    pub fn new(name: &str, task: &str, acq: &str, run: Option<u32>) -> Self {
        Self {
            name: name.to_string(),
            task: task.to_string(),
            acq: acq.to_string(),
            run,
        }
    }

    /// Recording header file name for a subject
    pub fn header_file_name(&self, subject_id: &str) -> String {
        match self.run {
            Some(run) => format!(
                "sub-{subject_id}_task-{}_acq-{}_run-{run}_eeg.vhdr",
                self.task, self.acq
            ),
            None => format!("sub-{subject_id}_task-{}_acq-{}_eeg.vhdr", self.task, self.acq),
        }
    }
}

/// Ordered phase list plus the event table layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTable {
    /// Phases in concatenation order
    pub phases: Vec<PhaseSpec>,
    /// Tasks that carry event tables
    pub event_tasks: Vec<String>,
    /// Runs probed for each event task
    pub event_runs: Vec<u32>,
    /// Acquisition entity of the event tables
    pub event_acq: String,
}

impl Default for PhaseTable {
    /// Awake (eyes closed, eyes open), three sedation runs, then three runs of
    /// the second sedation task which are labelled `pre_run<n>`.
    fn default() -> Self {
        Self {
            phases: vec![
                PhaseSpec::new("awake_EC", "awake", "EC", None),
                PhaseSpec::new("awake_EO", "awake", "EO", None),
                PhaseSpec::new("sed_run1", "sed", "rest", Some(1)),
                PhaseSpec::new("sed_run2", "sed", "rest", Some(2)),
                PhaseSpec::new("sed_run3", "sed", "rest", Some(3)),
                PhaseSpec::new("pre_run1", "sed2", "rest", Some(1)),
                PhaseSpec::new("pre_run2", "sed2", "rest", Some(2)),
                PhaseSpec::new("pre_run3", "sed2", "rest", Some(3)),
            ],
            event_tasks: vec!["sed".to_string(), "sed2".to_string()],
            event_runs: vec![1, 2, 3],
            event_acq: "rest".to_string(),
        }
    }
}

impl PhaseTable {
    /// Phase name whose recording holds events of `(task, run)`
    pub fn phase_for_event(&self, task: &str, run: u32) -> Option<&str> {
        self.phases
            .iter()
            .find(|p| p.task == task && p.run == Some(run))
            .map(|p| p.name.as_str())
    }

    /// Event table file name for a subject
    pub fn event_file_name(&self, subject_id: &str, task: &str, run: u32) -> String {
        format!(
            "sub-{subject_id}_task-{task}_acq-{}_run-{run}_events.tsv",
            self.event_acq
        )
    }

    /// Check the table is usable: unique phase names, every event task/run resolvable
    pub fn validate(&self) -> Result<(), KqError> {
        if self.phases.is_empty() {
            return Err(KqError::InvalidConfig("phase table is empty".to_string()));
        }
        for (i, phase) in self.phases.iter().enumerate() {
            if self.phases[..i].iter().any(|p| p.name == phase.name) {
                return Err(KqError::InvalidConfig(format!(
                    "duplicate phase name {}",
                    phase.name
                )));
            }
        }
        for task in &self.event_tasks {
            for &run in &self.event_runs {
                if self.phase_for_event(task, run).is_none() {
                    return Err(KqError::InvalidConfig(format!(
                        "event task {task} run {run} has no phase"
                    )));
                }
            }
        }
        Ok(())
    }
}
