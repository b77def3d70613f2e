//! Segment loading
//!
//! Reads every phase recording of a subject that exists on disk, resamples it
//! to the common analysis rate and keeps only good EEG channels.

use crate::adapters::RecordingReader;
use crate::config::{subject_eeg_dir, PhaseTable, TARGET_SFREQ};
use crate::error::KqError;
use crate::signal::resample_fft;
use crate::types::Segment;
use std::path::Path;
use tracing::{error, info, warn};

/// Segment loader bound to a recording reader and a phase table
pub struct SegmentLoader<'a> {
    reader: &'a dyn RecordingReader,
    phases: &'a PhaseTable,
}

impl<'a> SegmentLoader<'a> {
    pub fn new(reader: &'a dyn RecordingReader, phases: &'a PhaseTable) -> Self {
        Self { reader, phases }
    }

    /// Load all available phases of `subject_id` in phase-table order.
    ///
    /// Missing or unreadable recordings are skipped; the result may hold fewer
    /// segments than the table has phases, but never zero.
    pub fn load(&self, dataset_root: &Path, subject_id: &str) -> Result<Vec<Segment>, KqError> {
        let eeg_dir = subject_eeg_dir(dataset_root, subject_id);
        let mut segments = Vec::new();

        for phase in &self.phases.phases {
            let file_name = phase.header_file_name(subject_id);
            let path = eeg_dir.join(&file_name);
            if !path.exists() {
                warn!(phase = %phase.name, file = %file_name, "recording not found, skipping");
                continue;
            }

            let raw = match self.reader.read(&path) {
                Ok(raw) => raw,
                Err(e) => {
                    error!(phase = %phase.name, file = %file_name, error = %e, "failed to load recording");
                    continue;
                }
            };

            let native_sfreq = raw.sfreq;
            let raw = raw.pick_good_eeg();
            if raw.channels.is_empty() {
                error!(phase = %phase.name, file = %file_name, "no good EEG channels, skipping");
                continue;
            }
            let data = resample_fft(&raw.data, native_sfreq, TARGET_SFREQ);

            let segment = Segment {
                phase: phase.name.clone(),
                channel_names: raw.channel_names(),
                data,
                sfreq: TARGET_SFREQ,
            };
            info!(
                phase = %segment.phase,
                channels = segment.n_channels(),
                duration_sec = segment.duration_sec(),
                "loaded segment"
            );
            segments.push(segment);
        }

        if segments.is_empty() {
            return Err(KqError::MissingData {
                subject: subject_id.to_string(),
                path: eeg_dir,
            });
        }
        Ok(segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{write_recording, BrainVisionReader};
    use approx::assert_relative_eq;
    use std::fs;
    use tempfile::TempDir;

    fn subject_dir(root: &Path) -> std::path::PathBuf {
        let dir = subject_eeg_dir(root, "01");
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_missing_phases_are_skipped() {
        let root = TempDir::new().unwrap();
        let dir = subject_dir(root.path());
        write_recording(&dir, "sub-01_task-awake_acq-EC", &["Fz", "Cz"], 500.0, &[vec![0; 1000], vec![0; 1000]]);
        write_recording(&dir, "sub-01_task-sed_acq-rest_run-2", &["Fz", "Cz"], 500.0, &[vec![0; 500], vec![0; 500]]);

        let table = PhaseTable::default();
        let reader = BrainVisionReader;
        let segments = SegmentLoader::new(&reader, &table).load(root.path(), "01").unwrap();

        let phases: Vec<&str> = segments.iter().map(|s| s.phase.as_str()).collect();
        assert_eq!(phases, vec!["awake_EC", "sed_run2"]);
        assert_relative_eq!(segments[0].duration_sec(), 2.0);
        assert_relative_eq!(segments[1].duration_sec(), 1.0);
    }

    #[test]
    fn test_segments_are_resampled_to_target_rate() {
        let root = TempDir::new().unwrap();
        let dir = subject_dir(root.path());
        write_recording(&dir, "sub-01_task-awake_acq-EO", &["Fz", "Cz"], 1000.0, &[vec![5; 2000], vec![-5; 2000]]);

        let table = PhaseTable::default();
        let reader = BrainVisionReader;
        let segments = SegmentLoader::new(&reader, &table).load(root.path(), "01").unwrap();

        assert_eq!(segments[0].sfreq, TARGET_SFREQ);
        assert_eq!(segments[0].n_samples(), 1000);
        assert_relative_eq!(segments[0].duration_sec(), 2.0);
    }

    #[test]
    fn test_unreadable_recording_is_skipped() {
        let root = TempDir::new().unwrap();
        let dir = subject_dir(root.path());
        fs::write(dir.join("sub-01_task-awake_acq-EC_eeg.vhdr"), "not a header").unwrap();
        write_recording(&dir, "sub-01_task-awake_acq-EO", &["Fz", "Cz"], 500.0, &[vec![0; 10], vec![0; 10]]);

        let table = PhaseTable::default();
        let reader = BrainVisionReader;
        let segments = SegmentLoader::new(&reader, &table).load(root.path(), "01").unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].phase, "awake_EO");
    }

    #[test]
    fn test_recording_without_good_eeg_is_skipped() {
        let root = TempDir::new().unwrap();
        let dir = subject_dir(root.path());
        write_recording(&dir, "sub-01_task-awake_acq-EC", &["Cz", "Fz", "Pz"], 500.0, &[vec![1; 100], vec![2; 100], vec![3; 100]]);
        write_recording(&dir, "sub-01_task-awake_acq-EO", &["Cz", "Fz", "Pz"], 500.0, &[vec![1; 100], vec![2; 100], vec![3; 100]]);
        fs::write(
            dir.join("sub-01_task-awake_acq-EO_channels.tsv"),
            "name\ttype\tunits\tstatus\nCz\tEEG\tµV\tbad\nFz\tEEG\tµV\tbad\nPz\tEEG\tµV\tbad\n",
        )
        .unwrap();

        let table = PhaseTable::default();
        let reader = BrainVisionReader;
        let segments = SegmentLoader::new(&reader, &table).load(root.path(), "01").unwrap();
        let phases: Vec<&str> = segments.iter().map(|s| s.phase.as_str()).collect();
        assert_eq!(phases, vec!["awake_EC"]);
        assert_eq!(segments[0].n_channels(), 3);
    }

    #[test]
    fn test_no_recordings_is_missing_data() {
        let root = TempDir::new().unwrap();
        subject_dir(root.path());

        let table = PhaseTable::default();
        let reader = BrainVisionReader;
        let result = SegmentLoader::new(&reader, &table).load(root.path(), "01");
        match result {
            Err(KqError::MissingData { subject, .. }) => assert_eq!(subject, "01"),
            other => panic!("expected MissingData, got {other:?}"),
        }
    }
}
