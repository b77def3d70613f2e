//! Output encoding
//!
//! This module writes analysis results to disk:
//! - `kq_timeseries.csv`: one row per window
//! - `events_synchronized.tsv`: event tables with global onsets
//! - `run_metadata.json`: description of the run

use crate::config::{AnalysisConfig, FILTER_BAND_HZ};
use crate::error::KqError;
use crate::events::EventTable;
use crate::pipeline::KqAnalysis;
use crate::types::{DerivedWindow, EegBand, Producer, RunMetadata};
use crate::{KQ_VERSION, PRODUCER_NAME};
use chrono::Local;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

/// Timestamp format used in run ids and output directory names
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

pub const TIMESERIES_FILE: &str = "kq_timeseries.csv";
pub const EVENTS_FILE: &str = "events_synchronized.tsv";
pub const METADATA_FILE: &str = "run_metadata.json";

/// Columns appended to the source columns of the events table
const EVENT_TRAILING_COLUMNS: [&str; 3] = ["task", "run", "onset_global"];

/// Time-series CSV header, in column order
pub fn timeseries_columns() -> Vec<String> {
    let mut columns: Vec<String> = [
        "t_start_sec",
        "t_end_sec",
        "t_mid_sec",
        "KQ",
        "C",
        "H_norm",
        "gfp",
        "mean_amplitude",
        "variance",
    ]
    .iter()
    .map(|c| c.to_string())
    .collect();
    for band in EegBand::ALL {
        columns.push(format!("band_power_{}", band.as_str()));
        columns.push(format!("relative_power_{}", band.as_str()));
    }
    columns.extend(["dKQ_dt", "KQ_local_variance", "KQ_zscore"].map(String::from));
    columns
}

/// Files written by one run
#[derive(Debug, Clone, PartialEq)]
pub struct OutputPaths {
    pub directory: PathBuf,
    pub timeseries: PathBuf,
    pub events: Option<PathBuf>,
    pub metadata: PathBuf,
}

/// Encoder for analysis artifacts
pub struct KqEncoder {
    instance_id: String,
    timestamp: String,
}

impl Default for KqEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl KqEncoder {
    /// Create a new encoder with a unique instance ID, stamped with the local time
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
            timestamp: Local::now().format(TIMESTAMP_FORMAT).to_string(),
        }
    }

    /// Create an encoder with a specific instance ID
    pub fn with_instance_id(mut self, instance_id: String) -> Self {
        self.instance_id = instance_id;
        self
    }

    /// Override the run timestamp
    pub fn with_timestamp(mut self, timestamp: String) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// `<dataset_root>/kq_results_<timestamp>`
    pub fn default_output_dir(&self, dataset_root: &Path) -> PathBuf {
        dataset_root.join(format!("kq_results_{}", self.timestamp))
    }

    /// Build the run metadata record
    pub fn build_metadata(&self, config: &AnalysisConfig, analysis: &KqAnalysis) -> RunMetadata {
        let dataset_name = config
            .dataset_root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| config.dataset_root.display().to_string());

        RunMetadata {
            run_id: format!("sub-{}_{}", analysis.subject_id, self.timestamp),
            subject_id: analysis.subject_id.clone(),
            dataset_name,
            analysis_timestamp: self.timestamp.clone(),
            sampling_rate_hz: analysis.sfreq,
            window_length_sec: config.window_sec,
            window_overlap_perc: config.overlap_percent,
            filter_band_hz: [FILTER_BAND_HZ.0, FILTER_BAND_HZ.1],
            channels: analysis.channel_names.clone(),
            total_duration_sec: analysis.total_duration_sec,
            window_count: analysis.windows.len(),
            phases_loaded: analysis.phases.clone(),
            baseline: analysis.baseline.clone(),
            producer: Producer {
                name: PRODUCER_NAME.to_string(),
                version: KQ_VERSION.to_string(),
                instance_id: self.instance_id.clone(),
            },
        }
    }

    /// Write all artifacts into `directory`, creating it if needed
    pub fn write_all(
        &self,
        directory: &Path,
        config: &AnalysisConfig,
        analysis: &KqAnalysis,
    ) -> Result<OutputPaths, KqError> {
        fs::create_dir_all(directory)?;

        let timeseries = directory.join(TIMESERIES_FILE);
        write_timeseries(BufWriter::new(File::create(&timeseries)?), &analysis.windows)?;

        let events = if analysis.events.is_empty() {
            None
        } else {
            let path = directory.join(EVENTS_FILE);
            write_events(BufWriter::new(File::create(&path)?), &analysis.events)?;
            Some(path)
        };

        let metadata = directory.join(METADATA_FILE);
        let record = self.build_metadata(config, analysis);
        write_metadata(BufWriter::new(File::create(&metadata)?), &record)?;

        info!(directory = %directory.display(), windows = analysis.windows.len(), "wrote results");
        Ok(OutputPaths {
            directory: directory.to_path_buf(),
            timeseries,
            events,
            metadata,
        })
    }
}

/// Write the per-window time series as CSV; NaN becomes an empty field
pub fn write_timeseries<W: Write>(writer: W, windows: &[DerivedWindow]) -> Result<(), KqError> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(timeseries_columns())?;
    for w in windows {
        let r = &w.window;
        let mut row = vec![
            r.t_start_sec,
            r.t_end_sec,
            r.t_mid_sec,
            r.kq,
            r.coherence,
            r.entropy,
            r.stats.gfp,
            r.stats.mean_amplitude,
            r.stats.variance,
        ];
        for band in EegBand::ALL {
            row.push(r.stats.band_power.get(band));
            row.push(r.stats.relative_power.get(band));
        }
        row.extend([w.dkq_dt, w.kq_local_variance, w.kq_zscore]);
        csv.write_record(row.into_iter().map(format_value))?;
    }
    csv.flush()?;
    Ok(())
}

/// Write the synchronized events as TSV: source columns, then task, run and global onset
pub fn write_events<W: Write>(writer: W, table: &EventTable) -> Result<(), KqError> {
    let mut tsv = csv::WriterBuilder::new().delimiter(b'\t').from_writer(writer);

    let source: Vec<&str> = table
        .columns
        .iter()
        .map(String::as_str)
        .filter(|c| !EVENT_TRAILING_COLUMNS.contains(c))
        .collect();
    tsv.write_record(source.iter().copied().chain(EVENT_TRAILING_COLUMNS))?;

    for event in &table.events {
        let mut row: Vec<String> = source
            .iter()
            .map(|c| event.fields.get(*c).cloned().unwrap_or_default())
            .collect();
        row.push(event.task.clone());
        row.push(event.run.to_string());
        row.push(event.onset_global.map(format_value).unwrap_or_default());
        tsv.write_record(&row)?;
    }
    tsv.flush()?;
    Ok(())
}

/// Write run metadata as pretty-printed JSON
pub fn write_metadata<W: Write>(mut writer: W, metadata: &RunMetadata) -> Result<(), KqError> {
    serde_json::to_writer_pretty(&mut writer, metadata)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

fn format_value(v: f64) -> String {
    if v.is_nan() {
        String::new()
    } else {
        v.to_string()
    }
}
