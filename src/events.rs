//! Event synchronization
//!
//! Event tables carry onsets relative to the start of their own recording.
//! After concatenation those onsets are shifted by the start of the phase the
//! recording became, giving every event a global onset.

use crate::config::{subject_eeg_dir, PhaseTable};
use crate::error::KqError;
use crate::types::PhaseLabel;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Event category derived from the free-form label fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Awakening,
    Induction,
    Dream,
    Other,
}

/// One row of an event table
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub task: String,
    pub run: u32,
    /// Onset relative to the recording start (NaN when the table says `n/a`)
    pub onset: f64,
    /// Onset in the concatenated timeline, set by synchronization
    pub onset_global: Option<f64>,
    /// All source columns, verbatim
    pub fields: HashMap<String, String>,
}

impl EventRecord {
    /// Label used for categorization: `trial_type`, falling back to `value`
    pub fn label(&self) -> &str {
        ["trial_type", "value"]
            .iter()
            .filter_map(|key| self.fields.get(*key))
            .map(|v| v.trim())
            .find(|v| !v.is_empty() && *v != "n/a")
            .unwrap_or("")
    }

    pub fn kind(&self) -> EventKind {
        let label = self.label().to_lowercase();
        if label.contains("awakening") {
            EventKind::Awakening
        } else if label.contains("dream") {
            EventKind::Dream
        } else if label.contains("induction") {
            EventKind::Induction
        } else {
            EventKind::Other
        }
    }
}

/// All event tables of a subject, concatenated
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventTable {
    /// Union of source columns in first-appearance order
    pub columns: Vec<String>,
    pub events: Vec<EventRecord>,
}

impl EventTable {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn has_onset(&self) -> bool {
        self.columns.iter().any(|c| c == "onset")
    }

    /// Parse one tab-separated table and tag its rows with `(task, run)`
    pub fn parse_tsv(text: &str, task: &str, run: u32) -> Result<EventTable, KqError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .flexible(true)
            .from_reader(text.as_bytes());

        let columns: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();
        if columns.iter().all(|c| c.is_empty()) {
            return Err(KqError::EventTable("table has no header".to_string()));
        }

        let mut events = Vec::new();
        for row in reader.records() {
            let row = row?;
            let fields: HashMap<String, String> = columns
                .iter()
                .cloned()
                .zip(row.iter().map(str::to_string))
                .collect();
            let onset = fields
                .get("onset")
                .and_then(|v| v.trim().parse::<f64>().ok())
                .unwrap_or(f64::NAN);
            events.push(EventRecord {
                task: task.to_string(),
                run,
                onset,
                onset_global: None,
                fields,
            });
        }
        Ok(EventTable { columns, events })
    }

    /// Append another table, extending the column union
    pub fn extend(&mut self, other: EventTable) {
        for column in other.columns {
            if !self.columns.contains(&column) {
                self.columns.push(column);
            }
        }
        self.events.extend(other.events);
    }

    /// Number of events per kind
    pub fn kind_counts(&self) -> HashMap<EventKind, usize> {
        let mut counts = HashMap::new();
        for event in &self.events {
            *counts.entry(event.kind()).or_insert(0) += 1;
        }
        counts
    }
}

/// Read every `(task, run)` event table of a subject that exists.
///
/// Absent tables are skipped; tables that cannot be parsed are skipped with a warning.
pub fn load_event_tables(
    dataset_root: &Path,
    subject_id: &str,
    phases: &PhaseTable,
) -> EventTable {
    let eeg_dir = subject_eeg_dir(dataset_root, subject_id);
    let mut table = EventTable::default();

    for task in &phases.event_tasks {
        for &run in &phases.event_runs {
            let path = eeg_dir.join(phases.event_file_name(subject_id, task, run));
            match read_event_table(&path, task, run) {
                Ok(parsed) => {
                    debug!(task = %task, run, events = parsed.len(), "loaded event table");
                    table.extend(parsed);
                }
                Err(KqError::MissingEventFile(path)) => {
                    debug!(path = %path.display(), "no event table");
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "could not read event table, skipping");
                }
            }
        }
    }
    table
}

fn read_event_table(path: &Path, task: &str, run: u32) -> Result<EventTable, KqError> {
    if !path.exists() {
        return Err(KqError::MissingEventFile(path.to_path_buf()));
    }
    let text = std::fs::read_to_string(path)?;
    EventTable::parse_tsv(&text, task, run)
}

/// Fill `onset_global` of every event: start of the event's phase plus local onset.
///
/// The phase is resolved through the phase table (`sed2` events live in the
/// `pre_run` phases). Events whose phase was not loaded get offset 0.
pub fn synchronize_events(table: &mut EventTable, labels: &[PhaseLabel], phases: &PhaseTable) {
    if table.is_empty() || !table.has_onset() {
        return;
    }

    let starts: HashMap<&str, f64> = labels
        .iter()
        .map(|label| (label.name.as_str(), label.start_sec))
        .collect();

    for event in &mut table.events {
        let start = phases
            .phase_for_event(&event.task, event.run)
            .and_then(|phase| starts.get(phase).copied());
        if start.is_none() {
            debug!(task = %event.task, run = event.run, "event phase not loaded, using offset 0");
        }
        event.onset_global = Some(start.unwrap_or(0.0) + event.onset);
    }
    info!(events = table.len(), "synchronized event times");
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::fs;
    use tempfile::TempDir;

    fn label(start: f64, end: f64, name: &str) -> PhaseLabel {
        PhaseLabel {
            start_sec: start,
            end_sec: end,
            name: name.to_string(),
        }
    }

    #[test]
    fn test_sed2_event_resolves_against_pre_run_start() {
        let mut table =
            EventTable::parse_tsv("onset\tduration\ttrial_type\n10\t0\tawakening\n", "sed2", 2).unwrap();
        let labels = vec![
            label(0.0, 60.0, "awake_EC"),
            label(60.0, 120.0, "sed_run2"),
            label(120.0, 180.0, "pre_run2"),
        ];
        synchronize_events(&mut table, &labels, &PhaseTable::default());
        assert_relative_eq!(table.events[0].onset_global.unwrap(), 130.0);
    }

    #[test]
    fn test_sed_event_resolves_against_sed_run_start() {
        let mut table = EventTable::parse_tsv("onset\ttrial_type\n2.5\tinduction\n", "sed", 1).unwrap();
        let labels = vec![label(0.0, 30.0, "awake_EC"), label(30.0, 90.0, "sed_run1")];
        synchronize_events(&mut table, &labels, &PhaseTable::default());
        assert_relative_eq!(table.events[0].onset_global.unwrap(), 32.5);
    }

    #[test]
    fn test_unloaded_phase_defaults_to_zero_offset() {
        let mut table = EventTable::parse_tsv("onset\n7\n", "sed", 3).unwrap();
        synchronize_events(&mut table, &[label(0.0, 10.0, "awake_EC")], &PhaseTable::default());
        assert_relative_eq!(table.events[0].onset_global.unwrap(), 7.0);
    }

    #[test]
    fn test_missing_onset_column_skips_synchronization() {
        let mut table = EventTable::parse_tsv("sample\tvalue\n100\tdream\n", "sed", 1).unwrap();
        synchronize_events(&mut table, &[label(5.0, 10.0, "sed_run1")], &PhaseTable::default());
        assert_eq!(table.events[0].onset_global, None);
    }

    #[test]
    fn test_na_onset_stays_undefined() {
        let mut table = EventTable::parse_tsv("onset\tvalue\nn/a\tx\n", "sed", 1).unwrap();
        synchronize_events(&mut table, &[label(5.0, 10.0, "sed_run1")], &PhaseTable::default());
        assert!(table.events[0].onset_global.unwrap().is_nan());
    }

    #[test]
    fn test_event_kinds() {
        let table = EventTable::parse_tsv(
            "onset\ttrial_type\tvalue\n1\tAwakening\t\n2\tn/a\tDream report\n3\tLOC induction\t\n4\tbeep\t\n",
            "sed",
            1,
        )
        .unwrap();
        let kinds: Vec<EventKind> = table.events.iter().map(EventRecord::kind).collect();
        assert_eq!(
            kinds,
            vec![EventKind::Awakening, EventKind::Dream, EventKind::Induction, EventKind::Other]
        );
        assert_eq!(table.kind_counts()[&EventKind::Other], 1);
    }

    #[test]
    fn test_load_tables_tags_rows_and_unions_columns() {
        let root = TempDir::new().unwrap();
        let dir = subject_eeg_dir(root.path(), "01");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("sub-01_task-sed_acq-rest_run-1_events.tsv"),
            "onset\tduration\n1.0\t0\n2.0\t0\n",
        )
        .unwrap();
        fs::write(
            dir.join("sub-01_task-sed2_acq-rest_run-3_events.tsv"),
            "onset\ttrial_type\n4.0\tdream\n",
        )
        .unwrap();

        let table = load_event_tables(root.path(), "01", &PhaseTable::default());
        assert_eq!(table.len(), 3);
        assert_eq!(table.columns, vec!["onset", "duration", "trial_type"]);
        assert_eq!((table.events[0].task.as_str(), table.events[0].run), ("sed", 1));
        assert_eq!((table.events[2].task.as_str(), table.events[2].run), ("sed2", 3));
    }

    #[test]
    fn test_no_tables_gives_empty_table() {
        let root = TempDir::new().unwrap();
        let table = load_event_tables(root.path(), "01", &PhaseTable::default());
        assert!(table.is_empty());
    }
}
