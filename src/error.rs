//! Error types for the KQ engine

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading or analyzing a recording
#[derive(Debug, Error)]
pub enum KqError {
    #[error("No EEG data loaded for subject {subject}. Check path: {}", .path.display())]
    MissingData { subject: String, path: PathBuf },

    #[error(
        "Coherence requires at least 2 common EEG channels across all recordings; \
         subject {subject} only has {} common channel(s): {channels:?}",
        .channels.len()
    )]
    InsufficientChannels {
        subject: String,
        channels: Vec<String>,
    },

    #[error("Numeric degeneracy: {0}")]
    NumericDegeneracy(String),

    #[error("Event table not found: {}", .0.display())]
    MissingEventFile(PathBuf),

    #[error("Invalid event table: {0}")]
    EventTable(String),

    #[error("Invalid recording header: {0}")]
    Header(String),

    #[error("Unsupported recording format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl KqError {
    /// Fatal errors abort the run; the rest are handled inside the stage that raised them
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            KqError::NumericDegeneracy(_) | KqError::MissingEventFile(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_channels_message_names_subject_and_channels() {
        let err = KqError::InsufficientChannels {
            subject: "1022".to_string(),
            channels: vec!["Cz".to_string()],
        };
        let message = err.to_string();
        assert!(message.contains("1022"));
        assert!(message.contains("1 common channel"));
        assert!(message.contains("Cz"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_local_errors_are_not_fatal() {
        assert!(!KqError::NumericDegeneracy("flat window".to_string()).is_fatal());
        assert!(!KqError::MissingEventFile(PathBuf::from("x.tsv")).is_fatal());
    }
}
