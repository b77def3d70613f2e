//! Recording adapters
//!
//! This module provides readers that parse on-disk EEG recordings and map them
//! to a format-agnostic raw recording.

mod brainvision;

pub use brainvision::BrainVisionReader;

#[cfg(test)]
pub(crate) use brainvision::tests::write_recording;

use crate::error::KqError;
use ndarray::{Array2, Axis};
use std::path::Path;

/// Channel classification as reported by the recording metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Eeg,
    Misc,
}

/// Per-channel metadata
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelInfo {
    pub name: String,
    pub kind: ChannelKind,
    /// Flagged defective by the recording metadata
    pub bad: bool,
}

/// A recording as read from disk: every channel, native sampling rate
#[derive(Debug, Clone)]
pub struct RawRecording {
    pub channels: Vec<ChannelInfo>,
    /// Samples in volts, channels x samples
    pub data: Array2<f64>,
    pub sfreq: f64,
}

impl RawRecording {
    /// Keep only EEG channels that are not flagged bad
    pub fn pick_good_eeg(self) -> RawRecording {
        let keep: Vec<usize> = self
            .channels
            .iter()
            .enumerate()
            .filter(|(_, ch)| ch.kind == ChannelKind::Eeg && !ch.bad)
            .map(|(i, _)| i)
            .collect();

        RawRecording {
            channels: keep.iter().map(|&i| self.channels[i].clone()).collect(),
            data: self.data.select(Axis(0), &keep),
            sfreq: self.sfreq,
        }
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|ch| ch.name.clone()).collect()
    }
}

/// Trait for recording readers
pub trait RecordingReader {
    /// Read the recording whose header lives at `header_path`
    fn read(&self, header_path: &Path) -> Result<RawRecording, KqError>;
}
