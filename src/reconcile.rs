//! Channel reconciliation
//!
//! Segments recorded in different sessions do not always share the same
//! montage. Concatenation needs one channel axis, so every segment is restricted
//! to the sorted intersection of all channel names.

use crate::error::KqError;
use crate::types::Segment;
use ndarray::Axis;
use std::collections::BTreeSet;
use tracing::info;

/// Minimum common channels: coherence needs at least one pair
pub const MIN_COMMON_CHANNELS: usize = 2;

/// Segments that share an identical, ordered channel axis
#[derive(Debug, Clone)]
pub struct ReconciledSegments {
    channel_names: Vec<String>,
    segments: Vec<Segment>,
}

impl ReconciledSegments {
    pub fn channel_names(&self) -> &[String] {
        &self.channel_names
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }
}

/// Sorted intersection of the channel names of every segment
pub fn common_channels(segments: &[Segment]) -> Vec<String> {
    let mut iter = segments.iter();
    let Some(first) = iter.next() else {
        return Vec::new();
    };
    let mut common: BTreeSet<&str> = first.channel_names.iter().map(String::as_str).collect();
    for segment in iter {
        let names: BTreeSet<&str> = segment.channel_names.iter().map(String::as_str).collect();
        common = common.intersection(&names).copied().collect();
    }
    common.into_iter().map(str::to_string).collect()
}

/// Restrict every segment to the common channel set, in sorted order.
///
/// Returns new segments; the input is left untouched.
pub fn reconcile_channels(
    subject_id: &str,
    segments: &[Segment],
) -> Result<ReconciledSegments, KqError> {
    let channel_names = common_channels(segments);
    if channel_names.len() < MIN_COMMON_CHANNELS {
        return Err(KqError::InsufficientChannels {
            subject: subject_id.to_string(),
            channels: channel_names,
        });
    }

    info!(
        channels = channel_names.len(),
        segments = segments.len(),
        "restricting segments to common channels"
    );

    let segments = segments
        .iter()
        .map(|segment| {
            let rows: Vec<usize> = channel_names
                .iter()
                .filter_map(|name| segment.channel_names.iter().position(|n| n == name))
                .collect();
            Segment {
                phase: segment.phase.clone(),
                channel_names: channel_names.clone(),
                data: segment.data.select(Axis(0), &rows),
                sfreq: segment.sfreq,
            }
        })
        .collect();

    Ok(ReconciledSegments {
        channel_names,
        segments,
    })
}
