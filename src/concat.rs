//! Segment concatenation
//!
//! Joins reconciled segments end to end and records where each phase lands in
//! the global timeline.

use crate::reconcile::ReconciledSegments;
use crate::types::{ConcatenatedSignal, PhaseLabel, Segment};
use ndarray::{concatenate, Array2, ArrayView2, Axis};
use tracing::info;

/// Phase labels for segments laid out back to back from t = 0
pub fn phase_labels(segments: &[Segment]) -> Vec<PhaseLabel> {
    let mut cursor = 0.0;
    segments
        .iter()
        .map(|segment| {
            let duration = segment.duration_sec();
            let label = PhaseLabel {
                start_sec: cursor,
                end_sec: cursor + duration,
                name: segment.phase.clone(),
            };
            cursor += duration;
            label
        })
        .collect()
}

/// Join reconciled segments along time in load order
pub fn concatenate_segments(reconciled: &ReconciledSegments) -> (ConcatenatedSignal, Vec<PhaseLabel>) {
    let segments = reconciled.segments();
    let channel_names = reconciled.channel_names().to_vec();
    let sfreq = segments.first().map(|s| s.sfreq).unwrap_or(0.0);

    for segment in segments {
        assert_eq!(
            segment.channel_names, channel_names,
            "segment {} does not share the reconciled channel axis",
            segment.phase
        );
        assert_eq!(
            segment.sfreq, sfreq,
            "segment {} was not resampled to the common rate",
            segment.phase
        );
    }

    let views: Vec<ArrayView2<'_, f64>> = segments.iter().map(|s| s.data.view()).collect();
    let data = if views.is_empty() {
        Array2::zeros((channel_names.len(), 0))
    } else {
        concatenate(Axis(1), &views).expect("channel axes asserted identical")
    };

    let labels = phase_labels(segments);
    let signal = ConcatenatedSignal {
        channel_names,
        data,
        sfreq,
    };
    info!(
        phases = labels.len(),
        samples = signal.n_samples(),
        duration_sec = signal.duration_sec(),
        "concatenated segments"
    );
    (signal, labels)
}
