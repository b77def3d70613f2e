//! KQ Engine - composite anesthetic-depth index from multi-channel EEG
//!
//! The engine turns a subject's per-phase EEG recordings into a time-resolved
//! index through a deterministic pipeline: segment loading → channel
//! reconciliation → concatenation → band-pass filtering → sliding window
//! features → baseline and derived metrics → output encoding.
//!
//! ## Modules
//!
//! - **Signal path**: `loader`, `reconcile`, `concat`, `signal`
//! - **Analysis**: `spectral`, `features`, `baseline`, `derived`
//! - **Events**: `events` aligns clinical event tables with the joined timeline

pub mod adapters;
pub mod baseline;
pub mod concat;
pub mod config;
pub mod derived;
pub mod encoder;
pub mod error;
pub mod events;
pub mod features;
pub mod loader;
pub mod pipeline;
pub mod reconcile;
pub mod signal;
pub mod spectral;
pub mod types;

pub use config::{AnalysisConfig, PhaseSpec, PhaseTable};
pub use encoder::KqEncoder;
pub use error::KqError;
pub use pipeline::{analyze_subject, AnalysisSummary, KqAnalysis, KqProcessor};

/// Engine version embedded in run metadata
pub const KQ_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for run metadata
pub const PRODUCER_NAME: &str = "kq-engine";
