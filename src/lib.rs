//! Cycle statistics for an on-device period tracker.
//!
//! Logged days live in a [`CycleHistory`] keyed by date. The functions in
//! [`prediction`] turn a history snapshot into [`DerivedMetrics`]: average
//! cycle length, next period and ovulation estimates, and a phase breakdown.
//! [`Tracker`] keeps a history in sync with a host-provided [`KeyValueStore`].

pub mod models;
pub mod prediction;
pub mod storage;
pub mod tracker;

pub use models::{
    CycleEntry, CycleHistory, DerivedMetrics, Flow, Pain, Phase, PhaseAggregation,
    PhaseBreakdown, Settings, Spotting,
};
pub use prediction::{
    average_cycle_length, compute_phase_breakdown, compute_phase_breakdown_with, derive_metrics,
    derive_metrics_windowed, format_display_date, predict_next_period_date,
    predict_ovulation_date, prediction_label, NO_DATA_MESSAGE,
};
pub use storage::{FileStore, KeyValueStore, MemoryStore, StorageError};
pub use tracker::{Tracker, TrackerError};
