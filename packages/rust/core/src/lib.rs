//! Core pipelines for IntakeSync.
//!
//! Orchestrates classification (intake sheet → canonical records → staging
//! sheet) and synchronization (staging sheet → remote database).

pub mod classifier;
pub mod lease;
pub mod mapping;
pub mod pipeline;
pub mod records;
pub mod sync;

pub use classifier::{Classifier, ClassifyReport, FieldMap, RowIssue, RowOutcome};
pub use lease::LeaseStore;
pub use pipeline::{
    ClassifyOptions, ClassifyRunResult, ProgressReporter, SilentProgress, SyncRunResult,
    run_classification, run_sync,
};
pub use records::{RecordSet, StagingIssue};
pub use sync::{BatchSummary, RecordOutcome, SyncPhase, Synchronizer};
