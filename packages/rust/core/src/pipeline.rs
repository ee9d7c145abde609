//! The two batch pipelines: classify (intake → staging) and sync (staging →
//! remote database). They share no state and can be run independently.

use std::time::{Duration, Instant};

use serde_json::json;
use tracing::{info, instrument, warn};

use intakesync_sheets::TabularStore;
use intakesync_shared::{AppConfig, Result, STAGING_HEADERS, StagingPolicy};
use intakesync_storage::Storage;

use crate::classifier::{ClassifyReport, Classifier};
use crate::records::{RecordSet, StagingIssue};
use crate::sync::{BatchSummary, RecordOutcome, Synchronizer};

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called after each record has been synchronized.
    fn record_synced(&self, outcome: &RecordOutcome, current: usize, total: usize);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn record_synced(&self, _outcome: &RecordOutcome, _current: usize, _total: usize) {}
}

// ---------------------------------------------------------------------------
// Classify
// ---------------------------------------------------------------------------

/// Where the classify pipeline reads and writes.
#[derive(Debug, Clone)]
pub struct ClassifyOptions {
    pub intake_sheet: String,
    pub staging_sheet: String,
    pub policy: StagingPolicy,
}

impl ClassifyOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            intake_sheet: config.workbook.intake_sheet.clone(),
            staging_sheet: config.workbook.staging_sheet.clone(),
            policy: config.staging.policy,
        }
    }
}

/// Result of the classify pipeline.
#[derive(Debug)]
pub struct ClassifyRunResult {
    /// Classification report; records carry any merged manual fields.
    pub report: ClassifyReport,
    /// Records that picked up manual fields from the previous staging sheet.
    pub merged: usize,
    /// Unreadable rows of the previous staging sheet, ignored by the merge.
    pub previous_issues: Vec<StagingIssue>,
    /// Ledger run id, when the run was recorded.
    pub run_id: Option<String>,
    pub elapsed: Duration,
}

/// Classify the intake sheet and rewrite the staging sheet.
///
/// 1. Read intake rows
/// 2. Classify
/// 3. Merge manual fields from the current staging sheet (merge policy)
/// 4. Blank the old staging rows and write the new ones
#[instrument(skip_all, fields(intake = %opts.intake_sheet, staging = %opts.staging_sheet))]
pub async fn run_classification(
    store: &dyn TabularStore,
    classifier: &Classifier,
    opts: &ClassifyOptions,
    ledger: Option<&Storage>,
    progress: &dyn ProgressReporter,
) -> Result<ClassifyRunResult> {
    let start = Instant::now();
    let run_id = begin_run(ledger, "classify").await;

    // --- Phase 1: Read intake ---
    progress.phase("Reading intake sheet");
    let intake = store.read_all(&opts.intake_sheet)?;
    info!(rows = intake.rows.len(), "intake sheet read");

    // --- Phase 2: Classify ---
    progress.phase("Classifying rows");
    let mut report = classifier.classify_batch(&intake.headers, &intake.rows);

    // --- Phase 3: Merge with the previous staging sheet ---
    progress.phase("Writing staging sheet");
    store.ensure_header(&opts.staging_sheet, &STAGING_HEADERS)?;
    let staging = store.read_all(&opts.staging_sheet)?;

    let (merged, previous_issues) = match opts.policy {
        StagingPolicy::Merge => {
            let (previous, issues) = RecordSet::from_staging(&staging)?;
            for issue in &issues {
                warn!(row = issue.row, reason = %issue.message, "previous staging row ignored");
            }
            (report.records.merge_manual_fields(&previous), issues)
        }
        StagingPolicy::Replace => (0, Vec::new()),
    };

    // --- Phase 4: Overwrite staging rows ---
    if !staging.rows.is_empty() {
        store.clear_rows(&opts.staging_sheet, 2, staging.rows.len())?;
    }
    let rows = report.records.render_rows(&staging.headers);
    store.write_rows(&opts.staging_sheet, 2, &rows)?;

    let elapsed = start.elapsed();
    let stats = json!({
        "rows": report.total(),
        "classified": report.records.len(),
        "discarded": report.discarded.len(),
        "failed": report.failed.len(),
        "merged": merged,
    });
    if let (Some(storage), Some(id)) = (ledger, &run_id) {
        complete_run(storage, id, &stats, &[]).await;
    }

    info!(
        classified = report.records.len(),
        discarded = report.discarded.len(),
        failed = report.failed.len(),
        merged,
        elapsed_ms = elapsed.as_millis(),
        "classify pipeline complete"
    );

    Ok(ClassifyRunResult {
        report,
        merged,
        previous_issues,
        run_id,
        elapsed,
    })
}

// ---------------------------------------------------------------------------
// Sync
// ---------------------------------------------------------------------------

/// Result of the sync pipeline.
#[derive(Debug)]
pub struct SyncRunResult {
    pub summary: BatchSummary,
    /// Staging rows that were not synchronized.
    pub staging_issues: Vec<StagingIssue>,
    pub run_id: Option<String>,
    pub elapsed: Duration,
}

/// Push every valid staging row to the remote database.
#[instrument(skip_all, fields(staging = %staging_sheet, database_id = %synchronizer.database_id()))]
pub async fn run_sync(
    store: &dyn TabularStore,
    synchronizer: &Synchronizer,
    staging_sheet: &str,
    ledger: Option<&Storage>,
    progress: &dyn ProgressReporter,
) -> Result<SyncRunResult> {
    let start = Instant::now();
    let run_id = begin_run(ledger, "sync").await;

    progress.phase("Reading staging sheet");
    let sheet = store.read_all(staging_sheet)?;
    let (records, staging_issues) = RecordSet::from_staging(&sheet)?;
    for issue in &staging_issues {
        warn!(row = issue.row, reason = %issue.message, "staging row not synchronized");
    }
    info!(records = records.len(), invalid = staging_issues.len(), "staging sheet read");

    progress.phase("Synchronizing records");
    let summary = synchronizer.sync_batch(&records, progress).await;

    let elapsed = start.elapsed();
    let mut stats = summary.stats_json();
    stats["invalid_rows"] = json!(staging_issues.len());
    if let (Some(storage), Some(id)) = (ledger, &run_id) {
        complete_run(storage, id, &stats, &summary.outcomes).await;
    }

    info!(
        created = summary.created,
        updated = summary.updated,
        skipped = summary.skipped,
        failed = summary.failed,
        elapsed_ms = elapsed.as_millis(),
        "sync pipeline complete"
    );

    Ok(SyncRunResult {
        summary,
        staging_issues,
        run_id,
        elapsed,
    })
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

// Ledger failures are logged and never fail the run. A run that aborts keeps
// its row with no `finished_at`.

async fn begin_run(ledger: Option<&Storage>, pipeline: &str) -> Option<String> {
    match ledger?.insert_run(pipeline).await {
        Ok(id) => Some(id),
        Err(e) => {
            warn!(pipeline, error = %e, "failed to record run in ledger");
            None
        }
    }
}

async fn complete_run(
    storage: &Storage,
    run_id: &str,
    stats: &serde_json::Value,
    outcomes: &[RecordOutcome],
) {
    for outcome in outcomes {
        if let Err(e) = storage
            .insert_outcome(
                run_id,
                outcome.id(),
                outcome.label(),
                outcome.page_id(),
                outcome.detail().as_deref(),
            )
            .await
        {
            warn!(run_id, id = outcome.id(), error = %e, "failed to record outcome");
        }
    }

    if let Err(e) = storage.finish_run(run_id, &stats.to_string()).await {
        warn!(run_id, error = %e, "failed to finish ledger run");
    }
}
