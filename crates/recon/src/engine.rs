use chrono::{DateTime, Utc};

use crate::activity::ActivityObservations;
use crate::config::{FoldOptions, SnapshotLayout};
use crate::error::ReconError;
use crate::ledger::fold;
use crate::model::{FoldOutcome, Ledger, Reconciled, RunMeta, RunReport, SnapshotLoad};
use crate::reconcile::reconcile;
use crate::snapshot::load_snapshot;

/// Everything one cycle needs, already fetched by the caller.
pub struct CycleInput<'a> {
    pub raw: &'a crate::model::RawTable,
    pub layout: &'a SnapshotLayout,
    /// `None` when the activity source was unavailable.
    pub activity: Option<&'a ActivityObservations>,
    pub ledger: &'a Ledger,
    pub fold: FoldOptions,
    pub window_days: u32,
    pub now: DateTime<Utc>,
}

pub struct CycleOutput {
    pub load: SnapshotLoad,
    pub reconciled: Reconciled,
    pub outcome: FoldOutcome,
    pub report: RunReport,
}

/// Load → reconcile → fold. Pure: the caller commits `outcome.ledger`.
///
/// Snapshot errors abort before the fold, so the caller's ledger is
/// never touched on a fatal error.
pub fn run(input: &CycleInput<'_>) -> Result<CycleOutput, ReconError> {
    let load = load_snapshot(input.raw, input.layout)?;
    if load.skipped_rows > 0 {
        log::warn!("skipped {} registered rows with a blank terminal ID", load.skipped_rows);
    }

    let reconciled = reconcile(&load.snapshot, input.activity);
    let outcome = fold(input.ledger, &reconciled.records, &input.fold);

    let mut conflicts = load.conflicts.clone();
    conflicts.extend(outcome.conflicts.iter().cloned());

    let report = RunReport {
        meta: RunMeta {
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            run_date: input.fold.run_date,
            run_at: input.now.to_rfc3339(),
            window_days: input.window_days,
            status_source: reconciled.status_source,
        },
        reconcile: reconciled.summary.clone(),
        fold: outcome.summary.clone(),
        conflicts,
        published_revision: None,
    };

    Ok(CycleOutput {
        load,
        reconciled,
        outcome,
        report,
    })
}
