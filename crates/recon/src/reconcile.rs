use crate::activity::ActivityObservations;
use crate::dates::parse_last_seen;
use crate::model::{ReconcileSummary, Reconciled, Snapshot, StatusSource, TerminalRecord, TerminalStatus};

/// Merge the snapshot with recent activity.
///
/// With activity, a terminal is ACTIVE iff it has an observation in the
/// window; this overrides the snapshot's provisional status. Without
/// activity (source down or disabled) the provisional status stands.
///
/// `last_activity_at` prefers the observed timestamp, then the snapshot's
/// last-seen cell, else stays unset. Pure: no clock reads.
pub fn reconcile(snapshot: &Snapshot, activity: Option<&ActivityObservations>) -> Reconciled {
    let records: Vec<TerminalRecord> = snapshot
        .records
        .iter()
        .map(|record| reconcile_record(record, activity))
        .collect();

    let summary = summarize(&records);

    Reconciled {
        records,
        status_source: if activity.is_some() {
            StatusSource::Activity
        } else {
            StatusSource::Snapshot
        },
        summary,
    }
}

fn reconcile_record(record: &TerminalRecord, activity: Option<&ActivityObservations>) -> TerminalRecord {
    let observed = activity.and_then(|obs| obs.get(&record.terminal_id));

    let status = match activity {
        Some(_) => TerminalStatus::from_presence(observed.is_some()),
        None => record.status,
    };

    let last_activity_at = observed.or_else(|| record.last_seen.as_deref().and_then(parse_last_seen));

    TerminalRecord {
        status,
        last_activity_at,
        ..record.clone()
    }
}

fn summarize(records: &[TerminalRecord]) -> ReconcileSummary {
    let mut summary = ReconcileSummary {
        total: records.len(),
        ..ReconcileSummary::default()
    };
    for r in records {
        match r.status {
            TerminalStatus::Active => summary.active += 1,
            TerminalStatus::Inactive => summary.inactive += 1,
        }
        if r.connected {
            summary.connected += 1;
        }
        if r.last_activity_at.is_some() {
            summary.dated += 1;
        } else {
            summary.undated += 1;
        }
    }
    summary
}
