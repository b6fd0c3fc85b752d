use chrono::NaiveDate;

use crate::config::{FoldOptions, StampPolicy};
use crate::model::{FoldOutcome, FoldSummary, Ledger, LedgerEntry, TerminalRecord, TerminalStatus};
use crate::snapshot::dedupe_last_wins;

/// Fold the current run's terminals into the ledger.
///
/// Returns a new ledger; `ledger` itself is never modified, so a caller
/// that fails before committing still holds the prior state.
///
/// - present + known: descriptive fields refreshed, date stamped with the
///   run date (subject to the stamp policy)
/// - present + new: inserted, seeded from the record
/// - absent: passed through unchanged
pub fn fold(ledger: &Ledger, current: &[TerminalRecord], options: &FoldOptions) -> FoldOutcome {
    let (records, conflicts) = dedupe_last_wins(current.to_vec());
    for c in &conflicts {
        log::warn!("fold: duplicate terminal {} in current run, keeping last ({})", c.terminal_id, c.detail);
    }

    let mut next = ledger.clone();
    let mut summary = FoldSummary::default();

    for record in &records {
        let stamp = should_stamp(record, options.policy);

        match next.get_mut(&record.terminal_id) {
            Some(entry) => {
                refresh_descriptive(entry, record);
                if stamp {
                    entry.last_transaction_date = advance(entry.last_transaction_date, options);
                    summary.stamped += 1;
                } else {
                    summary.refreshed_only += 1;
                }
            }
            None => {
                let date = if stamp {
                    options.run_date
                } else {
                    seed_date(record, options.run_date)
                };
                let mut entry = LedgerEntry::new(record.terminal_id.clone(), date);
                refresh_descriptive(&mut entry, record);
                next.upsert(entry);
                summary.inserted += 1;
            }
        }
    }

    summary.carried_forward = ledger.len() - (summary.stamped + summary.refreshed_only);
    summary.total = next.len();

    FoldOutcome {
        ledger: next,
        summary,
        conflicts,
    }
}

fn should_stamp(record: &TerminalRecord, policy: StampPolicy) -> bool {
    match policy {
        StampPolicy::AllPresent => true,
        StampPolicy::ActiveOnly => record.status == TerminalStatus::Active,
    }
}

/// Dates only move forward unless the caller explicitly allows backdating.
/// An undated entry always takes the stamp.
fn advance(stored: Option<NaiveDate>, options: &FoldOptions) -> Option<NaiveDate> {
    match stored {
        Some(stored) if !options.allow_backdate && stored > options.run_date => Some(stored),
        _ => Some(options.run_date),
    }
}

/// First-sighting date for an unstamped terminal: its last known activity,
/// never later than the run date.
fn seed_date(record: &TerminalRecord, run_date: NaiveDate) -> NaiveDate {
    record
        .last_activity_at
        .map(|at| at.date_naive().min(run_date))
        .unwrap_or(run_date)
}

fn refresh_descriptive(entry: &mut LedgerEntry, record: &TerminalRecord) {
    if record.merchant_name.is_some() {
        entry.merchant_name = record.merchant_name.clone();
    }
    entry.status = Some(record.status);
    entry.connected = Some(record.connected);
}
