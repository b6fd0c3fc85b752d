use std::collections::{HashMap, HashSet};

use crate::config::SnapshotLayout;
use crate::error::ReconError;
use crate::model::{KeyConflict, Partition, RawTable, Snapshot, SnapshotLoad, TerminalRecord, TerminalStatus};

/// Normalize the raw RCA workbook into one record per registered terminal.
///
/// `connected` and the provisional `status` are membership tests against the
/// CONNECTED and ACTIVE partitions. Extra columns are ignored.
pub fn load_snapshot(raw: &RawTable, layout: &SnapshotLayout) -> Result<SnapshotLoad, ReconError> {
    let registered = require_partition(raw, &layout.registered)?;
    let connected = require_partition(raw, &layout.connected)?;
    let active = require_partition(raw, &layout.active)?;

    let id_idx = require_column(registered, &layout.terminal_id_column)?;
    let merchant_idx = require_column(registered, &layout.merchant_column)?;
    let last_seen_idx = registered.column_index(&layout.last_seen_column);

    let connected_ids = id_set(connected, &layout.terminal_id_column)?;
    let active_ids = id_set(active, &layout.terminal_id_column)?;

    let mut rows = Vec::with_capacity(registered.rows.len());
    let mut skipped_rows = 0;

    for row in 0..registered.rows.len() {
        let terminal_id = normalize_id(registered.cell(row, id_idx));
        if terminal_id.is_empty() {
            skipped_rows += 1;
            continue;
        }

        let merchant_name = non_blank(registered.cell(row, merchant_idx));
        let last_seen = last_seen_idx.and_then(|i| non_blank(registered.cell(row, i)));

        rows.push(TerminalRecord {
            connected: connected_ids.contains(&terminal_id),
            status: TerminalStatus::from_presence(active_ids.contains(&terminal_id)),
            terminal_id,
            merchant_name,
            last_seen,
            last_activity_at: None,
        });
    }

    if rows.is_empty() {
        return Err(ReconError::EmptyInput {
            partition: registered.name.clone(),
        });
    }

    let (records, conflicts) = dedupe_last_wins(rows);

    if layout.strict_keys {
        if let Some(c) = conflicts.first() {
            return Err(ReconError::ConflictingKey {
                terminal_id: c.terminal_id.clone(),
                detail: c.detail.clone(),
            });
        }
    }

    for c in &conflicts {
        log::warn!("duplicate terminal {} ({} rows), keeping last: {}", c.terminal_id, c.occurrences, c.detail);
    }

    Ok(SnapshotLoad {
        snapshot: Snapshot { records },
        conflicts,
        skipped_rows,
    })
}

/// Collapse duplicate terminal IDs, keeping the last row in the position of
/// the first sighting. Duplicates whose descriptive data differs are reported.
pub fn dedupe_last_wins(rows: Vec<TerminalRecord>) -> (Vec<TerminalRecord>, Vec<KeyConflict>) {
    let mut position: HashMap<String, usize> = HashMap::new();
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut contradicted: Vec<String> = Vec::new();
    let mut details: HashMap<String, String> = HashMap::new();
    let mut records: Vec<TerminalRecord> = Vec::with_capacity(rows.len());

    for record in rows {
        *counts.entry(record.terminal_id.clone()).or_insert(0) += 1;
        match position.get(&record.terminal_id) {
            Some(&i) => {
                if records[i].contradicts(&record) {
                    let detail = describe_difference(&records[i], &record);
                    if !details.contains_key(&record.terminal_id) {
                        contradicted.push(record.terminal_id.clone());
                    }
                    details.insert(record.terminal_id.clone(), detail);
                }
                records[i] = record;
            }
            None => {
                position.insert(record.terminal_id.clone(), records.len());
                records.push(record);
            }
        }
    }

    let conflicts = contradicted
        .into_iter()
        .map(|terminal_id| KeyConflict {
            occurrences: counts.get(&terminal_id).copied().unwrap_or(0),
            detail: details.remove(&terminal_id).unwrap_or_default(),
            terminal_id,
        })
        .collect();

    (records, conflicts)
}

fn describe_difference(kept: &TerminalRecord, next: &TerminalRecord) -> String {
    let mut parts = Vec::new();
    if kept.merchant_name != next.merchant_name {
        parts.push(format!(
            "merchant {:?} -> {:?}",
            kept.merchant_name.as_deref().unwrap_or(""),
            next.merchant_name.as_deref().unwrap_or("")
        ));
    }
    if kept.connected != next.connected {
        parts.push(format!("connected {} -> {}", kept.connected, next.connected));
    }
    if kept.status != next.status {
        parts.push(format!("status {} -> {}", kept.status, next.status));
    }
    parts.join(", ")
}

fn require_partition<'a>(raw: &'a RawTable, name: &str) -> Result<&'a Partition, ReconError> {
    raw.partition(name).ok_or_else(|| ReconError::MissingPartition {
        partition: name.to_string(),
    })
}

fn require_column(partition: &Partition, column: &str) -> Result<usize, ReconError> {
    partition.column_index(column).ok_or_else(|| ReconError::MissingColumn {
        partition: partition.name.clone(),
        column: column.to_string(),
    })
}

fn id_set(partition: &Partition, column: &str) -> Result<HashSet<String>, ReconError> {
    let idx = require_column(partition, column)?;
    Ok((0..partition.rows.len())
        .map(|row| normalize_id(partition.cell(row, idx)))
        .filter(|id| !id.is_empty())
        .collect())
}

/// Terminal IDs are compared trimmed. Numeric IDs read from Excel as floats
/// ("2058001.0") are folded back to their integer spelling.
pub fn normalize_id(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(int_part) = trimmed.strip_suffix(".0") {
        if !int_part.is_empty() && int_part.chars().all(|c| c.is_ascii_digit()) {
            return int_part.to_string();
        }
    }
    trimmed.to_string()
}

fn non_blank(value: &str) -> Option<String> {
    let v = value.trim();
    if v.is_empty() || crate::dates::is_null_marker(v) {
        None
    } else {
        Some(v.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partition(name: &str, headers: &[&str], rows: &[&[&str]]) -> Partition {
        let mut p = Partition::new(name, headers.iter().map(|h| h.to_string()).collect());
        for r in rows {
            p.push_row(r.iter().map(|c| c.to_string()).collect());
        }
        p
    }

    fn rca(registered: &[&[&str]], connected: &[&str], active: &[&str]) -> RawTable {
        let mut raw = RawTable::new();
        raw.push(partition(
            "REGISTERED TERMINALS",
            &["Terminal_ID", "Merchant_ID", "Merchant_Name", "Bank", "LastSeenDate"],
            registered,
        ));
        let connected: Vec<[&str; 1]> = connected.iter().map(|id| [*id]).collect();
        let connected: Vec<&[&str]> = connected.iter().map(|r| r.as_slice()).collect();
        raw.push(partition("CONNECTED TERMINALS", &["Terminal_ID"], &connected));
        let active: Vec<[&str; 1]> = active.iter().map(|id| [*id]).collect();
        let active: Vec<&[&str]> = active.iter().map(|r| r.as_slice()).collect();
        raw.push(partition("ACTIVE TERMINALS", &["Terminal_ID"], &active));
        raw
    }

    #[test]
    fn projects_registered_with_membership_flags() {
        let raw = rca(
            &[
                &["T1", "M1", "Alpha Stores", "GTB", "2023-09-30"],
                &["T2", "M2", "Beta Foods", "UBA", ""],
                &["T3", "M3", "", "FBN", "NaN"],
            ],
            &["T1", "T3"],
            &["T1"],
        );
        let load = load_snapshot(&raw, &SnapshotLayout::default()).unwrap();
        let s = &load.snapshot;
        assert_eq!(s.len(), 3);

        let t1 = s.get("T1").unwrap();
        assert_eq!(t1.merchant_name.as_deref(), Some("Alpha Stores"));
        assert!(t1.connected);
        assert_eq!(t1.status, TerminalStatus::Active);
        assert_eq!(t1.last_seen.as_deref(), Some("2023-09-30"));

        let t2 = s.get("T2").unwrap();
        assert!(!t2.connected);
        assert_eq!(t2.status, TerminalStatus::Inactive);
        assert_eq!(t2.last_seen, None);

        let t3 = s.get("T3").unwrap();
        assert_eq!(t3.merchant_name, None);
        assert!(t3.connected);
        assert_eq!(t3.last_seen, None);
        assert!(load.conflicts.is_empty());
    }

    #[test]
    fn missing_partition_is_fatal() {
        let mut raw = RawTable::new();
        raw.push(partition("REGISTERED TERMINALS", &["Terminal_ID", "Merchant_Name"], &[&["T1", "A"]]));
        raw.push(partition("CONNECTED TERMINALS", &["Terminal_ID"], &[]));
        let err = load_snapshot(&raw, &SnapshotLayout::default()).unwrap_err();
        assert!(matches!(err, ReconError::MissingPartition { ref partition } if partition == "ACTIVE TERMINALS"));
    }

    #[test]
    fn missing_column_is_fatal() {
        let mut raw = rca(&[&["T1", "M1", "A", "GTB", ""]], &[], &[]);
        raw.push(partition("ignored", &["x"], &[]));
        let mut layout = SnapshotLayout::default();
        layout.merchant_column = "Merchant_Label".into();
        let err = load_snapshot(&raw, &layout).unwrap_err();
        assert!(matches!(err, ReconError::MissingColumn { ref column, .. } if column == "Merchant_Label"));
    }

    #[test]
    fn membership_partition_needs_id_column() {
        let mut raw = RawTable::new();
        raw.push(partition("REGISTERED TERMINALS", &["Terminal_ID", "Merchant_Name"], &[&["T1", "A"]]));
        raw.push(partition("CONNECTED TERMINALS", &["TID"], &[&["T1"]]));
        raw.push(partition("ACTIVE TERMINALS", &["Terminal_ID"], &[]));
        let err = load_snapshot(&raw, &SnapshotLayout::default()).unwrap_err();
        assert!(matches!(err, ReconError::MissingColumn { ref partition, .. } if partition == "CONNECTED TERMINALS"));
    }

    #[test]
    fn last_seen_column_is_optional() {
        let mut raw = RawTable::new();
        raw.push(partition("REGISTERED TERMINALS", &["Terminal_ID", "Merchant_Name"], &[&["T1", "A"]]));
        raw.push(partition("CONNECTED TERMINALS", &["Terminal_ID"], &[]));
        raw.push(partition("ACTIVE TERMINALS", &["Terminal_ID"], &[]));
        let load = load_snapshot(&raw, &SnapshotLayout::default()).unwrap();
        assert_eq!(load.snapshot.records[0].last_seen, None);
    }

    #[test]
    fn empty_registered_is_fatal() {
        let raw = rca(&[], &["T1"], &["T1"]);
        let err = load_snapshot(&raw, &SnapshotLayout::default()).unwrap_err();
        assert!(matches!(err, ReconError::EmptyInput { .. }));
    }

    #[test]
    fn blank_ids_are_skipped_and_counted() {
        let raw = rca(&[&["  ", "M0", "Ghost", "", ""], &["T1", "M1", "A", "", ""]], &[], &[]);
        let load = load_snapshot(&raw, &SnapshotLayout::default()).unwrap();
        assert_eq!(load.snapshot.len(), 1);
        assert_eq!(load.skipped_rows, 1);
    }

    #[test]
    fn all_blank_ids_count_as_empty() {
        let raw = rca(&[&["", "M0", "Ghost", "", ""]], &[], &[]);
        assert!(matches!(
            load_snapshot(&raw, &SnapshotLayout::default()),
            Err(ReconError::EmptyInput { .. })
        ));
    }

    #[test]
    fn duplicate_ids_last_row_wins() {
        let raw = rca(
            &[
                &["T1", "M1", "Old Name", "", ""],
                &["T2", "M2", "B", "", ""],
                &["T1", "M1", "New Name", "", ""],
            ],
            &[],
            &[],
        );
        let load = load_snapshot(&raw, &SnapshotLayout::default()).unwrap();
        let ids: Vec<_> = load.snapshot.records.iter().map(|r| r.terminal_id.as_str()).collect();
        assert_eq!(ids, vec!["T1", "T2"]);
        assert_eq!(load.snapshot.get("T1").unwrap().merchant_name.as_deref(), Some("New Name"));
        assert_eq!(load.conflicts.len(), 1);
        assert_eq!(load.conflicts[0].occurrences, 2);
        assert!(load.conflicts[0].detail.contains("New Name"));
    }

    #[test]
    fn identical_duplicates_are_not_conflicts() {
        let raw = rca(&[&["T1", "M1", "A", "", ""], &["T1", "M1", "A", "", ""]], &[], &[]);
        let load = load_snapshot(&raw, &SnapshotLayout::default()).unwrap();
        assert_eq!(load.snapshot.len(), 1);
        assert!(load.conflicts.is_empty());
    }

    #[test]
    fn strict_mode_rejects_conflicts() {
        let raw = rca(&[&["T1", "M1", "A", "", ""], &["T1", "M1", "B", "", ""]], &[], &[]);
        let layout = SnapshotLayout {
            strict_keys: true,
            ..SnapshotLayout::default()
        };
        let err = load_snapshot(&raw, &layout).unwrap_err();
        assert!(matches!(err, ReconError::ConflictingKey { ref terminal_id, .. } if terminal_id == "T1"));
    }

    #[test]
    fn numeric_ids_match_across_partitions() {
        let raw = rca(&[&["2058001", "M1", "A", "", ""]], &["2058001.0"], &[" 2058001 "]);
        let load = load_snapshot(&raw, &SnapshotLayout::default()).unwrap();
        let t = load.snapshot.get("2058001").unwrap();
        assert!(t.connected);
        assert_eq!(t.status, TerminalStatus::Active);
    }

    #[test]
    fn normalize_id_keeps_alphanumerics() {
        assert_eq!(normalize_id(" 2033ABCD "), "2033ABCD");
        assert_eq!(normalize_id("12.0"), "12");
        assert_eq!(normalize_id("A1.0"), "A1.0");
        assert_eq!(normalize_id(".0"), ".0");
    }
}
