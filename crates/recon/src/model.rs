use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Raw input
// ---------------------------------------------------------------------------

/// One named tab of the raw RCA workbook: a header row plus string cells.
#[derive(Debug, Clone, Default)]
pub struct Partition {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Partition {
    pub fn new(name: impl Into<String>, headers: Vec<String>) -> Self {
        Self {
            name: name.into(),
            headers,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    /// Header lookup: trimmed, case-insensitive.
    pub fn column_index(&self, column: &str) -> Option<usize> {
        let wanted = column.trim();
        self.headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(wanted))
    }

    /// Cell text, or "" for short rows.
    pub fn cell(&self, row: usize, col: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .map(|s| s.as_str())
            .unwrap_or("")
    }
}

/// The raw spreadsheet: partitions in workbook order.
#[derive(Debug, Clone, Default)]
pub struct RawTable {
    partitions: Vec<Partition>,
}

impl RawTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, partition: Partition) {
        self.partitions.push(partition);
    }

    /// Partition lookup by name: trimmed, case-insensitive.
    pub fn partition(&self, name: &str) -> Option<&Partition> {
        let wanted = name.trim();
        self.partitions
            .iter()
            .find(|p| p.name.trim().eq_ignore_ascii_case(wanted))
    }

    pub fn names(&self) -> Vec<&str> {
        self.partitions.iter().map(|p| p.name.as_str()).collect()
    }
}

// ---------------------------------------------------------------------------
// Terminal records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminalStatus {
    Active,
    Inactive,
}

impl TerminalStatus {
    pub fn from_presence(present: bool) -> Self {
        if present {
            Self::Active
        } else {
            Self::Inactive
        }
    }

    /// Parse the persisted representation. Unknown text yields `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Some(Self::Active),
            "INACTIVE" => Some(Self::Inactive),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Inactive => "INACTIVE",
        }
    }
}

impl std::fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One terminal as seen in the current run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TerminalRecord {
    pub terminal_id: String,
    pub merchant_name: Option<String>,
    pub connected: bool,
    pub status: TerminalStatus,
    /// Raw "last seen" cell from the registered partition, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<String>,
    pub last_activity_at: Option<DateTime<Utc>>,
}

impl TerminalRecord {
    pub fn new(terminal_id: impl Into<String>) -> Self {
        Self {
            terminal_id: terminal_id.into(),
            merchant_name: None,
            connected: false,
            status: TerminalStatus::Inactive,
            last_seen: None,
            last_activity_at: None,
        }
    }

    /// True when two rows for the same ID disagree on anything the ledger keeps.
    pub fn contradicts(&self, other: &TerminalRecord) -> bool {
        self.merchant_name != other.merchant_name
            || self.connected != other.connected
            || self.status != other.status
    }
}

/// A duplicate terminal ID resolved by last-row-wins.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyConflict {
    pub terminal_id: String,
    pub occurrences: usize,
    pub detail: String,
}

/// Normalized snapshot: unique terminal IDs in first-sighting order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub records: Vec<TerminalRecord>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn get(&self, terminal_id: &str) -> Option<&TerminalRecord> {
        self.records.iter().find(|r| r.terminal_id == terminal_id)
    }
}

/// Output of the snapshot loader.
#[derive(Debug, Clone)]
pub struct SnapshotLoad {
    pub snapshot: Snapshot,
    pub conflicts: Vec<KeyConflict>,
    /// Registered rows dropped because the terminal ID cell was blank.
    pub skipped_rows: usize,
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

/// Which signal decided `status` for this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusSource {
    Activity,
    Snapshot,
}

impl std::fmt::Display for StatusSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Activity => write!(f, "activity"),
            Self::Snapshot => write!(f, "snapshot"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileSummary {
    pub total: usize,
    pub active: usize,
    pub inactive: usize,
    pub connected: usize,
    pub dated: usize,
    pub undated: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub records: Vec<TerminalRecord>,
    pub status_source: StatusSource,
    pub summary: ReconcileSummary,
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Durable per-terminal row carried across runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub terminal_id: String,
    pub merchant_name: Option<String>,
    pub status: Option<TerminalStatus>,
    pub connected: Option<bool>,
    /// `None` for rows carried over from older ledgers that never had a
    /// readable date. The first stamp fills it in.
    pub last_transaction_date: Option<NaiveDate>,
}

impl LedgerEntry {
    pub fn new(terminal_id: impl Into<String>, last_transaction_date: NaiveDate) -> Self {
        Self {
            last_transaction_date: Some(last_transaction_date),
            ..Self::undated(terminal_id)
        }
    }

    pub fn undated(terminal_id: impl Into<String>) -> Self {
        Self {
            terminal_id: terminal_id.into(),
            merchant_name: None,
            status: None,
            connected: None,
            last_transaction_date: None,
        }
    }
}

/// Keyed ledger. `BTreeMap` keeps iteration (and therefore export) ordered by ID.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    entries: BTreeMap<String, LedgerEntry>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, terminal_id: &str) -> Option<&LedgerEntry> {
        self.entries.get(terminal_id)
    }

    pub fn contains(&self, terminal_id: &str) -> bool {
        self.entries.contains_key(terminal_id)
    }

    /// Insert or replace the entry for its terminal ID.
    pub fn upsert(&mut self, entry: LedgerEntry) -> Option<LedgerEntry> {
        self.entries.insert(entry.terminal_id.clone(), entry)
    }

    pub fn entries(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.entries.values()
    }

    pub(crate) fn get_mut(&mut self, terminal_id: &str) -> Option<&mut LedgerEntry> {
        self.entries.get_mut(terminal_id)
    }
}

impl FromIterator<LedgerEntry> for Ledger {
    fn from_iter<I: IntoIterator<Item = LedgerEntry>>(iter: I) -> Self {
        let mut ledger = Ledger::new();
        for entry in iter {
            ledger.upsert(entry);
        }
        ledger
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FoldSummary {
    /// Terminals seen for the first time.
    pub inserted: usize,
    /// Existing terminals whose date was set to the run date.
    pub stamped: usize,
    /// Present terminals that only had descriptive fields refreshed.
    pub refreshed_only: usize,
    /// Ledger terminals absent from this run, passed through unchanged.
    pub carried_forward: usize,
    pub total: usize,
}

#[derive(Debug, Clone)]
pub struct FoldOutcome {
    pub ledger: Ledger,
    pub summary: FoldSummary,
    pub conflicts: Vec<KeyConflict>,
}

// ---------------------------------------------------------------------------
// Run report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct RunMeta {
    pub engine_version: String,
    pub run_date: NaiveDate,
    pub run_at: String,
    pub window_days: u32,
    pub status_source: StatusSource,
}

/// Machine-readable summary of one fold-and-publish cycle.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub meta: RunMeta,
    pub reconcile: ReconcileSummary,
    pub fold: FoldSummary,
    pub conflicts: Vec<KeyConflict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_revision: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_lookup_ignores_case_and_padding() {
        let mut raw = RawTable::new();
        raw.push(Partition::new(
            "Registered Terminals ",
            vec![" terminal_id".into(), "Merchant_Name".into()],
        ));
        let p = raw.partition("REGISTERED TERMINALS").unwrap();
        assert_eq!(p.column_index("Terminal_ID"), Some(0));
        assert_eq!(p.column_index("MCC"), None);
        assert!(raw.partition("ACTIVE TERMINALS").is_none());
    }

    #[test]
    fn short_rows_read_as_blank() {
        let mut p = Partition::new("A", vec!["Terminal_ID".into(), "LastSeenDate".into()]);
        p.push_row(vec!["2033AB01".into()]);
        assert_eq!(p.cell(0, 0), "2033AB01");
        assert_eq!(p.cell(0, 1), "");
        assert_eq!(p.cell(5, 0), "");
    }

    #[test]
    fn status_parse_is_lenient() {
        assert_eq!(TerminalStatus::parse(" active"), Some(TerminalStatus::Active));
        assert_eq!(TerminalStatus::parse("INACTIVE"), Some(TerminalStatus::Inactive));
        assert_eq!(TerminalStatus::parse("nan"), None);
        assert_eq!(TerminalStatus::Active.to_string(), "ACTIVE");
    }

    #[test]
    fn ledger_iterates_in_id_order() {
        let d = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        let ledger: Ledger = ["T3", "T1", "T2"]
            .into_iter()
            .map(|id| LedgerEntry::new(id, d))
            .collect();
        let ids: Vec<_> = ledger.entries().map(|e| e.terminal_id.as_str()).collect();
        assert_eq!(ids, vec!["T1", "T2", "T3"]);
    }
}
