use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ReconError;

/// Default lookback for "recent activity".
pub const DEFAULT_WINDOW_DAYS: u32 = 30;

// ---------------------------------------------------------------------------
// Snapshot layout
// ---------------------------------------------------------------------------

/// Partition and column names of the raw RCA workbook.
///
/// Defaults match the RCA report as delivered: three tabs, each keyed by
/// `Terminal_ID`, with merchant and last-seen columns on the registered tab.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SnapshotLayout {
    pub registered: String,
    pub connected: String,
    pub active: String,
    pub terminal_id_column: String,
    pub merchant_column: String,
    /// Optional on the sheet; absent column means "no fallback date".
    pub last_seen_column: String,
    /// Fail on contradictory duplicate IDs instead of last-row-wins.
    pub strict_keys: bool,
}

impl Default for SnapshotLayout {
    fn default() -> Self {
        Self {
            registered: "REGISTERED TERMINALS".into(),
            connected: "CONNECTED TERMINALS".into(),
            active: "ACTIVE TERMINALS".into(),
            terminal_id_column: "Terminal_ID".into(),
            merchant_column: "Merchant_Name".into(),
            last_seen_column: "LastSeenDate".into(),
            strict_keys: false,
        }
    }
}

impl SnapshotLayout {
    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        let layout: SnapshotLayout =
            toml::from_str(input).map_err(|e| ReconError::ConfigParse(e.to_string()))?;
        layout.validate()?;
        Ok(layout)
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        let names = [
            ("registered", &self.registered),
            ("connected", &self.connected),
            ("active", &self.active),
            ("terminal_id_column", &self.terminal_id_column),
            ("merchant_column", &self.merchant_column),
            ("last_seen_column", &self.last_seen_column),
        ];
        for (key, value) in names {
            if value.trim().is_empty() {
                return Err(ReconError::ConfigValidation(format!("layout.{key} must not be blank")));
            }
        }

        let partitions = [&self.registered, &self.connected, &self.active];
        for (i, a) in partitions.iter().enumerate() {
            for b in &partitions[i + 1..] {
                if a.trim().eq_ignore_ascii_case(b.trim()) {
                    return Err(ReconError::ConfigValidation(format!(
                        "layout partitions must be distinct, '{a}' is used twice"
                    )));
                }
            }
        }

        Ok(())
    }

    /// The three partition names in loader order.
    pub fn partitions(&self) -> [&str; 3] {
        [&self.registered, &self.connected, &self.active]
    }
}

// ---------------------------------------------------------------------------
// Fold policy
// ---------------------------------------------------------------------------

/// Which present terminals get their date stamped with the run date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StampPolicy {
    /// Every terminal in the current snapshot.
    #[default]
    AllPresent,
    /// Only terminals reconciled as ACTIVE.
    ActiveOnly,
}

impl std::fmt::Display for StampPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AllPresent => write!(f, "all_present"),
            Self::ActiveOnly => write!(f, "active_only"),
        }
    }
}

/// Persisted fold settings (the `[ledger]` table of the run config).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LedgerPolicy {
    pub stamp: StampPolicy,
    pub allow_backdate: bool,
}

impl LedgerPolicy {
    pub fn options_for(&self, run_date: NaiveDate) -> FoldOptions {
        FoldOptions {
            run_date,
            policy: self.stamp,
            allow_backdate: self.allow_backdate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FoldOptions {
    pub run_date: NaiveDate,
    pub policy: StampPolicy,
    /// Allow a stamp earlier than the stored date to replace it.
    pub allow_backdate: bool,
}

impl FoldOptions {
    pub fn new(run_date: NaiveDate) -> Self {
        Self {
            run_date,
            policy: StampPolicy::AllPresent,
            allow_backdate: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
