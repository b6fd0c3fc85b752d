//! Tabular serialization of the ledger.
//!
//! Column order is part of the published contract:
//! `terminal_id, merchant_name, status, connected, last_transaction_date`.
//! One row per terminal in ascending ID order. Absent values are empty cells.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::dates::is_null_marker;
use crate::error::ReconError;
use crate::model::{Ledger, LedgerEntry, TerminalStatus};

/// Serialized representation of the published ledger artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactFormat {
    /// The SQLite ledger database itself.
    #[default]
    Sqlite,
    Csv,
    Xlsx,
}

impl ArtifactFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Sqlite => "db",
            Self::Csv => "csv",
            Self::Xlsx => "xlsx",
        }
    }

    /// Guess from a file name; unknown extensions yield `None`.
    pub fn from_path(path: &str) -> Option<Self> {
        let ext = path.rsplit_once('.')?.1.to_ascii_lowercase();
        match ext.as_str() {
            "db" | "sqlite" | "sqlite3" => Some(Self::Sqlite),
            "csv" => Some(Self::Csv),
            "xlsx" => Some(Self::Xlsx),
            _ => None,
        }
    }
}

impl std::fmt::Display for ArtifactFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite => write!(f, "sqlite"),
            Self::Csv => write!(f, "csv"),
            Self::Xlsx => write!(f, "xlsx"),
        }
    }
}

pub const LEDGER_COLUMNS: [&str; 5] = [
    "terminal_id",
    "merchant_name",
    "status",
    "connected",
    "last_transaction_date",
];

/// `YES` / `NO`, as the RCA report spells connectivity.
pub fn connected_label(connected: bool) -> &'static str {
    if connected {
        "YES"
    } else {
        "NO"
    }
}

pub fn parse_connected(value: &str) -> Option<bool> {
    match value.trim().to_ascii_uppercase().as_str() {
        "YES" | "Y" | "TRUE" | "1" => Some(true),
        "NO" | "N" | "FALSE" | "0" => Some(false),
        _ => None,
    }
}

/// The five cells of an entry, in `LEDGER_COLUMNS` order.
pub fn entry_cells(entry: &LedgerEntry) -> [String; 5] {
    [
        entry.terminal_id.clone(),
        entry.merchant_name.clone().unwrap_or_default(),
        entry.status.map(|s| s.to_string()).unwrap_or_default(),
        entry.connected.map(|c| connected_label(c).to_string()).unwrap_or_default(),
        entry
            .last_transaction_date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default(),
    ]
}

/// Serialize the whole ledger as CSV bytes.
pub fn export(ledger: &Ledger) -> Result<Vec<u8>, ReconError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(LEDGER_COLUMNS)
        .map_err(|e| ReconError::Io(e.to_string()))?;
    for entry in ledger.entries() {
        writer
            .write_record(entry_cells(entry))
            .map_err(|e| ReconError::Io(e.to_string()))?;
    }
    writer.into_inner().map_err(|e| ReconError::Io(e.to_string()))
}

/// Parse bytes produced by [`export`] back into a ledger.
pub fn parse_export(bytes: &[u8]) -> Result<Ledger, ReconError> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| ReconError::Io(e.to_string()))?
        .iter()
        .map(|h| h.to_string())
        .collect();
    for (i, column) in LEDGER_COLUMNS.iter().enumerate() {
        if headers.get(i).map(|h| h.as_str()) != Some(*column) {
            return Err(ReconError::MissingColumn {
                partition: "ledger export".into(),
                column: column.to_string(),
            });
        }
    }

    let mut ledger = Ledger::new();
    for record in reader.records() {
        let record = record.map_err(|e| ReconError::Io(e.to_string()))?;
        let cell = |i: usize| record.get(i).unwrap_or("").trim();

        let terminal_id = cell(0).to_string();
        let date = match cell(4) {
            "" => None,
            text if is_null_marker(text) => None,
            text => Some(NaiveDate::parse_from_str(text, "%Y-%m-%d").map_err(|_| {
                ReconError::Io(format!(
                    "terminal '{terminal_id}': bad last_transaction_date '{text}'"
                ))
            })?),
        };

        ledger.upsert(LedgerEntry {
            merchant_name: Some(cell(1)).filter(|s| !s.is_empty()).map(String::from),
            status: TerminalStatus::parse(cell(2)),
            connected: parse_connected(cell(3)),
            last_transaction_date: date,
            ..LedgerEntry::undated(terminal_id)
        });
    }

    Ok(ledger)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn stable_header_and_row_order() {
        let ledger: Ledger = [
            LedgerEntry {
                merchant_name: Some("Zeta, Ltd".into()),
                status: Some(TerminalStatus::Active),
                connected: Some(true),
                ..LedgerEntry::new("T2", d(2024, 1, 10))
            },
            LedgerEntry::new("T1", d(2023, 6, 1)),
        ]
        .into_iter()
        .collect();

        let text = String::from_utf8(export(&ledger).unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "terminal_id,merchant_name,status,connected,last_transaction_date");
        assert_eq!(lines[1], "T1,,,,2023-06-01");
        assert_eq!(lines[2], "T2,\"Zeta, Ltd\",ACTIVE,YES,2024-01-10");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn empty_ledger_is_header_only() {
        let text = String::from_utf8(export(&Ledger::new()).unwrap()).unwrap();
        assert_eq!(text.trim_end(), LEDGER_COLUMNS.join(","));
    }

    #[test]
    fn parse_rejects_reordered_columns() {
        let bytes = b"merchant_name,terminal_id,status,connected,last_transaction_date\n";
        assert!(matches!(parse_export(bytes), Err(ReconError::MissingColumn { .. })));
    }

    #[test]
    fn parse_rejects_bad_date() {
        let bytes = b"terminal_id,merchant_name,status,connected,last_transaction_date\nT1,,,,31/31/2024\n";
        let err = parse_export(bytes).unwrap_err();
        assert!(err.to_string().contains("T1"));
    }

    #[test]
    fn undated_entry_exports_empty_cell_and_survives_parse() {
        let ledger: Ledger = [LedgerEntry::undated("OLD1"), LedgerEntry::new("T1", d(2024, 1, 10))]
            .into_iter()
            .collect();
        let text = String::from_utf8(export(&ledger).unwrap()).unwrap();
        assert!(text.contains("\nOLD1,,,,\n"));
        assert_eq!(parse_export(text.as_bytes()).unwrap(), ledger);

        // Older exports spelled the gap out
        let bytes = b"terminal_id,merchant_name,status,connected,last_transaction_date\nOLD1,,,,Not available\n";
        let parsed = parse_export(bytes).unwrap();
        assert_eq!(parsed.get("OLD1").unwrap().last_transaction_date, None);
    }

    #[test]
    fn artifact_format_from_path() {
        assert_eq!(ArtifactFormat::from_path("data/legacy.db"), Some(ArtifactFormat::Sqlite));
        assert_eq!(ArtifactFormat::from_path("out/ledger.CSV"), Some(ArtifactFormat::Csv));
        assert_eq!(ArtifactFormat::from_path("ledger"), None);
        assert_eq!(ArtifactFormat::Xlsx.extension(), "xlsx");
    }

    #[test]
    fn connected_labels() {
        assert_eq!(parse_connected("yes"), Some(true));
        assert_eq!(parse_connected(connected_label(false)), Some(false));
        assert_eq!(parse_connected(""), None);
    }
}
