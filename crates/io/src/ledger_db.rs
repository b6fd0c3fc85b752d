// Ledger persistence: SQLite `RCA_table`, one row per terminal
//
// Loading tolerates tables written by older pipelines: no primary key,
// untyped columns, "NaN"/"None" text, extra columns, duplicate IDs.
// Commit always writes the canonical schema below.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use rusqlite::types::Value;
use rusqlite::{params, Connection};

use rcaledger_recon::dates::{is_null_marker, parse_last_seen};
use rcaledger_recon::export::parse_connected;
use rcaledger_recon::snapshot::normalize_id;
use rcaledger_recon::{Ledger, LedgerEntry, TerminalStatus};

pub const TABLE: &str = "RCA_table";

const SCHEMA: &str = r#"
CREATE TABLE RCA_table (
    Terminal_ID TEXT PRIMARY KEY NOT NULL,
    Merchant_Name TEXT,
    STATUS TEXT,
    CONNECTED TEXT,
    LAST_TRANSACTION_DATE TEXT
);
"#;

/// What a load had to repair on the way in.
#[derive(Debug, Clone, Default)]
pub struct LedgerLoad {
    pub ledger: Ledger,
    /// Rows folded into an earlier row with the same ID.
    pub duplicates: usize,
    /// IDs kept without a date because the stored one could not be read.
    /// The next stamp fills them in.
    pub undated: Vec<String>,
}

/// Load the ledger. A missing file or missing table is an empty ledger.
pub fn load(path: &Path) -> Result<LedgerLoad, String> {
    if !path.exists() {
        log::info!("no ledger at {}, starting empty", path.display());
        return Ok(LedgerLoad::default());
    }

    let conn = Connection::open(path).map_err(|e| e.to_string())?;
    let table_exists: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![TABLE],
            |row| row.get::<_, i64>(0),
        )
        .map_err(|e| e.to_string())?
        > 0;
    if !table_exists {
        log::warn!("{} has no {} table, starting empty", path.display(), TABLE);
        return Ok(LedgerLoad::default());
    }

    let mut stmt = conn
        .prepare(&format!("SELECT * FROM {}", TABLE))
        .map_err(|e| e.to_string())?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let find = |name: &str| columns.iter().position(|c| c.trim().eq_ignore_ascii_case(name));

    let id_col = find("Terminal_ID").ok_or_else(|| format!("{} has no Terminal_ID column", TABLE))?;
    let date_col = find("LAST_TRANSACTION_DATE")
        .ok_or_else(|| format!("{} has no LAST_TRANSACTION_DATE column", TABLE))?;
    let merchant_col = find("Merchant_Name");
    let status_col = find("STATUS");
    let connected_col = find("CONNECTED");

    let mut rows = stmt.query([]).map_err(|e| e.to_string())?;
    let mut entries: BTreeMap<String, LedgerEntry> = BTreeMap::new();
    let mut result = LedgerLoad::default();

    while let Some(row) = rows.next().map_err(|e| e.to_string())? {
        let cell = |idx: Option<usize>| -> Result<Option<String>, String> {
            match idx {
                Some(i) => row
                    .get::<_, Value>(i)
                    .map(value_text)
                    .map_err(|e| e.to_string()),
                None => Ok(None),
            }
        };

        let id = match cell(Some(id_col))? {
            Some(raw) => normalize_id(&raw),
            None => continue,
        };
        if id.is_empty() {
            continue;
        }

        let entry = LedgerEntry {
            merchant_name: cell(merchant_col)?,
            status: cell(status_col)?.as_deref().and_then(TerminalStatus::parse),
            connected: cell(connected_col)?.as_deref().and_then(parse_connected),
            last_transaction_date: cell(Some(date_col))?
                .as_deref()
                .and_then(parse_last_seen)
                .map(|ts| ts.date_naive()),
            ..LedgerEntry::undated(id.clone())
        };

        match entries.get_mut(&id) {
            Some(existing) => {
                result.duplicates += 1;
                // Keep the most recent date (any date beats none); fill gaps from the other row
                let (newer, older) = if entry.last_transaction_date > existing.last_transaction_date {
                    (entry, existing.clone())
                } else {
                    (existing.clone(), entry)
                };
                *existing = LedgerEntry {
                    merchant_name: newer.merchant_name.or(older.merchant_name),
                    status: newer.status.or(older.status),
                    connected: newer.connected.or(older.connected),
                    ..newer
                };
            }
            None => {
                entries.insert(id, entry);
            }
        }
    }

    if result.duplicates > 0 {
        log::warn!("{}: merged {} duplicate row(s)", path.display(), result.duplicates);
    }
    result.undated = entries
        .values()
        .filter(|e| e.last_transaction_date.is_none())
        .map(|e| e.terminal_id.clone())
        .collect();
    if !result.undated.is_empty() {
        log::warn!(
            "{}: kept {} row(s) without a readable LAST_TRANSACTION_DATE",
            path.display(),
            result.undated.len()
        );
    }

    result.ledger = entries.into_values().collect();
    Ok(result)
}

/// Replace the table content with `ledger` in a single transaction.
pub fn commit(path: &Path, ledger: &Ledger) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
    }

    let mut conn = Connection::open(path).map_err(|e| e.to_string())?;
    let tx = conn.transaction().map_err(|e| e.to_string())?;

    tx.execute_batch(&format!("DROP TABLE IF EXISTS {};", TABLE))
        .map_err(|e| e.to_string())?;
    tx.execute_batch(SCHEMA).map_err(|e| e.to_string())?;
    {
        let mut stmt = tx
            .prepare(
                "INSERT INTO RCA_table (Terminal_ID, Merchant_Name, STATUS, CONNECTED, LAST_TRANSACTION_DATE) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .map_err(|e| e.to_string())?;

        for entry in ledger.entries() {
            stmt.execute(params![
                entry.terminal_id,
                entry.merchant_name,
                entry.status.map(|s| s.as_str()),
                entry.connected.map(rcaledger_recon::export::connected_label),
                entry.last_transaction_date.map(date_text),
            ])
            .map_err(|e| e.to_string())?;
        }
    }
    tx.commit().map_err(|e| e.to_string())?;

    log::info!("committed {} ledger row(s) to {}", ledger.len(), path.display());
    Ok(())
}

fn date_text(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// SQLite value as trimmed text; NULL, blanks and null markers are `None`.
fn value_text(value: Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::Integer(n) => n.to_string(),
        Value::Real(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
        Value::Real(f) => f.to_string(),
        Value::Text(s) => s,
        Value::Blob(b) => String::from_utf8_lossy(&b).into_owned(),
    };
    let text = text.trim();
    if text.is_empty() || is_null_marker(text) {
        None
    } else {
        Some(text.to_string())
    }
}

// ============================================================================
// Lock
// ============================================================================

/// Exclusive advisory lock on `<ledger>.lock`, held for a whole cycle.
///
/// Released when dropped.
#[derive(Debug)]
pub struct LedgerLock {
    path: PathBuf,
    file: File,
}

impl LedgerLock {
    pub fn lock_path(ledger: &Path) -> PathBuf {
        let mut name = ledger.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".lock");
        ledger.with_file_name(name)
    }

    /// Fails immediately if another process holds the lock.
    pub fn acquire(ledger: &Path) -> Result<Self, String> {
        let path = Self::lock_path(ledger);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| format!("{}: {}", path.display(), e))?;
        fs2::FileExt::try_lock_exclusive(&file).map_err(|e| {
            format!(
                "ledger is locked by another run ({}): {}",
                path.display(),
                e
            )
        })?;
        log::debug!("acquired {}", path.display());
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LedgerLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}
