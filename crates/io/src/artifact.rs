// Published artifacts: the ledger in its configured format, and the
// processed RCA workbook (the reconciled snapshot as delivered downstream)

use std::io::Write;
use std::path::Path;

use rust_xlsxwriter::{Format, Workbook as XlsxWorkbook};

use rcaledger_recon::dates::format_date_or_sentinel;
use rcaledger_recon::export::{connected_label, entry_cells, LEDGER_COLUMNS};
use rcaledger_recon::{ArtifactFormat, Ledger, TerminalRecord};

pub const PROCESSED_COLUMNS: [&str; 5] = [
    "Terminal_ID",
    "Merchant_Name",
    "STATUS",
    "CONNECTED",
    "LAST_TRANSACTION_DATE",
];

const LEDGER_SHEET: &str = "RCA_table";
const PROCESSED_SHEET: &str = "RCA";

/// Serialize the full ledger in `format`.
pub fn render_ledger(ledger: &Ledger, format: ArtifactFormat) -> Result<Vec<u8>, String> {
    match format {
        ArtifactFormat::Csv => rcaledger_recon::export(ledger).map_err(|e| e.to_string()),
        ArtifactFormat::Sqlite => {
            let dir = tempfile::tempdir().map_err(|e| e.to_string())?;
            let path = dir.path().join("ledger.db");
            crate::ledger_db::commit(&path, ledger)?;
            std::fs::read(&path).map_err(|e| e.to_string())
        }
        ArtifactFormat::Xlsx => {
            let rows = ledger.entries().map(|e| entry_cells(e).to_vec());
            xlsx_table(LEDGER_SHEET, &LEDGER_COLUMNS, rows)
        }
    }
}

/// One row per reconciled terminal. Unknown last activity renders as "Not available".
pub fn processed_rows(records: &[TerminalRecord]) -> Vec<Vec<String>> {
    records
        .iter()
        .map(|r| {
            vec![
                r.terminal_id.clone(),
                r.merchant_name.clone().unwrap_or_default(),
                r.status.to_string(),
                connected_label(r.connected).to_string(),
                format_date_or_sentinel(r.last_activity_at),
            ]
        })
        .collect()
}

/// Processed RCA workbook as xlsx or csv. Sqlite is not a processed-workbook format.
pub fn render_processed(records: &[TerminalRecord], format: ArtifactFormat) -> Result<Vec<u8>, String> {
    let rows = processed_rows(records);
    match format {
        ArtifactFormat::Xlsx => xlsx_table(PROCESSED_SHEET, &PROCESSED_COLUMNS, rows),
        ArtifactFormat::Csv => crate::csv::write_table(&PROCESSED_COLUMNS, rows),
        ArtifactFormat::Sqlite => Err("processed workbook must be .xlsx or .csv".to_string()),
    }
}

/// Write `bytes` next to `path` and rename over it, so readers never see a partial file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), String> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| e.to_string())?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| e.to_string())?;
    tmp.write_all(bytes).map_err(|e| e.to_string())?;
    tmp.flush().map_err(|e| e.to_string())?;
    tmp.persist(path)
        .map_err(|e| format!("Failed to write {}: {}", path.display(), e))?;
    Ok(())
}

fn xlsx_table<I, R>(sheet: &str, headers: &[&str], rows: I) -> Result<Vec<u8>, String>
where
    I: IntoIterator<Item = R>,
    R: IntoIterator<Item = String>,
{
    let mut workbook = XlsxWorkbook::new();
    let bold = Format::new().set_bold();
    let worksheet = workbook
        .add_worksheet()
        .set_name(sheet)
        .map_err(|e| format!("Failed to create sheet '{}': {}", sheet, e))?;

    for (col, header) in headers.iter().enumerate() {
        worksheet
            .write_string_with_format(0, col as u16, *header, &bold)
            .map_err(|e| format!("Failed to write header: {}", e))?;
    }

    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for (row_idx, row) in rows.into_iter().enumerate() {
        let row_num = (row_idx + 1) as u32;
        for (col, value) in row.into_iter().enumerate() {
            if value.is_empty() {
                continue;
            }
            if let Some(w) = widths.get_mut(col) {
                *w = (*w).max(value.chars().count());
            }
            worksheet
                .write_string(row_num, col as u16, &value)
                .map_err(|e| format!("Failed to write row {}: {}", row_num, e))?;
        }
    }

    for (col, width) in widths.iter().enumerate() {
        worksheet
            .set_column_width(col as u16, (*width).min(60) as f64 + 2.0)
            .map_err(|e| format!("Failed to set column width: {}", e))?;
    }
    worksheet
        .set_freeze_panes(1, 0)
        .map_err(|e| format!("Failed to freeze header: {}", e))?;

    workbook
        .save_to_buffer()
        .map_err(|e| format!("Failed to build XLSX: {}", e))
}
