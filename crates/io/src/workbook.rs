// RCA workbook import: every sheet becomes a named partition of text cells

use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader, Sheets};
use rcaledger_recon::dates::excel_serial_to_utc;
use rcaledger_recon::{Partition, RawTable};

/// Upper bound on cells read per workbook. RCA exports are far below this.
const MAX_CELLS: usize = 20_000_000;

/// Import statistics, logged after each load.
#[derive(Debug, Clone, Default)]
pub struct ImportStats {
    pub partitions: usize,
    pub rows: usize,
    pub cells: usize,
    pub dates_converted: usize,
}

impl ImportStats {
    pub fn summary(&self) -> String {
        format!(
            "{} partition(s), {} row(s), {} cell(s), {} date cell(s)",
            self.partitions, self.rows, self.cells, self.dates_converted
        )
    }
}

/// Load the snapshot source.
///
/// A directory is read as one `<partition>.csv` per partition; anything
/// else goes through calamine (xlsx, xlsm, xlsb, xls, ods).
pub fn import(path: &Path) -> Result<(RawTable, ImportStats), String> {
    let (raw, stats) = if path.is_dir() {
        import_csv_dir(path)?
    } else {
        import_spreadsheet(path)?
    };
    log::info!("loaded {}: {}", path.display(), stats.summary());
    Ok((raw, stats))
}

/// Import an Excel/ODS file, one partition per sheet.
pub fn import_spreadsheet(path: &Path) -> Result<(RawTable, ImportStats), String> {
    let mut workbook: Sheets<_> = open_workbook_auto(path)
        .map_err(|e| format!("Failed to open workbook {}: {}", path.display(), e))?;

    let sheet_names: Vec<String> = workbook.sheet_names().to_vec();
    if sheet_names.is_empty() {
        return Err(format!("{} contains no sheets", path.display()));
    }

    let mut raw = RawTable::new();
    let mut stats = ImportStats::default();

    for sheet_name in &sheet_names {
        let range = workbook
            .worksheet_range(sheet_name)
            .map_err(|e| format!("Failed to read sheet '{}': {}", sheet_name, e))?;

        let mut partition: Option<Partition> = None;
        for row in range.rows() {
            let cells: Vec<String> = row
                .iter()
                .map(|cell| cell_text(cell, &mut stats))
                .collect();
            stats.cells += cells.len();
            if stats.cells > MAX_CELLS {
                return Err(format!(
                    "{} exceeds {} cells; refusing to load",
                    path.display(),
                    MAX_CELLS
                ));
            }

            let blank = cells.iter().all(|c| c.trim().is_empty());
            match partition.as_mut() {
                // First non-blank row is the header
                None if blank => {}
                None => partition = Some(Partition::new(sheet_name.clone(), cells)),
                Some(_) if blank => {}
                Some(p) => {
                    p.push_row(cells);
                    stats.rows += 1;
                }
            }
        }

        raw.push(partition.unwrap_or_else(|| Partition::new(sheet_name.clone(), Vec::new())));
        stats.partitions += 1;
    }

    Ok((raw, stats))
}

/// Import a directory of `<partition name>.csv` files.
pub fn import_csv_dir(dir: &Path) -> Result<(RawTable, ImportStats), String> {
    let mut files: Vec<_> = std::fs::read_dir(dir)
        .map_err(|e| format!("{}: {}", dir.display(), e))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .and_then(|e| e.to_str())
                    .map_or(false, |e| e.eq_ignore_ascii_case("csv") || e.eq_ignore_ascii_case("tsv"))
        })
        .collect();
    files.sort();

    let mut raw = RawTable::new();
    let mut stats = ImportStats::default();
    for file in files {
        let name = file
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| format!("non UTF-8 file name: {}", file.display()))?
            .to_string();
        let partition = crate::csv::import_partition(&file, &name)?;
        stats.rows += partition.rows.len();
        stats.cells += partition.rows.iter().map(|r| r.len()).sum::<usize>();
        stats.partitions += 1;
        raw.push(partition);
    }

    if stats.partitions == 0 {
        return Err(format!("{} contains no .csv partitions", dir.display()));
    }
    Ok((raw, stats))
}

/// Text rendering of a calamine cell, matching how the RCA report reads in Excel.
fn cell_text(cell: &Data, stats: &mut ImportStats) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(n) => {
            // Integers without decimals: numeric terminal IDs arrive as floats
            if n.fract() == 0.0 && n.abs() < 1e15 {
                format!("{}", *n as i64)
            } else {
                format!("{}", n)
            }
        }
        Data::Int(n) => n.to_string(),
        Data::Bool(b) => {
            let text = if *b { "TRUE" } else { "FALSE" };
            text.to_string()
        }
        Data::Error(e) => format!("#{:?}", e),
        Data::DateTime(dt) => {
            let serial = dt.as_f64();
            match excel_serial_to_utc(serial) {
                Some(ts) => {
                    stats.dates_converted += 1;
                    if serial.fract().abs() < 1e-9 {
                        ts.format("%Y-%m-%d").to_string()
                    } else {
                        ts.format("%Y-%m-%d %H:%M:%S").to_string()
                    }
                }
                None => format!("{}", serial),
            }
        }
        Data::DateTimeIso(s) => s.clone(),
        Data::DurationIso(s) => s.clone(),
    }
}
