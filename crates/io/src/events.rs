// Activity from an exported event log (one row per terminal update)

use std::path::PathBuf;

use rcaledger_recon::dates::parse_last_seen;
use rcaledger_recon::{ActivityObservations, ActivitySource, ActivityWindow, ReconError};

/// Event log on disk. Columns are matched by header name; extra columns are ignored.
#[derive(Debug, Clone)]
pub struct CsvEventLog {
    pub path: PathBuf,
    pub id_column: String,
    pub timestamp_column: String,
}

impl CsvEventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            id_column: "terminalId".into(),
            timestamp_column: "updatedAt".into(),
        }
    }

    pub fn with_columns(mut self, id_column: &str, timestamp_column: &str) -> Self {
        self.id_column = id_column.to_string();
        self.timestamp_column = timestamp_column.to_string();
        self
    }
}

impl ActivitySource for CsvEventLog {
    fn query_recent_activity(&self, window: &ActivityWindow) -> Result<ActivityObservations, ReconError> {
        // A missing or unreadable log is an unavailable source, not a broken run
        if !self.path.is_file() {
            return Err(ReconError::SourceUnavailable(format!(
                "event log not found: {}",
                self.path.display()
            )));
        }
        let name = self.describe();
        let partition = crate::csv::import_partition(&self.path, &name)
            .map_err(ReconError::SourceUnavailable)?;

        let id_col = partition.column_index(&self.id_column).ok_or_else(|| {
            ReconError::MissingColumn {
                partition: name.clone(),
                column: self.id_column.clone(),
            }
        })?;
        let ts_col = partition.column_index(&self.timestamp_column).ok_or_else(|| {
            ReconError::MissingColumn {
                partition: name.clone(),
                column: self.timestamp_column.clone(),
            }
        })?;

        let mut unparsed = 0usize;
        let events = (0..partition.rows.len()).filter_map(|row| {
            let at = parse_last_seen(partition.cell(row, ts_col));
            if at.is_none() {
                unparsed += 1;
            }
            at.map(|at| (partition.cell(row, id_col), at))
        });
        let observations = ActivityObservations::from_events(events, window);

        if unparsed > 0 {
            log::warn!("{}: {} event(s) with unreadable timestamps skipped", name, unparsed);
        }
        log::info!(
            "{}: {} event(s), {} terminal(s) active in window",
            name,
            partition.rows.len(),
            observations.len()
        );
        Ok(observations)
    }

    fn describe(&self) -> String {
        format!("csv:{}", self.path.display())
    }
}
