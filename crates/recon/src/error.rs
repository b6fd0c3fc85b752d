use std::fmt;

#[derive(Debug)]
pub enum ReconError {
    /// TOML parse / deserialization error.
    ConfigParse(String),
    /// Config validation error (blank partition name, zero window, etc.).
    ConfigValidation(String),
    /// A required partition (sheet) is absent from the raw table.
    MissingPartition { partition: String },
    /// A required column is absent from a partition's header row.
    MissingColumn { partition: String, column: String },
    /// The registered partition has no data rows.
    EmptyInput { partition: String },
    /// Duplicate terminal IDs with contradictory descriptive data (strict mode only).
    ConflictingKey { terminal_id: String, detail: String },
    /// The activity store could not be reached.
    SourceUnavailable(String),
    /// The remote artifact changed since it was last read.
    PublishConflict { path: String, expected: Option<String> },
    /// Ledger persistence failure (open, read, commit).
    Ledger(String),
    /// IO error (file read, serialization, etc.).
    Io(String),
}

impl ReconError {
    /// Fatal errors abort the run before any ledger mutation is committed.
    /// `SourceUnavailable` is the only variant the pipeline recovers from.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::SourceUnavailable(_))
    }
}

impl fmt::Display for ReconError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigParse(msg) => write!(f, "config parse error: {msg}"),
            Self::ConfigValidation(msg) => write!(f, "config validation error: {msg}"),
            Self::MissingPartition { partition } => {
                write!(f, "snapshot is missing partition '{partition}'")
            }
            Self::MissingColumn { partition, column } => {
                write!(f, "partition '{partition}': missing column '{column}'")
            }
            Self::EmptyInput { partition } => {
                write!(f, "partition '{partition}' has no terminal rows")
            }
            Self::ConflictingKey { terminal_id, detail } => {
                write!(f, "terminal '{terminal_id}' appears more than once: {detail}")
            }
            Self::SourceUnavailable(msg) => write!(f, "activity source unavailable: {msg}"),
            Self::PublishConflict { path, expected } => match expected {
                Some(sha) => write!(
                    f,
                    "'{path}' changed remotely since revision {sha}; re-fetch and rerun the cycle"
                ),
                None => write!(
                    f,
                    "'{path}' was created remotely during this run; re-fetch and rerun the cycle"
                ),
            },
            Self::Ledger(msg) => write!(f, "ledger error: {msg}"),
            Self::Io(msg) => write!(f, "IO error: {msg}"),
        }
    }
}

impl std::error::Error for ReconError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_source_unavailable_is_recoverable() {
        assert!(!ReconError::SourceUnavailable("timeout".into()).is_fatal());
        assert!(ReconError::EmptyInput { partition: "REGISTERED TERMINALS".into() }.is_fatal());
        assert!(ReconError::PublishConflict { path: "data/legacy.db".into(), expected: None }.is_fatal());
    }

    #[test]
    fn display_names_partition_and_column() {
        let err = ReconError::MissingColumn {
            partition: "CONNECTED TERMINALS".into(),
            column: "Terminal_ID".into(),
        };
        assert_eq!(err.to_string(), "partition 'CONNECTED TERMINALS': missing column 'Terminal_ID'");
    }
}
