//! `rcaledger-recon` — terminal activity reconciliation and ledger fold.
//!
//! Pure engine crate: receives the pre-loaded workbook, activity
//! observations and prior ledger, returns the folded ledger and a report.
//! No CLI or network dependencies.

pub mod activity;
pub mod config;
pub mod dates;
pub mod engine;
pub mod error;
pub mod export;
pub mod ledger;
pub mod model;
pub mod reconcile;
pub mod snapshot;

pub use activity::{query_or_degrade, ActivityObservations, ActivitySource, ActivityWindow, NoActivity};
pub use config::{FoldOptions, LedgerPolicy, SnapshotLayout, StampPolicy, DEFAULT_WINDOW_DAYS};
pub use engine::{run, CycleInput, CycleOutput};
pub use error::ReconError;
pub use export::{export, parse_export, ArtifactFormat};
pub use ledger::fold;
pub use model::{
    FoldOutcome, FoldSummary, KeyConflict, Ledger, LedgerEntry, Partition, RawTable, Reconciled,
    RunReport, Snapshot, SnapshotLoad, StatusSource, TerminalRecord, TerminalStatus,
};
pub use reconcile::reconcile;
pub use snapshot::load_snapshot;
