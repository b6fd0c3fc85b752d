// File I/O: snapshot workbooks, event logs, the ledger database and published artifacts

pub mod artifact;
pub mod csv;
pub mod events;
pub mod ledger_db;
pub mod workbook;

pub use artifact::{render_ledger, render_processed, write_atomic};
pub use events::CsvEventLog;
pub use ledger_db::{LedgerLoad, LedgerLock};
