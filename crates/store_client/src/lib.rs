//! Remote collaborators: the versioned blob store the ledger is published to,
//! the HTTP activity endpoint, and snapshot downloads.
//!
//! No retries. One bounded attempt per request.

mod activity;
mod client;
mod download;

pub use activity::HttpActivitySource;
pub use client::{Blob, StoreClient, StoreError};
pub use download::download;
