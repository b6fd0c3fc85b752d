//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Exit codes are part of the shell contract: schedulers key alerts off them.
//!
//! # Exit Code Ranges
//!
//! | Range   | Domain    | Description                                  |
//! |---------|-----------|----------------------------------------------|
//! | 0       | Universal | Success                                      |
//! | 1       | Universal | General error (unspecified)                  |
//! | 2       | Universal | CLI usage error (bad args)                   |
//! | 3-9     | config    | Run configuration and credentials            |
//! | 10-19   | snapshot  | Input spreadsheet errors                     |
//! | 20-29   | ledger    | Ledger database and lock                     |
//! | 30-39   | activity  | Activity source errors that are not degraded |
//! | 40-49   | publish   | Artifact publication                         |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant in the appropriate range
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Wire it into `recon_exit_code` / `store_exit_code`

use rcaledger_recon::ReconError;
use rcaledger_store_client::StoreError;

// =============================================================================
// Universal (0-2)
// =============================================================================

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
/// Avoid using this; prefer a specific error code.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments.
pub const EXIT_USAGE: u8 = 2;

// =============================================================================
// Config (3-9)
// =============================================================================

/// Config file not found at the resolved location.
pub const EXIT_CONFIG_MISSING: u8 = 3;

/// Config file unparseable or fails validation.
pub const EXIT_CONFIG_INVALID: u8 = 4;

/// A credential named in the config has no token.
pub const EXIT_CONFIG_NO_TOKEN: u8 = 5;

/// Keychain error (cannot read/write credentials).
pub const EXIT_KEYCHAIN: u8 = 6;

// =============================================================================
// Snapshot (10-19)
// =============================================================================

/// Snapshot file unreadable or download failed.
pub const EXIT_SNAPSHOT_UNREADABLE: u8 = 10;

/// A required partition (sheet) is missing.
pub const EXIT_SNAPSHOT_PARTITION: u8 = 11;

/// A required column is missing.
pub const EXIT_SNAPSHOT_COLUMN: u8 = 12;

/// The registered partition has no terminal rows.
pub const EXIT_SNAPSHOT_EMPTY: u8 = 13;

/// Contradictory duplicate terminal IDs (strict_keys only).
pub const EXIT_SNAPSHOT_CONFLICT: u8 = 14;

// =============================================================================
// Ledger (20-29)
// =============================================================================

/// Another cycle holds the ledger lock.
pub const EXIT_LEDGER_LOCKED: u8 = 20;

/// Ledger database could not be read or committed.
pub const EXIT_LEDGER_IO: u8 = 21;

// =============================================================================
// Activity (30-39)
// =============================================================================

/// Activity source reachable but its data is unusable (e.g. missing column).
pub const EXIT_ACTIVITY_INVALID: u8 = 30;

// =============================================================================
// Publish (40-49)
// =============================================================================

/// Remote artifact changed since it was read; nothing was overwritten.
pub const EXIT_PUBLISH_CONFLICT: u8 = 40;

/// Token rejected by the store (401/403).
pub const EXIT_PUBLISH_AUTH: u8 = 41;

/// Network failure or timeout talking to the store.
pub const EXIT_PUBLISH_NETWORK: u8 = 42;

/// Store returned an unexpected HTTP error.
pub const EXIT_PUBLISH_HTTP: u8 = 43;

/// Local artifact could not be written.
pub const EXIT_PUBLISH_IO: u8 = 44;

// =============================================================================
// Error mapping
// =============================================================================

/// Map a ReconError to its exit code.
pub fn recon_exit_code(err: &ReconError) -> u8 {
    match err {
        ReconError::ConfigParse(_) | ReconError::ConfigValidation(_) => EXIT_CONFIG_INVALID,
        ReconError::MissingPartition { .. } => EXIT_SNAPSHOT_PARTITION,
        ReconError::MissingColumn { .. } => EXIT_SNAPSHOT_COLUMN,
        ReconError::EmptyInput { .. } => EXIT_SNAPSHOT_EMPTY,
        ReconError::ConflictingKey { .. } => EXIT_SNAPSHOT_CONFLICT,
        // Only reaches the CLI when degradation itself failed
        ReconError::SourceUnavailable(_) => EXIT_ACTIVITY_INVALID,
        ReconError::PublishConflict { .. } => EXIT_PUBLISH_CONFLICT,
        ReconError::Ledger(_) => EXIT_LEDGER_IO,
        ReconError::Io(_) => EXIT_ERROR,
    }
}

/// Map a StoreError to its exit code.
pub fn store_exit_code(err: &StoreError) -> u8 {
    match err {
        StoreError::Conflict { .. } => EXIT_PUBLISH_CONFLICT,
        StoreError::Unauthorized(_) => EXIT_PUBLISH_AUTH,
        StoreError::Network(_) => EXIT_PUBLISH_NETWORK,
        StoreError::Http(_, _) | StoreError::Parse(_) => EXIT_PUBLISH_HTTP,
        StoreError::Io(_) => EXIT_PUBLISH_IO,
    }
}
