//! `rcaledger run` / `rcaledger reconcile`: the fold-and-publish cycle.
//!
//! Order of effects: lock → fetch remote ledger → load snapshot → query
//! activity → fold → commit locally → write processed workbook → publish.
//! Nothing is written before the fold succeeds.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDate, Utc};
use tempfile::TempDir;

use rcaledger_config::{is_url, require_token, ActivityKind, PublishKind, RunConfig};
use rcaledger_io::{artifact, ledger_db, workbook, CsvEventLog, LedgerLock};
use rcaledger_recon::{
    load_snapshot, query_or_degrade, reconcile, ActivitySource, ActivityWindow, ArtifactFormat,
    CycleInput, Ledger, NoActivity, RawTable, ReconError, Reconciled, RunReport, TerminalRecord,
};
use rcaledger_store_client::{Blob, HttpActivitySource, StoreClient, StoreError};

use crate::exit_codes::{
    recon_exit_code, store_exit_code, EXIT_CONFIG_NO_TOKEN, EXIT_LEDGER_IO, EXIT_LEDGER_LOCKED,
    EXIT_PUBLISH_IO, EXIT_SNAPSHOT_UNREADABLE,
};
use crate::CliError;

#[derive(Debug, Clone, Default)]
pub struct CycleOptions {
    /// Overrides today's local date.
    pub run_date: Option<NaiveDate>,
    /// Fold and report, but write nothing.
    pub dry_run: bool,
    /// Commit locally but leave the publish target untouched.
    pub skip_publish: bool,
}

pub struct CycleResult {
    pub report: RunReport,
    pub records: Vec<TerminalRecord>,
    pub ledger: Ledger,
    pub committed: bool,
    /// Where the artifact went: local path or `owner/repo:path`.
    pub published_to: Option<String>,
}

// ============================================================================
// Error conversion
// ============================================================================

pub fn recon_error(err: ReconError) -> CliError {
    let hint = match &err {
        ReconError::MissingPartition { .. } | ReconError::MissingColumn { .. } => {
            Some("check [snapshot.layout] against the workbook headers".to_string())
        }
        ReconError::ConflictingKey { .. } => {
            Some("fix the duplicate in the source workbook, or set strict_keys = false".to_string())
        }
        ReconError::PublishConflict { .. } => {
            Some("another writer published first; rerun the cycle to fold on top of it".to_string())
        }
        _ => None,
    };
    CliError {
        code: recon_exit_code(&err),
        message: err.to_string(),
        hint,
    }
}

pub fn store_error(err: StoreError) -> CliError {
    match err {
        StoreError::Conflict { path, expected } => {
            recon_error(ReconError::PublishConflict { path, expected })
        }
        other => {
            let hint = matches!(other, StoreError::Unauthorized(_))
                .then(|| "check the publish.credential token".to_string());
            CliError {
                code: store_exit_code(&other),
                message: other.to_string(),
                hint,
            }
        }
    }
}

fn token_error(message: String) -> CliError {
    CliError {
        code: EXIT_CONFIG_NO_TOKEN,
        message,
        hint: None,
    }
}

fn ledger_error(message: String) -> CliError {
    CliError {
        code: EXIT_LEDGER_IO,
        message: format!("ledger: {}", message),
        hint: None,
    }
}

// ============================================================================
// Collaborators
// ============================================================================

/// Fetch (if remote) and import the snapshot workbook.
pub fn load_raw_snapshot(config: &RunConfig, work_dir: &Path) -> Result<RawTable, CliError> {
    let source = config.snapshot.source.trim();
    let path = if is_url(source) {
        let token = match &config.snapshot.credential {
            Some(name) => Some(require_token(name).map_err(token_error)?),
            None => None,
        };
        rcaledger_store_client::download(source, token.as_deref(), config.timeout(), work_dir).map_err(
            |e| CliError {
                code: EXIT_SNAPSHOT_UNREADABLE,
                message: format!("snapshot download failed: {}", e),
                hint: None,
            },
        )?
    } else {
        config.resolve(source)
    };

    workbook::import(&path)
        .map(|(raw, _)| raw)
        .map_err(|e| CliError {
            code: EXIT_SNAPSHOT_UNREADABLE,
            message: e,
            hint: None,
        })
}

pub fn activity_source(config: &RunConfig) -> Result<Box<dyn ActivitySource>, CliError> {
    let activity = &config.activity;
    match activity.kind {
        ActivityKind::None => Ok(Box::new(NoActivity)),
        ActivityKind::Csv => {
            let path = config.resolve(activity.path.as_deref().unwrap_or_default());
            Ok(Box::new(
                CsvEventLog::new(path).with_columns(&activity.id_field, &activity.timestamp_field),
            ))
        }
        ActivityKind::Http => {
            let token = match &activity.credential {
                Some(name) => Some(require_token(name).map_err(token_error)?),
                None => None,
            };
            let url = activity.url.as_deref().unwrap_or_default();
            let source = HttpActivitySource::new(url, token, config.timeout())
                .map_err(recon_error)?
                .with_fields(&activity.id_field, &activity.timestamp_field);
            Ok(Box::new(source))
        }
    }
}

pub fn store_client(config: &RunConfig) -> Result<StoreClient, CliError> {
    let publish = &config.publish;
    let credential = publish.credential.as_deref().unwrap_or_default();
    let token = require_token(credential).map_err(token_error)?;
    let client = StoreClient::new(
        &publish.api_base,
        publish.owner.as_deref().unwrap_or_default(),
        publish.repository.as_deref().unwrap_or_default(),
        token,
        config.timeout(),
    )
    .map_err(store_error)?;
    Ok(client.with_branch(publish.branch.clone()))
}

/// The ledger the fold starts from.
///
/// With a store target, the remote blob is authoritative for sqlite and csv
/// artifacts; xlsx artifacts are write-only, so the local database is read.
/// A remote sqlite blob is staged in `work_dir`; the local file only changes
/// at commit, after the fold.
fn load_ledger(config: &RunConfig, remote: Option<&Blob>, work_dir: &Path) -> Result<Ledger, CliError> {
    let source = match (remote, config.publish.format) {
        (Some(blob), ArtifactFormat::Csv) => {
            return rcaledger_recon::parse_export(&blob.bytes).map_err(recon_error);
        }
        (Some(blob), ArtifactFormat::Sqlite) => {
            let staged = work_dir.join("remote-ledger.db");
            artifact::write_atomic(&staged, &blob.bytes).map_err(ledger_error)?;
            staged
        }
        _ => config.ledger_path(),
    };

    let load = ledger_db::load(&source).map_err(ledger_error)?;
    Ok(load.ledger)
}

fn write_processed(config: &RunConfig, records: &[TerminalRecord]) -> Result<Option<PathBuf>, CliError> {
    let Some(processed) = config.output.processed.as_deref() else {
        return Ok(None);
    };
    let path = config.resolve(processed);
    let format = ArtifactFormat::from_path(processed).unwrap_or(ArtifactFormat::Xlsx);
    let bytes = artifact::render_processed(records, format).map_err(|e| CliError {
        code: EXIT_PUBLISH_IO,
        message: e,
        hint: Some("output.processed must end in .xlsx or .csv".into()),
    })?;
    artifact::write_atomic(&path, &bytes).map_err(|e| CliError {
        code: EXIT_PUBLISH_IO,
        message: e,
        hint: None,
    })?;
    log::info!("wrote processed workbook {}", path.display());
    Ok(Some(path))
}

fn write_report(config: &RunConfig, report: &RunReport) -> Result<(), CliError> {
    let Some(target) = config.output.report.as_deref() else {
        return Ok(());
    };
    let json = serde_json::to_vec_pretty(report).map_err(|e| CliError::io(e.to_string()))?;
    artifact::write_atomic(&config.resolve(target), &json).map_err(|e| CliError {
        code: EXIT_PUBLISH_IO,
        message: e,
        hint: None,
    })
}

// ============================================================================
// Cycle
// ============================================================================

fn window_for(config: &RunConfig, now: DateTime<Utc>) -> ActivityWindow {
    ActivityWindow::ending_at(now, config.activity.window_days)
}

/// Snapshot + activity → reconciled records. No ledger involved.
pub fn reconcile_snapshot(config: &RunConfig, write_outputs: bool) -> Result<Reconciled, CliError> {
    let work = TempDir::new().map_err(|e| CliError::io(e.to_string()))?;
    let raw = load_raw_snapshot(config, work.path())?;
    let load = load_snapshot(&raw, &config.snapshot.layout).map_err(recon_error)?;

    let source = activity_source(config)?;
    let window = window_for(config, Utc::now());
    let activity = query_or_degrade(source.as_ref(), &window).map_err(recon_error)?;
    let reconciled = reconcile(&load.snapshot, activity.as_ref());

    if write_outputs {
        write_processed(config, &reconciled.records)?;
    }
    Ok(reconciled)
}

/// One full fold-and-publish cycle.
pub fn run_cycle(config: &RunConfig, opts: &CycleOptions) -> Result<CycleResult, CliError> {
    let ledger_path = config.ledger_path();
    let _lock = LedgerLock::acquire(&ledger_path).map_err(|e| CliError {
        code: EXIT_LEDGER_LOCKED,
        message: e,
        hint: Some("another cycle is running; retry when it finishes".into()),
    })?;

    // Downloads live here and vanish with it
    let work = TempDir::new().map_err(|e| CliError::io(e.to_string()))?;

    let publish_to_store = config.publish.kind == PublishKind::Store && !opts.skip_publish;
    let store = if publish_to_store {
        Some(store_client(config)?)
    } else {
        None
    };
    let remote_path = config.publish.path.clone().unwrap_or_default();
    let remote = match &store {
        Some(client) => client.fetch(&remote_path).map_err(store_error)?,
        None => None,
    };
    let expected_sha = remote.as_ref().map(|b| b.sha.clone());

    let prior = load_ledger(config, remote.as_ref(), work.path())?;
    let raw = load_raw_snapshot(config, work.path())?;

    let source = activity_source(config)?;
    let now = Utc::now();
    let window = window_for(config, now);
    let activity = query_or_degrade(source.as_ref(), &window).map_err(recon_error)?;

    let run_date = opts.run_date.unwrap_or_else(|| Local::now().date_naive());
    let input = CycleInput {
        raw: &raw,
        layout: &config.snapshot.layout,
        activity: activity.as_ref(),
        ledger: &prior,
        fold: config.ledger.policy.options_for(run_date),
        window_days: config.activity.window_days,
        now,
    };
    let output = rcaledger_recon::run(&input).map_err(recon_error)?;
    let mut report = output.report;
    let ledger = output.outcome.ledger;
    let records = output.reconciled.records;

    if opts.dry_run {
        log::info!("dry run: {} ledger row(s) not committed", ledger.len());
        return Ok(CycleResult {
            report,
            records,
            ledger,
            committed: false,
            published_to: None,
        });
    }

    ledger_db::commit(&ledger_path, &ledger).map_err(ledger_error)?;
    write_processed(config, &records)?;

    let mut published_to = None;
    if !opts.skip_publish {
        match config.publish.kind {
            PublishKind::None => {}
            PublishKind::File => {
                let target = config.resolve(config.publish.path.as_deref().unwrap_or_default());
                let bytes = artifact::render_ledger(&ledger, config.publish.format).map_err(|e| CliError {
                    code: EXIT_PUBLISH_IO,
                    message: e,
                    hint: None,
                })?;
                artifact::write_atomic(&target, &bytes).map_err(|e| CliError {
                    code: EXIT_PUBLISH_IO,
                    message: e,
                    hint: None,
                })?;
                published_to = Some(target.display().to_string());
            }
            PublishKind::Store => {
                if let Some(client) = &store {
                    let bytes = artifact::render_ledger(&ledger, config.publish.format).map_err(|e| CliError {
                        code: EXIT_PUBLISH_IO,
                        message: e,
                        hint: None,
                    })?;
                    let sha = client
                        .put(&remote_path, &bytes, expected_sha.as_deref(), &config.publish.message)
                        .map_err(store_error)?;
                    report.published_revision = Some(sha);
                    published_to = Some(format!("{}:{}", client.describe(), remote_path));
                }
            }
        }
    }

    write_report(config, &report)?;

    Ok(CycleResult {
        report,
        records,
        ledger,
        committed: true,
        published_to,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exit_codes::{EXIT_PUBLISH_CONFLICT, EXIT_SNAPSHOT_PARTITION};
    use httpmock::prelude::*;
    use std::fs;

    const REGISTERED: &str = "Terminal_ID,Merchant_Name,LastSeenDate\n\
                              2033AB01,Alpha Stores,2023-09-30\n\
                              2033AB02,Beta Foods,\n";

    fn fixture(dir: &Path, extra: &str) -> RunConfig {
        let inbox = dir.join("inbox");
        fs::create_dir_all(&inbox).unwrap();
        fs::write(inbox.join("REGISTERED TERMINALS.csv"), REGISTERED).unwrap();
        fs::write(inbox.join("CONNECTED TERMINALS.csv"), "Terminal_ID\n2033AB01\n").unwrap();
        fs::write(inbox.join("ACTIVE TERMINALS.csv"), "Terminal_ID\n2033AB02\n").unwrap();

        let text = format!(
            "[snapshot]\nsource = \"inbox\"\n\n[ledger]\npath = \"state/legacy.db\"\n{}",
            extra
        );
        let config = RunConfig::from_toml(&text, dir).unwrap();
        config.validate().unwrap();
        config
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn opts(run_date: NaiveDate) -> CycleOptions {
        CycleOptions {
            run_date: Some(run_date),
            ..Default::default()
        }
    }

    #[test]
    fn test_cycle_commits_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let config = fixture(dir.path(), "");

        let first = run_cycle(&config, &opts(d(2024, 1, 10))).unwrap();
        assert!(first.committed);
        assert_eq!(first.report.fold.inserted, 2);
        assert_eq!(first.report.meta.status_source, rcaledger_recon::StatusSource::Snapshot);

        let stored = ledger_db::load(&config.ledger_path()).unwrap().ledger;
        assert_eq!(stored.len(), 2);
        assert_eq!(stored.get("2033AB01").unwrap().last_transaction_date, Some(d(2024, 1, 10)));

        let second = run_cycle(&config, &opts(d(2024, 1, 10))).unwrap();
        assert_eq!(second.ledger, stored);
        assert_eq!(second.report.fold.inserted, 0);
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = fixture(dir.path(), "\n[output]\nprocessed = \"out/Processed_RCA.csv\"\n");

        let result = run_cycle(
            &config,
            &CycleOptions {
                run_date: Some(d(2024, 1, 10)),
                dry_run: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(!result.committed);
        assert_eq!(result.ledger.len(), 2);
        assert!(!config.ledger_path().exists());
        assert!(!dir.path().join("out/Processed_RCA.csv").exists());
    }

    #[test]
    fn test_file_publish_and_processed_workbook() {
        let dir = tempfile::tempdir().unwrap();
        let config = fixture(
            dir.path(),
            "\n[publish]\nkind = \"file\"\nformat = \"csv\"\npath = \"out/ledger.csv\"\n\
             \n[output]\nprocessed = \"out/Processed_RCA.csv\"\nreport = \"out/report.json\"\n",
        );

        let result = run_cycle(&config, &opts(d(2024, 1, 10))).unwrap();
        assert!(result.published_to.unwrap().ends_with("ledger.csv"));

        let published = fs::read(dir.path().join("out/ledger.csv")).unwrap();
        assert_eq!(rcaledger_recon::parse_export(&published).unwrap(), result.ledger);

        let processed = fs::read_to_string(dir.path().join("out/Processed_RCA.csv")).unwrap();
        assert!(processed.starts_with("Terminal_ID,Merchant_Name,STATUS,CONNECTED,LAST_TRANSACTION_DATE"));
        assert!(processed.contains("2033AB02,Beta Foods,ACTIVE,NO,Not available"));

        let report: serde_json::Value =
            serde_json::from_slice(&fs::read(dir.path().join("out/report.json")).unwrap()).unwrap();
        assert_eq!(report["fold"]["total"], 2);
    }

    #[test]
    fn test_csv_activity_overrides_snapshot_status() {
        let dir = tempfile::tempdir().unwrap();
        let recent = (Utc::now() - chrono::Duration::days(2)).to_rfc3339();
        fs::write(
            dir.path().join("events.csv"),
            format!("terminalId,updatedAt\n2033AB01,{}\n", recent),
        )
        .unwrap();
        let config = fixture(dir.path(), "\n[activity]\nkind = \"csv\"\npath = \"events.csv\"\n");

        let result = run_cycle(&config, &opts(d(2024, 1, 10))).unwrap();
        let status = |id: &str| result.records.iter().find(|r| r.terminal_id == id).unwrap().status;
        assert_eq!(status("2033AB01"), rcaledger_recon::TerminalStatus::Active);
        assert_eq!(status("2033AB02"), rcaledger_recon::TerminalStatus::Inactive);
        assert_eq!(result.report.meta.status_source, rcaledger_recon::StatusSource::Activity);
    }

    #[test]
    fn test_missing_partition_leaves_ledger_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let config = fixture(dir.path(), "");
        run_cycle(&config, &opts(d(2024, 1, 10))).unwrap();
        let before = fs::read(config.ledger_path()).unwrap();

        fs::remove_file(dir.path().join("inbox/ACTIVE TERMINALS.csv")).unwrap();
        let err = run_cycle(&config, &opts(d(2024, 1, 11))).err().unwrap();
        assert_eq!(err.code, EXIT_SNAPSHOT_PARTITION);
        assert_eq!(fs::read(config.ledger_path()).unwrap(), before);
    }

    #[test]
    fn test_lock_held_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let config = fixture(dir.path(), "");
        let _held = LedgerLock::acquire(&config.ledger_path()).unwrap();

        let err = run_cycle(&config, &opts(d(2024, 1, 10))).err().unwrap();
        assert_eq!(err.code, EXIT_LEDGER_LOCKED);
    }

    fn store_config(dir: &Path, server: &MockServer) -> RunConfig {
        store_config_as(dir, server, "csv", "data/ledger.csv")
    }

    fn store_config_as(dir: &Path, server: &MockServer, format: &str, path: &str) -> RunConfig {
        std::env::set_var("RCALEDGER_CYCLE_TEST_TOKEN", "tok");
        fixture(
            dir,
            &format!(
                "\n[publish]\nkind = \"store\"\nformat = \"{}\"\npath = \"{}\"\n\
                 owner = \"acme\"\nrepository = \"ledger\"\ncredential = \"cycle-test\"\napi_base = \"{}\"\n",
                format,
                path,
                server.base_url()
            ),
        )
    }

    #[test]
    fn test_store_publish_folds_on_remote_and_sends_sha() {
        use base64::Engine;
        let server = MockServer::start();
        let remote_csv = "terminal_id,merchant_name,status,connected,last_transaction_date\n\
                          2010XX77,,,,2022-02-02\n";
        let encoded = base64::engine::general_purpose::STANDARD.encode(remote_csv);

        server.mock(|when, then| {
            when.method(GET).path("/repos/acme/ledger/contents/data/ledger.csv");
            then.status(200).json_body(serde_json::json!({
                "sha": "abc123", "encoding": "base64", "content": encoded
            }));
        });
        let put = server.mock(|when, then| {
            when.method(PUT)
                .path("/repos/acme/ledger/contents/data/ledger.csv")
                .body_includes("\"sha\":\"abc123\"");
            then.status(200).json_body(serde_json::json!({ "content": { "sha": "def456" } }));
        });

        let dir = tempfile::tempdir().unwrap();
        let config = store_config(dir.path(), &server);
        let result = run_cycle(&config, &opts(d(2024, 1, 10))).unwrap();

        put.assert();
        assert_eq!(result.report.published_revision.as_deref(), Some("def456"));
        assert_eq!(result.ledger.len(), 3);
        assert_eq!(result.ledger.get("2010XX77").unwrap().last_transaction_date, Some(d(2022, 2, 2)));
    }

    #[test]
    fn test_failed_cycle_keeps_local_ledger_with_sqlite_store() {
        use base64::Engine;
        let dir = tempfile::tempdir().unwrap();
        let server = MockServer::start();
        let config = store_config_as(dir.path(), &server, "sqlite", "data/legacy.db");

        let local: Ledger = [rcaledger_recon::LedgerEntry::new("2033AB01", d(2023, 12, 1))]
            .into_iter()
            .collect();
        ledger_db::commit(&config.ledger_path(), &local).unwrap();
        let before = fs::read(config.ledger_path()).unwrap();

        let remote: Ledger = [rcaledger_recon::LedgerEntry::new("2010XX77", d(2022, 2, 2))]
            .into_iter()
            .collect();
        let blob = artifact::render_ledger(&remote, ArtifactFormat::Sqlite).unwrap();
        let encoded = base64::engine::general_purpose::STANDARD.encode(blob);
        server.mock(|when, then| {
            when.method(GET).path("/repos/acme/ledger/contents/data/legacy.db");
            then.status(200).json_body(serde_json::json!({
                "sha": "abc123", "encoding": "base64", "content": encoded
            }));
        });
        let put = server.mock(|when, then| {
            when.method(PUT).path("/repos/acme/ledger/contents/data/legacy.db");
            then.status(200).json_body(serde_json::json!({ "content": { "sha": "def456" } }));
        });

        fs::remove_file(dir.path().join("inbox/ACTIVE TERMINALS.csv")).unwrap();
        let err = run_cycle(&config, &opts(d(2024, 1, 10))).err().unwrap();
        assert_eq!(err.code, EXIT_SNAPSHOT_PARTITION);
        assert_eq!(fs::read(config.ledger_path()).unwrap(), before);
        put.assert_calls(0);
    }

    #[test]
    fn test_store_conflict_is_fatal() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/repos/acme/ledger/contents/data/ledger.csv");
            then.status(404);
        });
        server.mock(|when, then| {
            when.method(PUT).path("/repos/acme/ledger/contents/data/ledger.csv");
            then.status(422).json_body(serde_json::json!({ "message": "\"sha\" wasn't supplied." }));
        });

        let dir = tempfile::tempdir().unwrap();
        let config = store_config(dir.path(), &server);
        let err = run_cycle(&config, &opts(d(2024, 1, 10))).err().unwrap();
        assert_eq!(err.code, EXIT_PUBLISH_CONFLICT);
        assert!(err.hint.is_some());
    }

    #[test]
    fn test_reconcile_only_writes_processed_workbook() {
        let dir = tempfile::tempdir().unwrap();
        let config = fixture(dir.path(), "\n[output]\nprocessed = \"out/Processed_RCA.xlsx\"\n");

        let reconciled = reconcile_snapshot(&config, true).unwrap();
        assert_eq!(reconciled.records.len(), 2);
        assert!(dir.path().join("out/Processed_RCA.xlsx").exists());
        assert!(!config.ledger_path().exists());
    }
}
