// rcaledger - RCA terminal ledger
// Folds the daily RCA snapshot into the rolling last-transaction ledger and publishes it.

mod cycle;
mod exit_codes;
mod logging;

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};

use rcaledger_config::secrets::{delete_token, env_var_name, set_token};
use rcaledger_config::{get_token, ActivityKind, ConfigError, PublishKind, RunConfig, TokenSource};
use rcaledger_io::{artifact, ledger_db};
use rcaledger_recon::{ArtifactFormat, RunReport};

use cycle::{CycleOptions, CycleResult};
use exit_codes::{
    EXIT_CONFIG_INVALID, EXIT_CONFIG_MISSING, EXIT_ERROR, EXIT_KEYCHAIN, EXIT_LEDGER_IO,
    EXIT_PUBLISH_IO, EXIT_SUCCESS, EXIT_USAGE,
};

#[derive(Parser)]
#[command(name = "rcaledger")]
#[command(about = "RCA terminal ledger: reconcile the daily snapshot and publish last-transaction dates")]
#[command(long_version = long_version())]
#[command(version)]
#[command(subcommand_required = false)]
struct Cli {
    /// Run configuration (default: $RCALEDGER_CONFIG, then the user config dir)
    #[arg(long, short = 'c', global = true, env = "RCALEDGER_CONFIG")]
    config: Option<PathBuf>,

    /// Log at debug level (RCALEDGER_LOG overrides)
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one cycle: load, reconcile, fold, commit, publish
    #[command(after_help = "\
Examples:
  rcaledger run
  rcaledger run --dry-run --json
  rcaledger run --run-date 2024-01-10 --no-publish
  rcaledger -c /etc/rcaledger/config.toml run

Exit codes:
  0   cycle committed (and published, if configured)
  10-14  snapshot rejected; ledger untouched
  20  another cycle holds the ledger lock
  40  publish target changed since it was read; rerun to fold on top")]
    Run {
        /// Stamp date for present terminals (default: today, local time)
        #[arg(long, value_name = "YYYY-MM-DD")]
        run_date: Option<NaiveDate>,

        /// Print the run report as JSON on stdout
        #[arg(long)]
        json: bool,

        /// Fold and report without writing anything
        #[arg(long)]
        dry_run: bool,

        /// Commit locally but skip the publish step
        #[arg(long)]
        no_publish: bool,
    },

    /// Reconcile the snapshot against activity without touching the ledger
    #[command(after_help = "\
Examples:
  rcaledger reconcile
  rcaledger reconcile --output Processed_RCA.xlsx
  rcaledger reconcile --json | jq '.summary'")]
    Reconcile {
        /// Write the processed workbook here (.xlsx or .csv)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,

        /// Print the summary as JSON on stdout
        #[arg(long)]
        json: bool,
    },

    /// Write the current ledger in a published artifact format
    #[command(after_help = "\
Examples:
  rcaledger export > ledger.csv
  rcaledger export --format xlsx -o ledger.xlsx
  rcaledger export --ledger legacy.db --format csv")]
    Export {
        /// Ledger database (default: [ledger].path from the config)
        #[arg(long)]
        ledger: Option<PathBuf>,

        /// Artifact format (default: from --output extension, else csv)
        #[arg(long, short = 'f')]
        format: Option<FormatArg>,

        /// Output file (default: stdout, csv only)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Check the run configuration and credentials without running a cycle
    Validate {
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage tokens for named credentials
    #[command(subcommand)]
    Credential(CredentialCommands),
}

#[derive(Subcommand)]
enum CredentialCommands {
    /// Store a token in the system keychain (token read from stdin)
    #[command(after_help = "\
Examples:
  echo \"$TOKEN\" | rcaledger credential set github
  rcaledger credential set activity < token.txt")]
    Set {
        /// Credential name as used in config.toml
        name: String,
    },

    /// Remove a token from the system keychain
    Delete { name: String },

    /// Show where a credential's token would be read from
    Status { name: String },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Sqlite,
    Csv,
    Xlsx,
}

impl From<FormatArg> for ArtifactFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Sqlite => ArtifactFormat::Sqlite,
            FormatArg::Csv => ArtifactFormat::Csv,
            FormatArg::Xlsx => ArtifactFormat::Xlsx,
        }
    }
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (", env!("RCALEDGER_COMMIT"), ")",
        "\ntarget:  ", env!("RCALEDGER_TARGET"),
        "\nledger:  RCA_table (sqlite), csv, xlsx",
    )
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let config_path = cli.config;
    let result = match cli.command {
        None => {
            // No subcommand = show help
            eprintln!("Usage: rcaledger <command> [options]");
            eprintln!("       rcaledger --help for more information");
            Ok(())
        }
        Some(Commands::Run { run_date, json, dry_run, no_publish }) => cmd_run(
            config_path.as_deref(),
            CycleOptions {
                run_date,
                dry_run,
                skip_publish: no_publish,
            },
            json,
        ),
        Some(Commands::Reconcile { output, json }) => cmd_reconcile(config_path.as_deref(), output, json),
        Some(Commands::Export { ledger, format, output }) => {
            cmd_export(config_path.as_deref(), ledger, format, output)
        }
        Some(Commands::Validate { json }) => cmd_validate(config_path.as_deref(), json),
        Some(Commands::Credential(command)) => match command {
            CredentialCommands::Set { name } => cmd_credential_set(&name),
            CredentialCommands::Delete { name } => cmd_credential_delete(&name),
            CredentialCommands::Status { name } => cmd_credential_status(&name),
        },
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn args(msg: impl Into<String>) -> Self {
        Self { code: EXIT_USAGE, message: msg.into(), hint: None }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self { code: EXIT_ERROR, message: msg.into(), hint: None }
    }

    pub fn config(err: ConfigError) -> Self {
        match err {
            ConfigError::NotFound(path) => Self {
                code: EXIT_CONFIG_MISSING,
                message: format!("config file not found: {}", path.display()),
                hint: Some(format!(
                    "pass --config or set {}",
                    rcaledger_config::CONFIG_ENV
                )),
            },
            other => Self { code: EXIT_CONFIG_INVALID, message: other.to_string(), hint: None },
        }
    }

    pub fn keychain(msg: impl Into<String>) -> Self {
        Self { code: EXIT_KEYCHAIN, message: msg.into(), hint: None }
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

fn load_config(explicit: Option<&Path>) -> Result<RunConfig, CliError> {
    let path = RunConfig::locate(explicit);
    log::debug!("config: {}", path.display());
    RunConfig::load(&path).map_err(CliError::config)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), CliError> {
    let text = serde_json::to_string_pretty(value).map_err(|e| CliError::io(e.to_string()))?;
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    writeln!(handle, "{}", text).map_err(|e| CliError::io(e.to_string()))
}

// ============================================================================
// run
// ============================================================================

fn cmd_run(config_path: Option<&Path>, opts: CycleOptions, json: bool) -> Result<(), CliError> {
    let config = load_config(config_path)?;
    let result = cycle::run_cycle(&config, &opts)?;

    if json {
        print_json(&result.report)?;
    }
    print_run_summary(&result);
    Ok(())
}

fn print_run_summary(result: &CycleResult) {
    let RunReport { meta, reconcile, fold, conflicts, published_revision } = &result.report;

    eprintln!(
        "run {} (status from {}, {}-day window)",
        meta.run_date, meta.status_source, meta.window_days
    );
    eprintln!(
        "  terminals  {} total, {} active, {} inactive, {} connected",
        reconcile.total, reconcile.active, reconcile.inactive, reconcile.connected
    );
    eprintln!(
        "  ledger     {} inserted, {} stamped, {} refreshed, {} carried forward, {} total",
        fold.inserted, fold.stamped, fold.refreshed_only, fold.carried_forward, fold.total
    );
    if !conflicts.is_empty() {
        eprintln!("  conflicts  {} duplicate terminal ID(s), last row kept", conflicts.len());
        for c in conflicts.iter().take(5) {
            eprintln!("             {} x{}: {}", c.terminal_id, c.occurrences, c.detail);
        }
    }

    if !result.committed {
        eprintln!("  dry run: nothing written");
        return;
    }
    match (&result.published_to, published_revision) {
        (Some(target), Some(sha)) => {
            eprintln!("  published  {} @ {}", target, &sha[..sha.len().min(7)])
        }
        (Some(target), None) => eprintln!("  published  {}", target),
        (None, _) => eprintln!("  published  (skipped)"),
    }
}

// ============================================================================
// reconcile
// ============================================================================

fn cmd_reconcile(config_path: Option<&Path>, output: Option<PathBuf>, json: bool) -> Result<(), CliError> {
    let mut config = load_config(config_path)?;
    if let Some(path) = output {
        if ArtifactFormat::from_path(&path.to_string_lossy()).is_none() {
            return Err(CliError::args(format!(
                "cannot infer format from '{}'",
                path.display()
            ))
            .with_hint("use a .xlsx or .csv extension"));
        }
        config.output.processed = Some(path.to_string_lossy().into_owned());
    }

    let reconciled = cycle::reconcile_snapshot(&config, true)?;

    if json {
        print_json(&serde_json::json!({
            "status_source": reconciled.status_source,
            "summary": reconciled.summary,
        }))?;
    }

    let s = &reconciled.summary;
    eprintln!(
        "reconciled {} terminals (status from {}): {} active, {} inactive, {} connected, {} without activity date",
        s.total, reconciled.status_source, s.active, s.inactive, s.connected, s.undated
    );
    if let Some(path) = &config.output.processed {
        eprintln!("wrote {}", config.resolve(path).display());
    }
    Ok(())
}

// ============================================================================
// export
// ============================================================================

fn cmd_export(
    config_path: Option<&Path>,
    ledger: Option<PathBuf>,
    format: Option<FormatArg>,
    output: Option<PathBuf>,
) -> Result<(), CliError> {
    let ledger_path = match ledger {
        Some(path) => path,
        None => load_config(config_path)?.ledger_path(),
    };

    let format = match (format, &output) {
        (Some(f), _) => ArtifactFormat::from(f),
        (None, Some(path)) => ArtifactFormat::from_path(&path.to_string_lossy()).unwrap_or(ArtifactFormat::Csv),
        (None, None) => ArtifactFormat::Csv,
    };
    if output.is_none() && format != ArtifactFormat::Csv {
        return Err(CliError::args(format!("{} export needs --output", format))
            .with_hint("only csv can be written to stdout"));
    }

    if !ledger_path.exists() {
        return Err(CliError {
            code: EXIT_LEDGER_IO,
            message: format!("ledger not found: {}", ledger_path.display()),
            hint: Some("run a cycle first, or pass --ledger".into()),
        });
    }
    let load = ledger_db::load(&ledger_path).map_err(|e| CliError {
        code: EXIT_LEDGER_IO,
        message: e,
        hint: None,
    })?;
    if !load.undated.is_empty() {
        log::warn!("{} ledger row(s) have no readable date and export with an empty date cell", load.undated.len());
    }

    let bytes = artifact::render_ledger(&load.ledger, format).map_err(|e| CliError {
        code: EXIT_PUBLISH_IO,
        message: e,
        hint: None,
    })?;

    match output {
        Some(path) => {
            artifact::write_atomic(&path, &bytes).map_err(|e| CliError {
                code: EXIT_PUBLISH_IO,
                message: e,
                hint: None,
            })?;
            eprintln!("exported {} terminals to {}", load.ledger.len(), path.display());
        }
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle.write_all(&bytes).map_err(|e| CliError::io(e.to_string()))?;
        }
    }
    Ok(())
}

// ============================================================================
// validate
// ============================================================================

/// Credentials the config refers to, with the section that uses each.
fn referenced_credentials(config: &RunConfig) -> Vec<(&'static str, String)> {
    let mut names = Vec::new();
    if let Some(name) = &config.snapshot.credential {
        names.push(("snapshot", name.clone()));
    }
    if config.activity.kind == ActivityKind::Http {
        if let Some(name) = &config.activity.credential {
            names.push(("activity", name.clone()));
        }
    }
    if config.publish.kind == PublishKind::Store {
        if let Some(name) = &config.publish.credential {
            names.push(("publish", name.clone()));
        }
    }
    names
}

fn cmd_validate(config_path: Option<&Path>, json: bool) -> Result<(), CliError> {
    let path = RunConfig::locate(config_path);
    let config = RunConfig::load(&path).map_err(CliError::config)?;

    let credentials: Vec<_> = referenced_credentials(&config)
        .into_iter()
        .map(|(section, name)| {
            let lookup = get_token(&name);
            (section, name, lookup.source)
        })
        .collect();
    let missing: Vec<_> = credentials
        .iter()
        .filter(|(_, _, source)| *source == TokenSource::None)
        .map(|(section, name, _)| format!("{}.credential '{}'", section, name))
        .collect();

    if json {
        let creds: Vec<_> = credentials
            .iter()
            .map(|(section, name, source)| {
                serde_json::json!({
                    "section": section,
                    "name": name,
                    "source": source.as_str(),
                })
            })
            .collect();
        print_json(&serde_json::json!({
            "config": path.display().to_string(),
            "status": if missing.is_empty() { "ok" } else { "missing_credentials" },
            "ledger": config.ledger_path().display().to_string(),
            "snapshot": config.snapshot.source,
            "publish": config.publish.kind,
            "credentials": creds,
        }))?;
    } else {
        eprintln!("config     {}", path.display());
        eprintln!("snapshot   {}", config.snapshot.source);
        eprintln!("ledger     {}", config.ledger_path().display());
        for (section, name, source) in &credentials {
            eprintln!("credential {} ({}): {}", name, section, source.as_str());
        }
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(CliError {
            code: exit_codes::EXIT_CONFIG_NO_TOKEN,
            message: format!("no token for {}", missing.join(", ")),
            hint: Some("run `rcaledger credential set <name>` or set RCALEDGER_<NAME>_TOKEN".into()),
        })
    }
}

// ============================================================================
// credential
// ============================================================================

fn cmd_credential_set(name: &str) -> Result<(), CliError> {
    let mut token = String::new();
    io::stdin()
        .read_to_string(&mut token)
        .map_err(|e| CliError::io(format!("failed to read token from stdin: {}", e)))?;
    let token = token.trim();
    if token.is_empty() {
        return Err(CliError::args("empty token on stdin"));
    }

    set_token(name, token).map_err(|e| {
        CliError::keychain(e).with_hint(format!("set {} instead", env_var_name(name)))
    })?;
    eprintln!("stored token for '{}' in the system keychain", name);
    Ok(())
}

fn cmd_credential_delete(name: &str) -> Result<(), CliError> {
    delete_token(name).map_err(CliError::keychain)?;
    eprintln!("removed token for '{}'", name);
    Ok(())
}

fn cmd_credential_status(name: &str) -> Result<(), CliError> {
    let lookup = get_token(name);
    println!("{}: {}", name, lookup.source.as_str());
    if lookup.source == TokenSource::None {
        return Err(CliError {
            code: exit_codes::EXIT_CONFIG_NO_TOKEN,
            message: String::new(),
            hint: Some(format!(
                "run `rcaledger credential set {}` or set {}",
                name,
                env_var_name(name)
            )),
        });
    }
    Ok(())
}
