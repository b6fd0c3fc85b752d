// Run configuration: one TOML file describing every collaborator of a cycle.
//
// Search order:
// 1. Explicit path (--config)
// 2. RCALEDGER_CONFIG environment variable
// 3. <config_dir>/rcaledger/config.toml
//
// Relative paths inside the file resolve against the file's own directory,
// so a config can travel with its data.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use rcaledger_recon::{ArtifactFormat, LedgerPolicy, SnapshotLayout, DEFAULT_WINDOW_DAYS};
use serde::{Deserialize, Serialize};

/// Environment variable that overrides the default config location.
pub const CONFIG_ENV: &str = "RCALEDGER_CONFIG";

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_API_BASE: &str = "https://api.github.com";
pub const DEFAULT_COMMIT_MESSAGE: &str = "Update database file";

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// No file at the resolved location.
    NotFound(PathBuf),
    Read { path: PathBuf, message: String },
    Parse(String),
    /// Parsed fine but a required key is missing or a value is out of range.
    Invalid(Vec<String>),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::NotFound(path) => write!(f, "config file not found: {}", path.display()),
            ConfigError::Read { path, message } => {
                write!(f, "cannot read {}: {}", path.display(), message)
            }
            ConfigError::Parse(msg) => write!(f, "invalid config: {}", msg),
            ConfigError::Invalid(problems) => {
                write!(f, "invalid config: {}", problems.join("; "))
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SnapshotConfig {
    /// Local workbook path, directory of partition CSVs, or an http(s) URL.
    pub source: String,
    /// Credential used when `source` is a URL that needs auth.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
    #[serde(default)]
    pub layout: SnapshotLayout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    /// No activity collaborator: every run uses snapshot status.
    #[default]
    None,
    /// Exported event log on disk.
    Csv,
    /// JSON endpoint returning the grouped-max aggregate.
    Http,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ActivityConfig {
    pub kind: ActivityKind,
    pub path: Option<String>,
    pub url: Option<String>,
    pub credential: Option<String>,
    pub window_days: u32,
    /// Column (CSV) or field (JSON) holding the terminal id.
    pub id_field: String,
    /// Column (CSV) or field (JSON) holding the event timestamp.
    pub timestamp_field: String,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            kind: ActivityKind::None,
            path: None,
            url: None,
            credential: None,
            window_days: DEFAULT_WINDOW_DAYS,
            id_field: "terminalId".into(),
            timestamp_field: "updatedAt".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LedgerConfig {
    /// Local working copy of the ledger database.
    pub path: String,
    #[serde(flatten)]
    pub policy: LedgerPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishKind {
    #[default]
    None,
    /// Write the artifact to a local path.
    File,
    /// Versioned blob store (GitHub contents API shape).
    Store,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PublishConfig {
    pub kind: PublishKind,
    pub format: ArtifactFormat,
    /// Local path (`file`) or repository path (`store`).
    pub path: Option<String>,
    pub api_base: String,
    pub owner: Option<String>,
    pub repository: Option<String>,
    pub branch: Option<String>,
    pub credential: Option<String>,
    pub message: String,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            kind: PublishKind::None,
            format: ArtifactFormat::Sqlite,
            path: None,
            api_base: DEFAULT_API_BASE.into(),
            owner: None,
            repository: None,
            branch: None,
            credential: None,
            message: DEFAULT_COMMIT_MESSAGE.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Where to write the processed RCA workbook (`.xlsx` or `.csv`).
    pub processed: Option<String>,
    /// Where to write the JSON run report.
    pub report: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

// ============================================================================
// RunConfig
// ============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RunConfig {
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub activity: ActivityConfig,
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub publish: PublishConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    /// Directory relative paths resolve against. Not part of the file.
    #[serde(skip)]
    base_dir: PathBuf,
}

impl RunConfig {
    /// Default config location (`<config_dir>/rcaledger/config.toml`).
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rcaledger")
            .join("config.toml")
    }

    /// Resolve which file to load: explicit path, then env, then default.
    pub fn locate(explicit: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }
        match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
            _ => Self::default_path(),
        }
    }

    /// Parse without validating. Relative paths resolve against `base_dir`.
    pub fn from_toml(text: &str, base_dir: &Path) -> Result<Self, ConfigError> {
        let mut config: RunConfig =
            toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.base_dir = base_dir.to_path_buf();
        Ok(config)
    }

    /// Read, parse and validate the file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let config = Self::from_toml(&text, &base_dir)?;
        config.validate()?;
        Ok(config)
    }

    /// Collect every problem rather than stopping at the first.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if blank(&self.snapshot.source) {
            problems.push("snapshot.source is required".to_string());
        }
        if let Err(e) = self.snapshot.layout.validate() {
            problems.push(format!("snapshot.layout: {}", e));
        }

        let activity = &self.activity;
        match activity.kind {
            ActivityKind::None => {}
            ActivityKind::Csv => {
                if activity.path.as_deref().map_or(true, blank) {
                    problems.push("activity.path is required when activity.kind = \"csv\"".into());
                }
            }
            ActivityKind::Http => {
                if activity.url.as_deref().map_or(true, blank) {
                    problems.push("activity.url is required when activity.kind = \"http\"".into());
                }
            }
        }
        if activity.window_days == 0 || activity.window_days > 366 {
            problems.push(format!(
                "activity.window_days must be between 1 and 366 (got {})",
                activity.window_days
            ));
        }
        if activity.kind != ActivityKind::None
            && (blank(&activity.id_field) || blank(&activity.timestamp_field))
        {
            problems.push("activity.id_field and activity.timestamp_field must not be blank".into());
        }

        if blank(&self.ledger.path) {
            problems.push("ledger.path is required".into());
        }

        let publish = &self.publish;
        match publish.kind {
            PublishKind::None => {}
            PublishKind::File => {
                if publish.path.as_deref().map_or(true, blank) {
                    problems.push("publish.path is required when publish.kind = \"file\"".into());
                }
            }
            PublishKind::Store => {
                for (key, value) in [
                    ("publish.path", &publish.path),
                    ("publish.owner", &publish.owner),
                    ("publish.repository", &publish.repository),
                    ("publish.credential", &publish.credential),
                ] {
                    if value.as_deref().map_or(true, blank) {
                        problems.push(format!("{} is required when publish.kind = \"store\"", key));
                    }
                }
                if blank(&publish.api_base) {
                    problems.push("publish.api_base must not be blank".into());
                }
            }
        }

        if self.network.timeout_secs == 0 {
            problems.push("network.timeout_secs must be at least 1".into());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Resolve a config-relative path. Absolute paths pass through.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.base_dir.join(p)
        }
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.resolve(&self.ledger.path)
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.network.timeout_secs)
    }
}

/// `http://` or `https://` sources are downloaded; anything else is a path.
pub fn is_url(source: &str) -> bool {
    let s = source.trim_start().to_ascii_lowercase();
    s.starts_with("http://") || s.starts_with("https://")
}

fn blank(s: &str) -> bool {
    s.trim().is_empty()
}
