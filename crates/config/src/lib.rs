// Configuration loading

pub mod run_config;
pub mod secrets;

pub use run_config::{
    is_url, ActivityConfig, ActivityKind, ConfigError, LedgerConfig, NetworkConfig, OutputConfig,
    PublishConfig, PublishKind, RunConfig, SnapshotConfig, CONFIG_ENV,
};
pub use secrets::{get_token, require_token, TokenLookup, TokenSource};
