//! CLI + TOML config, in the style of `trust/config.rs`: command-line
//! flags (with env fallback) are authoritative; an optional config file
//! supplies defaults for anything not passed on the command line.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

#[derive(clap::Parser, Debug)]
#[command(name = "holonet-core", about = "Distributed task/workflow orchestrator core")]
pub struct CliArgs {
    /// TCP bind address for the worker dispatch plane
    #[arg(long, env = "HOLONET_BIND", default_value = "0.0.0.0:7878")]
    pub bind: String,

    /// Postgres connection string
    #[arg(long, env = "HOLONET_DATABASE_URL")]
    pub database_url: Option<String>,

    /// Maximum pool connections to the store
    #[arg(long, env = "HOLONET_DB_MAX_CONNECTIONS", default_value_t = 10)]
    pub db_max_connections: u32,

    /// NetBox base host, e.g. https://netbox.example.com
    #[arg(long, env = "NETBOX_HOST")]
    pub netbox_host: Option<String>,

    /// NetBox API token
    #[arg(long, env = "NETBOX_API_TOKEN")]
    pub netbox_token: Option<String>,

    /// If set, load NetBox credentials from the store's
    /// `netbox_credentials` table for this user id instead of the
    /// static host/token flags
    #[arg(long, env = "NETBOX_CREDENTIALS_USER_ID")]
    pub netbox_credentials_user_id: Option<i32>,

    /// Default Gatekeeper rate limit, requests per minute
    #[arg(long, env = "HOLONET_RATE_LIMIT", default_value_t = 100)]
    pub rate_limit_per_minute: u32,

    /// Crash-recovery cutoff for orphaned running executions, in seconds
    #[arg(long, env = "HOLONET_MAX_EXECUTION_AGE_SECS", default_value_t = 3600)]
    pub max_execution_age_secs: u64,

    /// Path to an optional TOML config file supplying defaults
    #[arg(long, env = "HOLONET_CONFIG")]
    pub config: Option<PathBuf>,
}

impl CliArgs {
    pub fn max_execution_age(&self) -> Duration {
        Duration::from_secs(self.max_execution_age_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    #[serde(default)]
    bind: Option<String>,
    #[serde(default)]
    database_url: Option<String>,
    #[serde(default)]
    netbox_host: Option<String>,
    #[serde(default)]
    netbox_token: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Io(PathBuf, std::io::Error),

    #[error("failed to parse config file {0}: {1}")]
    Toml(PathBuf, toml::de::Error),
}

/// Layers an optional config file's values beneath the CLI args: any
/// field the user didn't pass on the command line (still at its clap
/// default, for the string fields that have none) is filled from the
/// file if present.
pub fn apply_config_file(mut args: CliArgs) -> Result<CliArgs, ConfigError> {
    let Some(path) = args.config.clone() else {
        return Ok(args);
    };
    if !path.exists() {
        return Ok(args);
    }

    let file = load_file(&path)?;

    if args.database_url.is_none() {
        args.database_url = file.database_url;
    }
    if args.netbox_host.is_none() {
        args.netbox_host = file.netbox_host;
    }
    if args.netbox_token.is_none() {
        args.netbox_token = file.netbox_token;
    }
    if let Some(bind) = file.bind {
        if args.bind == "0.0.0.0:7878" {
            args.bind = bind;
        }
    }

    Ok(args)
}

fn load_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
    toml::from_str(&content).map_err(|e| ConfigError::Toml(path.to_path_buf(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn config_file_fills_unset_fields_only() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "database_url = \"postgres://file/db\"\nnetbox_host = \"https://file\"\n").unwrap();

        let args = CliArgs::parse_from([
            "holonet-core",
            "--config",
            path.to_str().unwrap(),
            "--netbox-host",
            "https://cli",
        ]);
        let merged = apply_config_file(args).unwrap();
        assert_eq!(merged.database_url.as_deref(), Some("postgres://file/db"));
        assert_eq!(merged.netbox_host.as_deref(), Some("https://cli"));
    }

    #[test]
    fn missing_config_file_is_not_an_error() {
        let args = CliArgs::parse_from(["holonet-core"]);
        let merged = apply_config_file(args).unwrap();
        assert!(merged.database_url.is_none());
    }
}
