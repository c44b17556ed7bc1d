//! Config file discovery and environment expansion.

use std::path::PathBuf;
use std::sync::OnceLock;

use directories::ProjectDirs;
use regex::{Captures, Regex};
use tracing::debug;

use super::GatewayConfig;
use crate::error::{GatewayError, Result};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "CODEBRAID_CONFIG";

/// Where and how to look for the config file.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit path; wins over everything else.
    pub config_path: Option<PathBuf>,
    /// Candidates tried in order when no explicit path is given.
    pub search_paths: Vec<PathBuf>,
    /// Honour `CODEBRAID_CONFIG`, `.env` and `${VAR}` references.
    pub allow_env_overrides: bool,
}

impl LoadOptions {
    pub fn with_defaults() -> Self {
        Self {
            config_path: None,
            search_paths: default_search_paths(),
            allow_env_overrides: true,
        }
    }
}

/// Working-directory candidates first, then the per-user config directory.
pub fn default_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![
        PathBuf::from("codebraid.json"),
        PathBuf::from("codebraid.toml"),
        PathBuf::from(".mcp.json"),
    ];
    if let Some(dirs) = ProjectDirs::from("", "", "codebraid") {
        paths.push(dirs.config_dir().join("config.json"));
        paths.push(dirs.config_dir().join("config.toml"));
    }
    paths
}

impl GatewayConfig {
    pub fn load_with_options(options: &LoadOptions) -> Result<Self> {
        if options.allow_env_overrides {
            let _ = dotenvy::dotenv(); // load .env if present, ignore error
        }

        let path = resolve_config_path(options, |key| std::env::var(key).ok())?;
        debug!(path = %path.display(), "loading gateway config");

        let mut config = Self::from_path(&path)?;
        if options.allow_env_overrides {
            config.expand_env(&|key: &str| std::env::var(key).ok());
        }
        Ok(config)
    }
}

fn resolve_config_path(
    options: &LoadOptions,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<PathBuf> {
    if let Some(path) = &options.config_path {
        return Ok(path.clone());
    }

    if options.allow_env_overrides {
        if let Some(path) = lookup(CONFIG_ENV_VAR).filter(|p| !p.trim().is_empty()) {
            return Ok(PathBuf::from(path));
        }
    }

    options
        .search_paths
        .iter()
        .find(|candidate| candidate.is_file())
        .cloned()
        .ok_or_else(|| {
            let searched = options
                .search_paths
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            GatewayError::Configuration(format!(
                "no config file found (searched: {searched}); set {CONFIG_ENV_VAR} or pass a path"
            ))
        })
}

fn env_reference() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("env reference pattern is valid")
    })
}

/// Replace `${VAR}` references using `lookup`; unknown variables expand to "".
pub fn expand_env_vars(value: &str, lookup: &impl Fn(&str) -> Option<String>) -> String {
    env_reference()
        .replace_all(value, |caps: &Captures<'_>| {
            lookup(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}
