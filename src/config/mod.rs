//! Provider configuration (file > env var > search paths).

pub mod loader;
pub mod options;

pub use loader::{default_search_paths, expand_env_vars, LoadOptions, CONFIG_ENV_VAR};
pub use options::RegistryOptions;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};

/// Top-level configuration: the set of providers every session connects to.
///
/// Uses the `mcpServers` layout shared by most MCP clients, so an existing
/// client config file can be pointed at directly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(rename = "mcpServers", alias = "mcp_servers", default)]
    pub mcp_servers: BTreeMap<String, ProviderConfig>,
}

/// How to reach one provider.
///
/// Exactly one of `command` (stdio child process) or `url` (streamable HTTP)
/// must be set; [`ProviderConfig::transport`] enforces that.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

/// Validated view of a [`ProviderConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderTransport<'a> {
    Stdio {
        command: &'a str,
        args: &'a [String],
        env: &'a BTreeMap<String, String>,
        cwd: Option<&'a Path>,
    },
    StreamableHttp {
        url: &'a str,
        headers: &'a BTreeMap<String, String>,
    },
}

impl ProviderConfig {
    pub fn stdio(command: impl Into<String>) -> Self {
        Self {
            command: Some(command.into()),
            ..Default::default()
        }
    }

    pub fn http(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn transport(&self) -> Result<ProviderTransport<'_>> {
        match (self.command.as_deref(), self.url.as_deref()) {
            (Some(command), None) if !command.trim().is_empty() => Ok(ProviderTransport::Stdio {
                command,
                args: &self.args,
                env: &self.env,
                cwd: self.cwd.as_deref(),
            }),
            (None, Some(url)) if !url.trim().is_empty() => Ok(ProviderTransport::StreamableHttp {
                url,
                headers: &self.headers,
            }),
            (Some(_), Some(_)) => Err(GatewayError::Configuration(
                "provider must set either `command` or `url`, not both".into(),
            )),
            _ => Err(GatewayError::Configuration(
                "provider must set a non-empty `command` or `url`".into(),
            )),
        }
    }

    fn expand_env(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        for value in self.env.values_mut().chain(self.headers.values_mut()) {
            *value = expand_env_vars(value, lookup);
        }
    }
}

impl GatewayConfig {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a config file, choosing the format by extension (`.toml` or JSON).
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::Configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        let is_toml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        if is_toml {
            Self::from_toml_str(&raw)
        } else {
            Self::from_json_str(&raw)
        }
    }

    /// Insert or replace a provider.
    pub fn with_provider(mut self, name: impl Into<String>, config: ProviderConfig) -> Self {
        self.mcp_servers.insert(name.into(), config);
        self
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.mcp_servers.keys().map(String::as_str).collect()
    }

    /// Check every provider's name and transport.
    pub fn validate(&self) -> Result<()> {
        for (name, provider) in &self.mcp_servers {
            if name.trim().is_empty() {
                return Err(GatewayError::Configuration(
                    "provider name must not be empty".into(),
                ));
            }
            provider.transport().map_err(|e| {
                GatewayError::Configuration(format!("provider '{name}': {e}"))
            })?;
        }
        Ok(())
    }

    pub(crate) fn expand_env(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        for provider in self.mcp_servers.values_mut() {
            provider.expand_env(lookup);
        }
    }
}
