//! Transport construction for configured providers.

use std::collections::BTreeMap;
use std::path::Path;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use rmcp::transport::{StreamableHttpClientTransport, TokioChildProcess};
use tokio::process::Command;

use crate::error::{GatewayError, Result};

/// Spawn a stdio provider as a child process.
pub(crate) fn stdio(
    provider: &str,
    command: &str,
    args: &[String],
    env: &BTreeMap<String, String>,
    cwd: Option<&Path>,
) -> Result<TokioChildProcess> {
    let mut cmd = Command::new(command);
    cmd.args(args).envs(env);
    if let Some(cwd) = cwd {
        cmd.current_dir(cwd);
    }
    TokioChildProcess::new(cmd).map_err(|e| GatewayError::Provider {
        provider: provider.to_owned(),
        message: format!("failed to spawn '{command}': {e}"),
    })
}

/// Streamable HTTP transport sending `headers` on every request.
pub(crate) fn streamable_http(
    provider: &str,
    url: &str,
    headers: &BTreeMap<String, String>,
) -> Result<StreamableHttpClientTransport<reqwest::Client>> {
    let client = reqwest::Client::builder()
        .default_headers(header_map(provider, headers)?)
        .build()
        .map_err(|e| GatewayError::Provider {
            provider: provider.to_owned(),
            message: format!("failed to build HTTP client: {e}"),
        })?;
    Ok(StreamableHttpClientTransport::with_client(
        client,
        StreamableHttpClientTransportConfig::with_uri(url.to_owned()),
    ))
}

fn header_map(provider: &str, headers: &BTreeMap<String, String>) -> Result<HeaderMap> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (key, value) in headers {
        let name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
            GatewayError::Configuration(format!("provider '{provider}': invalid header '{key}': {e}"))
        })?;
        let value = HeaderValue::from_str(value).map_err(|e| {
            GatewayError::Configuration(format!(
                "provider '{provider}': invalid value for header '{key}': {e}"
            ))
        })?;
        map.insert(name, value);
    }
    Ok(map)
}
