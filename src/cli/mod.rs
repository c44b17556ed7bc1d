//! `codebraid-codegen`: write TypeScript bindings for configured MCP servers.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::codegen::{self, TypeScriptGenerator};
use crate::config::{GatewayConfig, LoadOptions};
use crate::error::{GatewayError, Result};
use crate::hub::ClientHub;
use crate::provider::{ProviderConnector, ToolSchema};

/// Generate TypeScript bindings for MCP server tools
#[derive(Parser, Debug, Clone)]
#[command(name = "codebraid-codegen", version)]
pub struct CodegenArgs {
    /// Config file (defaults to $CODEBRAID_CONFIG, then the standard search paths)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory to write the generated files into
    #[arg(long, default_value = "./generated")]
    pub output_dir: PathBuf,

    /// Only generate for these servers (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub server: Vec<String>,

    /// Log at debug level
    #[arg(short, long)]
    pub verbose: bool,
}

/// Install the stderr subscriber. `RUST_LOG` wins over `--verbose`.
pub fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init();
}

/// Split the requested server names into found catalogs and unknown names.
///
/// An empty request selects every server.
pub fn select_servers(
    all: HashMap<String, Vec<ToolSchema>>,
    requested: &[String],
) -> (BTreeMap<String, Vec<ToolSchema>>, Vec<String>) {
    let requested: Vec<&str> = requested
        .iter()
        .map(|name| name.trim())
        .filter(|name| !name.is_empty())
        .collect();
    if requested.is_empty() {
        return (all.into_iter().collect(), Vec::new());
    }

    let mut all = all;
    let mut selected = BTreeMap::new();
    let mut missing = Vec::new();
    for name in requested {
        match all.remove(name) {
            Some(tools) => {
                selected.insert(name.to_owned(), tools);
            }
            None if selected.contains_key(name) => {}
            None => missing.push(name.to_owned()),
        }
    }
    (selected, missing)
}

/// Load config, connect, write bindings, and always close the hub.
pub async fn run_codegen(
    args: &CodegenArgs,
    connector: &dyn ProviderConnector,
) -> Result<Vec<PathBuf>> {
    let mut options = LoadOptions::with_defaults();
    options.config_path = args.config.clone();
    let config = GatewayConfig::load_with_options(&options)?;

    let hub = ClientHub::new();
    let result = generate(&hub, &config, args, connector).await;
    if let Err(error) = hub.close().await {
        warn!(error = %error, "failed to close provider connections");
    }
    result
}

async fn generate(
    hub: &ClientHub,
    config: &GatewayConfig,
    args: &CodegenArgs,
    connector: &dyn ProviderConnector,
) -> Result<Vec<PathBuf>> {
    info!(servers = config.mcp_servers.len(), "connecting to MCP servers");
    hub.connect(connector, &config.mcp_servers, &CancellationToken::new())
        .await?;

    let (selected, missing) = select_servers(hub.list_tools(), &args.server);
    for name in &missing {
        warn!(server = %name, "requested server not found");
    }
    if selected.is_empty() {
        return Err(GatewayError::Configuration(
            "none of the requested servers were found".into(),
        ));
    }
    for (name, tools) in &selected {
        info!(server = %name, tools = tools.len(), "generating bindings");
    }

    let written =
        codegen::write_bindings(&TypeScriptGenerator::new(), &args.output_dir, &selected).await?;
    info!(
        files = written.len(),
        output_dir = %args.output_dir.display(),
        "bindings written"
    );
    Ok(written)
}
