//! Model Context Protocol providers over rmcp.

pub mod client;
mod transport;

pub use client::McpConnection;

use std::sync::Arc;

use async_trait::async_trait;
use rmcp::service::ServiceExt;
use tracing::debug;

use crate::config::{ProviderConfig, ProviderTransport};
use crate::error::Result;
use crate::provider::{ProviderConnection, ProviderConnector};
use client::{CatalogState, CatalogWatcher};

/// Opens stdio or streamable-HTTP MCP connections from configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct McpConnector;

impl McpConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProviderConnector for McpConnector {
    async fn connect(
        &self,
        name: &str,
        config: &ProviderConfig,
    ) -> Result<Arc<dyn ProviderConnection>> {
        let state = CatalogState::new(name);
        let watcher = CatalogWatcher::new(Arc::clone(&state));

        let service = match config.transport()? {
            ProviderTransport::Stdio {
                command,
                args,
                env,
                cwd,
            } => {
                debug!(provider = name, command, "starting stdio provider");
                let transport = transport::stdio(name, command, args, env, cwd)?;
                McpConnection::from_initialize_result(name, watcher.serve(transport).await)?
            }
            ProviderTransport::StreamableHttp { url, headers } => {
                debug!(provider = name, url, "connecting streamable HTTP provider");
                let transport = transport::streamable_http(name, url, headers)?;
                McpConnection::from_initialize_result(name, watcher.serve(transport).await)?
            }
        };

        let connection = McpConnection::start(state, service).await?;
        debug!(provider = name, tools = connection.tools().len(), "provider ready");
        Ok(Arc::new(connection))
    }
}
