//! Provider connection boundary.
//!
//! A provider is one external tool server. The core never talks to a provider
//! directly: it goes through [`ProviderConnector`] to open a connection and
//! through [`ProviderConnection`] to list, call and watch tools. The rmcp-backed
//! implementation lives in [`crate::mcp`]; tests supply their own.

pub mod types;

pub use types::{ToolCallResult, ToolInfo, ToolSchema};

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ProviderConfig;
use crate::error::GatewayError;

/// Invoked by a connection after its cached catalog has been replaced.
pub type CatalogListener = Arc<dyn Fn() + Send + Sync>;

/// One live connection to one provider.
#[async_trait]
pub trait ProviderConnection: Send + Sync {
    /// Provider name this connection was opened for.
    fn name(&self) -> &str;

    /// Snapshot of the last catalog the provider reported.
    fn tools(&self) -> Vec<ToolSchema>;

    /// Invoke a tool on the provider.
    async fn call_tool(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallResult, GatewayError>;

    /// Register the single listener notified after each catalog refresh.
    ///
    /// A later registration replaces the earlier one.
    fn subscribe_catalog_changed(&self, listener: CatalogListener);

    /// Close the connection. Closing an already-closed connection is a no-op.
    async fn close(&self) -> Result<(), GatewayError>;
}

/// Opens provider connections from configuration.
#[async_trait]
pub trait ProviderConnector: Send + Sync {
    async fn connect(
        &self,
        name: &str,
        config: &ProviderConfig,
    ) -> Result<Arc<dyn ProviderConnection>, GatewayError>;
}
