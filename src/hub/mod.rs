//! Per-session multiplexer over provider connections.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ProviderConfig;
use crate::error::{CleanupFailure, GatewayError, Result};
use crate::provider::{
    CatalogListener, ProviderConnection, ProviderConnector, ToolCallResult, ToolInfo, ToolSchema,
};

/// Subscriber told which provider's catalog just changed.
///
/// Runs on its own task, never while the hub lock is held.
pub type CatalogChangedCallback = Arc<dyn Fn(String) -> BoxFuture<'static, ()> + Send + Sync>;

type CallbackSlot = Arc<RwLock<Option<CatalogChangedCallback>>>;

/// Owns one connection per configured provider for a single session.
pub struct ClientHub {
    connections: RwLock<HashMap<String, Arc<dyn ProviderConnection>>>,
    on_catalog_changed: CallbackSlot,
}

impl Default for ClientHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientHub {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            on_catalog_changed: Arc::new(RwLock::new(None)),
        }
    }

    /// Connect every configured provider, stopping at the first failure.
    ///
    /// Any error leaves the hub unusable. Providers connected before the
    /// failure stay registered so the caller's [`ClientHub::close`] releases
    /// them.
    pub async fn connect(
        &self,
        connector: &dyn ProviderConnector,
        providers: &BTreeMap<String, ProviderConfig>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        for (name, config) in providers {
            let connection = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(GatewayError::Cancelled(format!("connect to '{name}' aborted")));
                }
                result = connector.connect(name, config) => {
                    result.map_err(|e| GatewayError::connection_failed(name.as_str(), e))?
                }
            };

            connection.subscribe_catalog_changed(self.listener_for(name));
            write_lock(&self.connections).insert(name.clone(), connection);
            debug!(provider = %name, "provider connected");
        }
        Ok(())
    }

    fn listener_for(&self, provider: &str) -> CatalogListener {
        let slot = Arc::clone(&self.on_catalog_changed);
        let provider = provider.to_owned();
        Arc::new(move || {
            let callback = read_lock(&slot).clone();
            let Some(callback) = callback else {
                debug!(provider = %provider, "catalog changed before a subscriber was registered");
                return;
            };
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(callback(provider.clone()));
                }
                Err(_) => {
                    warn!(provider = %provider, "catalog change dropped: no async runtime");
                }
            }
        })
    }

    /// Register the single catalog-change subscriber, replacing any previous one.
    pub fn set_catalog_changed_callback(&self, callback: CatalogChangedCallback) {
        *write_lock(&self.on_catalog_changed) = Some(callback);
    }

    /// Call a tool on a named provider.
    pub async fn call_tool(
        &self,
        provider: &str,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallResult> {
        let connection = self.connection(provider)?;
        connection.call_tool(tool_name, arguments).await
    }

    /// Find a provider whose current catalog lists `tool_name`.
    ///
    /// When several providers expose the same name, which one wins is unspecified.
    pub fn find_tool_server(&self, tool_name: &str) -> Result<String> {
        read_lock(&self.connections)
            .iter()
            .find(|(_, connection)| connection.tools().iter().any(|t| t.name == tool_name))
            .map(|(name, _)| name.clone())
            .ok_or_else(|| GatewayError::ToolNotFound {
                tool_name: tool_name.to_owned(),
            })
    }

    /// Snapshot of every provider's catalog.
    pub fn list_tools(&self) -> HashMap<String, Vec<ToolSchema>> {
        read_lock(&self.connections)
            .iter()
            .map(|(name, connection)| (name.clone(), connection.tools()))
            .collect()
    }

    /// Snapshot of one provider's catalog.
    pub fn server_tools(&self, provider: &str) -> Option<Vec<ToolSchema>> {
        read_lock(&self.connections)
            .get(provider)
            .map(|connection| connection.tools())
    }

    pub fn tools_with_description(&self) -> HashMap<String, Vec<ToolInfo>> {
        read_lock(&self.connections)
            .iter()
            .map(|(name, connection)| {
                let tools = connection.tools().iter().map(ToolSchema::info).collect();
                (name.clone(), tools)
            })
            .collect()
    }

    /// Connected provider names, sorted.
    pub fn provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = read_lock(&self.connections).keys().cloned().collect();
        names.sort();
        names
    }

    /// Close every connection, continuing past individual failures.
    pub async fn close(&self) -> Result<()> {
        let drained: Vec<_> = write_lock(&self.connections).drain().collect();
        *write_lock(&self.on_catalog_changed) = None;

        let mut failures = Vec::new();
        for (name, connection) in drained {
            if let Err(error) = connection.close().await {
                warn!(provider = %name, error = %error, "failed to close provider connection");
                failures.push(CleanupFailure::new(name, error.to_string()));
            }
        }
        GatewayError::from_cleanup(failures)
    }

    fn connection(&self, provider: &str) -> Result<Arc<dyn ProviderConnection>> {
        read_lock(&self.connections)
            .get(provider)
            .cloned()
            .ok_or_else(|| GatewayError::ServerNotFound {
                provider: provider.to_owned(),
            })
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
