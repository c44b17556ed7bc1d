//! Sessions: one isolated hub and bundle workspace per end user.

pub mod regenerate;
pub mod registry;

pub use regenerate::RegenerationBridge;
pub use registry::SessionRegistry;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::codegen::BindingGenerator;
use crate::error::{CleanupFailure, GatewayError, Result};
use crate::hub::ClientHub;
use crate::provider::ToolCallResult;
use crate::workspace::BundleWorkspace;

/// A fully initialized session.
///
/// Only [`SessionRegistry`] builds these, and only publishes them once the hub
/// is connected and the workspace is written.
pub struct Session {
    id: String,
    created_at: DateTime<Utc>,
    started: Instant,
    last_accessed: Mutex<Instant>,
    hub: ClientHub,
    workspace: BundleWorkspace,
    artifacts: tokio::sync::Mutex<BTreeMap<String, String>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("workspace", &self.workspace.root())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl Session {
    pub(crate) fn new(
        id: impl Into<String>,
        hub: ClientHub,
        workspace: BundleWorkspace,
        artifacts: BTreeMap<String, String>,
        cancel: CancellationToken,
    ) -> Self {
        let now = Instant::now();
        Self {
            id: id.into(),
            created_at: Utc::now(),
            started: now,
            last_accessed: Mutex::new(now),
            hub,
            workspace,
            artifacts: tokio::sync::Mutex::new(artifacts),
            cancel,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Record an access.
    pub fn touch(&self) {
        *self
            .last_accessed
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    pub fn last_accessed(&self) -> Instant {
        *self
            .last_accessed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn age(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn idle_duration(&self) -> Duration {
        self.last_accessed().elapsed()
    }

    pub fn hub(&self) -> &ClientHub {
        &self.hub
    }

    pub fn workspace(&self) -> &BundleWorkspace {
        &self.workspace
    }

    pub fn workspace_path(&self) -> &Path {
        self.workspace.root()
    }

    /// Snapshot of every provider's current artifact.
    pub async fn artifacts(&self) -> BTreeMap<String, String> {
        self.artifacts.lock().await.clone()
    }

    pub async fn artifact(&self, provider: &str) -> Option<String> {
        self.artifacts.lock().await.get(provider).cloned()
    }

    /// Call a tool on a provider, aborting if the session is torn down meanwhile.
    pub async fn call_tool(
        &self,
        provider: &str,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallResult> {
        self.touch();
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(GatewayError::Cancelled(format!(
                "session '{}' closed during call to {provider}.{tool_name}",
                self.id
            ))),
            result = self.hub.call_tool(provider, tool_name, arguments) => result,
        }
    }

    pub fn find_tool_server(&self, tool_name: &str) -> Result<String> {
        self.touch();
        self.hub.find_tool_server(tool_name)
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the session has been torn down.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Re-render one provider's artifact from the hub's current catalog.
    ///
    /// Serialized per session. The file is replaced before the in-memory copy,
    /// so a failure at any step leaves both holding the previous artifact.
    pub async fn regenerate_artifact(
        &self,
        provider: &str,
        generator: &dyn BindingGenerator,
    ) -> Result<()> {
        let mut artifacts = self.artifacts.lock().await;
        if self.cancel.is_cancelled() {
            return Err(GatewayError::Cancelled(format!(
                "session '{}' is closed",
                self.id
            )));
        }

        let tools = self
            .hub
            .server_tools(provider)
            .ok_or_else(|| GatewayError::ServerNotFound {
                provider: provider.to_owned(),
            })?;
        let source = generator.render_provider_artifact(provider, &tools)?;
        self.workspace.write_artifact(provider, &source).await?;
        artifacts.insert(provider.to_owned(), source);
        debug!(session_id = %self.id, provider, tools = tools.len(), "artifact regenerated");
        Ok(())
    }

    /// Cancel, close the hub and remove the workspace, attempting every step.
    pub(crate) async fn shutdown(&self) -> Result<()> {
        self.cancel.cancel();

        let mut failures = Vec::new();
        if let Err(error) = self.hub.close().await {
            match error {
                GatewayError::CleanupFailed { failures: nested } => failures.extend(nested),
                other => failures.push(CleanupFailure::new("hub", other.to_string())),
            }
        }
        // An in-flight regeneration holds this lock; let its write land
        // before the tree goes, so nothing is recreated afterwards.
        let _artifacts = self.artifacts.lock().await;
        if let Err(error) = self.workspace.remove().await {
            failures.push(CleanupFailure::new(
                self.workspace.root().display().to_string(),
                error.to_string(),
            ));
        }
        GatewayError::from_cleanup(failures)
    }
}
