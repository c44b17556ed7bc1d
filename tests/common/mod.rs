//! Shared test helpers: scripted provider connections and a switchable generator.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use codebraid::codegen::{BindingGenerator, TypeScriptGenerator};
use codebraid::config::{GatewayConfig, ProviderConfig, RegistryOptions};
use codebraid::error::{GatewayError, Result};
use codebraid::provider::{
    CatalogListener, ProviderConnection, ProviderConnector, ToolCallResult, ToolSchema,
};
use codebraid::session::SessionRegistry;

/// Tool with a single optional `query` argument.
pub fn tool(name: &str) -> ToolSchema {
    ToolSchema::new(
        name,
        Some(format!("{name} tool")),
        json!({
            "type": "object",
            "properties": { "query": { "type": "string" } }
        }),
    )
}

/// Config naming each provider as a stdio command the mock connector ignores.
pub fn config_for(providers: &[&str]) -> GatewayConfig {
    providers
        .iter()
        .fold(GatewayConfig::default(), |config, name| {
            config.with_provider(*name, ProviderConfig::stdio("mock"))
        })
}

/// What a provider does when connected.
#[derive(Debug, Clone, Default)]
pub struct ProviderScript {
    pub tools: Vec<ToolSchema>,
    pub fail: Option<String>,
    pub delay: Option<Duration>,
    pub call_delay: Option<Duration>,
    pub close_error: Option<String>,
}

impl ProviderScript {
    pub fn with_tools(names: &[&str]) -> Self {
        Self {
            tools: names.iter().map(|name| tool(name)).collect(),
            ..Default::default()
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            fail: Some(message.to_string()),
            ..Default::default()
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Tool calls are recorded, then take `delay` to answer.
    pub fn slow_calls(mut self, delay: Duration) -> Self {
        self.call_delay = Some(delay);
        self
    }

    pub fn close_fails(mut self, message: &str) -> Self {
        self.close_error = Some(message.to_string());
        self
    }
}

/// In-memory provider connection.
pub struct MockConnection {
    name: String,
    tools: Mutex<Vec<ToolSchema>>,
    listener: Mutex<Option<CatalogListener>>,
    close_error: Option<String>,
    close_calls: Arc<AtomicUsize>,
    calls: Mutex<Vec<(String, serde_json::Value)>>,
    call_delay: Option<Duration>,
}

impl MockConnection {
    pub fn new(name: &str, tools: Vec<ToolSchema>, close_error: Option<String>) -> Self {
        Self::scripted(name, tools, close_error, None)
    }

    fn scripted(
        name: &str,
        tools: Vec<ToolSchema>,
        close_error: Option<String>,
        call_delay: Option<Duration>,
    ) -> Self {
        Self {
            name: name.to_string(),
            tools: Mutex::new(tools),
            listener: Mutex::new(None),
            close_error,
            close_calls: Arc::new(AtomicUsize::new(0)),
            calls: Mutex::new(Vec::new()),
            call_delay,
        }
    }

    /// Replace the catalog and fire the listener, like a list_changed refresh.
    pub fn set_tools_and_notify(&self, tools: Vec<ToolSchema>) {
        *self.tools.lock().unwrap() = tools;
        let listener = self.listener.lock().unwrap().clone();
        if let Some(listener) = listener {
            listener();
        }
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<(String, serde_json::Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn has_listener(&self) -> bool {
        self.listener.lock().unwrap().is_some()
    }
}

#[async_trait]
impl ProviderConnection for MockConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn tools(&self) -> Vec<ToolSchema> {
        self.tools.lock().unwrap().clone()
    }

    async fn call_tool(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallResult> {
        self.calls
            .lock()
            .unwrap()
            .push((tool_name.to_string(), arguments.clone()));
        if let Some(delay) = self.call_delay {
            tokio::time::sleep(delay).await;
        }
        if tool_name == "fail" {
            return Err(GatewayError::ToolExecution {
                tool_name: tool_name.to_string(),
                message: "scripted failure".into(),
            });
        }
        Ok(ToolCallResult::text(format!(
            "{}.{tool_name}({arguments})",
            self.name
        )))
    }

    fn subscribe_catalog_changed(&self, listener: CatalogListener) {
        *self.listener.lock().unwrap() = Some(listener);
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        match &self.close_error {
            Some(message) => Err(GatewayError::Provider {
                provider: self.name.clone(),
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// Connector that builds [`MockConnection`]s from per-provider scripts.
#[derive(Default)]
pub struct MockConnector {
    scripts: Mutex<HashMap<String, ProviderScript>>,
    connect_calls: AtomicUsize,
    connections: Mutex<Vec<Arc<MockConnection>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, provider: &str, script: ProviderScript) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(provider.to_string(), script);
        self
    }

    /// Make later connects to `provider` fail (or succeed again with `None`).
    pub fn set_failing(&self, provider: &str, message: Option<&str>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(provider.to_string())
            .or_default()
            .fail = message.map(str::to_string);
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// Every connection opened for `provider`, oldest first.
    pub fn connections_for(&self, provider: &str) -> Vec<Arc<MockConnection>> {
        self.connections
            .lock()
            .unwrap()
            .iter()
            .filter(|connection| connection.name == provider)
            .cloned()
            .collect()
    }

    pub fn latest(&self, provider: &str) -> Arc<MockConnection> {
        self.connections_for(provider)
            .pop()
            .unwrap_or_else(|| panic!("no connection opened for {provider}"))
    }
}

#[async_trait]
impl ProviderConnector for MockConnector {
    async fn connect(
        &self,
        name: &str,
        _config: &ProviderConfig,
    ) -> Result<Arc<dyn ProviderConnection>> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_default();
        if let Some(delay) = script.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = script.fail {
            return Err(GatewayError::Provider {
                provider: name.to_string(),
                message,
            });
        }

        let connection = Arc::new(MockConnection::scripted(
            name,
            script.tools,
            script.close_error,
            script.call_delay,
        ));
        self.connections
            .lock()
            .unwrap()
            .push(Arc::clone(&connection));
        Ok(connection)
    }
}

/// TypeScript generator whose provider renders can be made to fail.
#[derive(Default)]
pub struct SwitchableGenerator {
    inner: TypeScriptGenerator,
    failing: Mutex<HashSet<String>>,
    render_calls: AtomicUsize,
    held: Mutex<Option<RenderGate>>,
}

/// Blocks one render until the test releases it.
struct RenderGate {
    entered: std_mpsc::Sender<()>,
    release: std_mpsc::Receiver<()>,
}

impl SwitchableGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, provider: &str, failing: bool) {
        let mut set = self.failing.lock().unwrap();
        if failing {
            set.insert(provider.to_string());
        } else {
            set.remove(provider);
        }
    }

    pub fn render_calls(&self) -> usize {
        self.render_calls.load(Ordering::SeqCst)
    }

    /// Park the next provider render. The first channel reports that the
    /// render started; sending on the second lets it finish.
    pub fn hold_next_render(&self) -> (std_mpsc::Receiver<()>, std_mpsc::Sender<()>) {
        let (entered_tx, entered_rx) = std_mpsc::channel();
        let (release_tx, release_rx) = std_mpsc::channel();
        *self.held.lock().unwrap() = Some(RenderGate {
            entered: entered_tx,
            release: release_rx,
        });
        (entered_rx, release_tx)
    }
}

impl BindingGenerator for SwitchableGenerator {
    fn render_provider_artifact(&self, provider: &str, tools: &[ToolSchema]) -> Result<String> {
        self.render_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.held.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.entered.send(());
            let _ = gate.release.recv();
        }
        if self.failing.lock().unwrap().contains(provider) {
            return Err(GatewayError::render(provider, "scripted render failure"));
        }
        self.inner.render_provider_artifact(provider, tools)
    }

    fn render_shared_types_artifact(&self) -> String {
        self.inner.render_shared_types_artifact()
    }

    fn render_index_artifact(&self, providers: &[String]) -> String {
        self.inner.render_index_artifact(providers)
    }
}

/// Registry over the mock connector, with workspaces under `root`.
pub fn registry(
    connector: &Arc<MockConnector>,
    generator: &Arc<SwitchableGenerator>,
    root: &Path,
    providers: &[&str],
) -> SessionRegistry {
    SessionRegistry::new(
        config_for(providers),
        Arc::clone(connector) as Arc<dyn ProviderConnector>,
        Arc::clone(generator) as Arc<dyn BindingGenerator>,
        RegistryOptions::builder().workspace_root(root).build(),
    )
}

/// Names of the entries directly under `dir`, sorted. Missing dirs are empty.
pub fn dir_entries(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Poll `check` until it holds, failing the test after five seconds.
pub async fn wait_for<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition should hold within five seconds");
}
