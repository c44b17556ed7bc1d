//! rmcp-backed provider connection.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use rmcp::model::{CallToolRequestParams, CallToolResult, Content, JsonObject, ResourceContents};
use rmcp::service::{
    ClientInitializeError, NotificationContext, Peer, RoleClient, RunningService, ServiceError,
};
use rmcp::ClientHandler;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{GatewayError, Result};
use crate::provider::{CatalogListener, ProviderConnection, ToolCallResult, ToolSchema};

/// Catalog cache plus the single change listener, shared with the handler.
pub(crate) struct CatalogState {
    provider: String,
    tools: RwLock<Vec<ToolSchema>>,
    listener: RwLock<Option<CatalogListener>>,
    // Held across list + replace so a slow listing cannot overwrite a newer one.
    refresh: Mutex<()>,
}

impl CatalogState {
    pub(crate) fn new(provider: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            provider: provider.into(),
            tools: RwLock::new(Vec::new()),
            listener: RwLock::new(None),
            refresh: Mutex::new(()),
        })
    }

    /// Re-list the provider's tools and replace the cache.
    ///
    /// Refreshes run one at a time, so the last one to finish is also the
    /// last one whose tools/list reached the provider.
    async fn refresh(&self, peer: &Peer<RoleClient>) -> Result<usize> {
        let _serialized = self.refresh.lock().await;
        let tools = list_tools(&self.provider, peer).await?;
        let count = tools.len();
        self.replace(tools);
        Ok(count)
    }

    fn replace(&self, tools: Vec<ToolSchema>) {
        *self.tools.write().unwrap_or_else(PoisonError::into_inner) = tools;
    }

    fn snapshot(&self) -> Vec<ToolSchema> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn notify(&self) {
        let listener = self
            .listener
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(listener) = listener {
            listener();
        }
    }
}

/// Client-side handler: re-lists tools when the provider says they changed.
#[derive(Clone)]
pub(crate) struct CatalogWatcher {
    state: Arc<CatalogState>,
}

impl CatalogWatcher {
    pub(crate) fn new(state: Arc<CatalogState>) -> Self {
        Self { state }
    }
}

impl ClientHandler for CatalogWatcher {
    fn on_tool_list_changed(
        &self,
        context: NotificationContext<RoleClient>,
    ) -> impl Future<Output = ()> + Send + '_ {
        let state = Arc::clone(&self.state);
        let peer = context.peer;
        // Refresh off the service loop so the tools/list response can be read.
        tokio::spawn(async move {
            match state.refresh(&peer).await {
                Ok(tools) => {
                    debug!(provider = %state.provider, tools, "catalog refreshed");
                    state.notify();
                }
                Err(error) => {
                    warn!(provider = %state.provider, error = %error, "catalog refresh failed");
                }
            }
        });
        std::future::ready(())
    }
}

type CatalogService = RunningService<RoleClient, CatalogWatcher>;

/// A live MCP session with one provider.
pub struct McpConnection {
    name: String,
    peer: Peer<RoleClient>,
    state: Arc<CatalogState>,
    service: Mutex<Option<CatalogService>>,
    closed: AtomicBool,
}

impl McpConnection {
    /// Wrap an initialized service and load the provider's first catalog.
    pub(crate) async fn start(state: Arc<CatalogState>, service: CatalogService) -> Result<Self> {
        let peer = service.peer().clone();
        let name = state.provider.clone();
        if let Err(error) = state.refresh(&peer).await {
            let _ = service.cancel().await;
            return Err(error);
        }
        Ok(Self {
            name,
            peer,
            state,
            service: Mutex::new(Some(service)),
            closed: AtomicBool::new(false),
        })
    }

    pub(crate) fn from_initialize_result(
        provider: &str,
        result: std::result::Result<CatalogService, ClientInitializeError>,
    ) -> Result<CatalogService> {
        result.map_err(|e| map_client_initialize_error(provider, e))
    }
}

#[async_trait]
impl ProviderConnection for McpConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn tools(&self) -> Vec<ToolSchema> {
        self.state.snapshot()
    }

    async fn call_tool(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallResult> {
        if self.closed.load(Ordering::Acquire) {
            return Err(GatewayError::Provider {
                provider: self.name.clone(),
                message: "connection is closed".into(),
            });
        }
        let arguments = coerce_tool_arguments(arguments)?;
        let result = self
            .peer
            .call_tool(CallToolRequestParams {
                meta: None,
                name: tool_name.to_owned().into(),
                arguments,
                task: None,
            })
            .await
            .map_err(|e| map_service_error(&self.name, "call_tool", e))?;
        map_call_result(tool_name, result)
    }

    fn subscribe_catalog_changed(&self, listener: CatalogListener) {
        *self
            .state
            .listener
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        let Some(service) = self.service.lock().await.take() else {
            return Ok(());
        };
        service
            .cancel()
            .await
            .map(|reason| debug!(provider = %self.name, ?reason, "connection closed"))
            .map_err(|e| GatewayError::Provider {
                provider: self.name.clone(),
                message: format!("failed to stop MCP service: {e}"),
            })
    }
}

async fn list_tools(provider: &str, peer: &Peer<RoleClient>) -> Result<Vec<ToolSchema>> {
    let tools = match peer.list_all_tools().await {
        Ok(tools) => tools,
        Err(ServiceError::UnexpectedResponse) => {
            let page = peer
                .list_tools(None)
                .await
                .map_err(|e| map_service_error(provider, "list_tools", e))?;
            page.tools
        }
        Err(e) => return Err(map_service_error(provider, "list_tools", e)),
    };
    Ok(tools.into_iter().map(map_tool_schema).collect())
}

fn map_tool_schema(tool: rmcp::model::Tool) -> ToolSchema {
    ToolSchema {
        name: tool.name.to_string(),
        description: tool.description.map(|d| d.to_string()),
        input_schema: serde_json::Value::Object((*tool.input_schema).clone()),
    }
}

fn coerce_tool_arguments(value: serde_json::Value) -> Result<Option<JsonObject>> {
    match value {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Object(map) => Ok(Some(map)),
        serde_json::Value::String(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            let parsed: serde_json::Value = serde_json::from_str(trimmed).map_err(|e| {
                GatewayError::InvalidArgument(format!("tool arguments must be valid JSON: {e}"))
            })?;
            coerce_tool_arguments(parsed)
        }
        other => Err(GatewayError::InvalidArgument(format!(
            "tool arguments must be a JSON object; got {other}"
        ))),
    }
}

fn extract_text_content(content: &[Content]) -> Option<String> {
    let mut lines = Vec::new();
    for item in content {
        if let Some(text) = item.as_text() {
            lines.push(text.text.clone());
            continue;
        }
        if let Some(resource) = item.as_resource() {
            if let ResourceContents::TextResourceContents { text, .. } = &resource.resource {
                lines.push(text.clone());
            }
        }
    }

    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

fn map_call_result(tool_name: &str, result: CallToolResult) -> Result<ToolCallResult> {
    let text_content = extract_text_content(&result.content);
    let content = result
        .content
        .iter()
        .filter_map(|item| serde_json::to_value(item).ok())
        .collect::<Vec<_>>();

    if result.is_error.unwrap_or(false) {
        let message = result
            .structured_content
            .as_ref()
            .map(|v| v.to_string())
            .or_else(|| text_content.clone())
            .unwrap_or_else(|| "tool returned an error result".into());
        return Err(GatewayError::ToolExecution {
            tool_name: tool_name.to_owned(),
            message,
        });
    }

    Ok(ToolCallResult {
        structured_content: result.structured_content,
        text_content,
        content,
        is_error: false,
    })
}

fn map_client_initialize_error(provider: &str, error: ClientInitializeError) -> GatewayError {
    let message = match error {
        ClientInitializeError::ConnectionClosed(context) => {
            format!("initialize connection closed: {context}")
        }
        ClientInitializeError::TransportError { error, context } => {
            format!("initialize transport error ({context}): {error}")
        }
        ClientInitializeError::JsonRpcError(error) => format!(
            "initialize JSON-RPC error {}: {}",
            error.code.0, error.message
        ),
        ClientInitializeError::Cancelled => {
            return GatewayError::Cancelled(format!("initialize of '{provider}' cancelled"))
        }
        other => format!("initialize error: {other}"),
    };
    GatewayError::Provider {
        provider: provider.to_owned(),
        message,
    }
}

fn map_service_error(provider: &str, context: &str, error: ServiceError) -> GatewayError {
    let message = match error {
        ServiceError::McpError(error) => {
            format!("{context}: MCP error {}: {}", error.code.0, error.message)
        }
        ServiceError::TransportSend(error) => format!("{context}: transport send failed: {error}"),
        ServiceError::TransportClosed => format!("{context}: transport closed"),
        ServiceError::UnexpectedResponse => format!("{context}: unexpected MCP response"),
        ServiceError::Cancelled { reason } => {
            let suffix = reason
                .as_deref()
                .map(|r| format!(" ({r})"))
                .unwrap_or_default();
            return GatewayError::Cancelled(format!("{provider} {context}{suffix}"));
        }
        ServiceError::Timeout { timeout } => {
            return GatewayError::Timeout(timeout.as_millis() as u64)
        }
        other => format!("{context}: MCP service error: {other}"),
    };
    GatewayError::Provider {
        provider: provider.to_owned(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmcp::model::ServerJsonRpcMessage;
    use rmcp::service::{serve_directly, RxJsonRpcMessage, TxJsonRpcMessage};
    use rmcp::transport::Transport as RmcpTransport;
    use serde_json::json;
    use std::io;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

    struct ChannelRmcpTransport {
        outbound: UnboundedSender<TxJsonRpcMessage<RoleClient>>,
        inbound: UnboundedReceiver<RxJsonRpcMessage<RoleClient>>,
    }

    impl RmcpTransport<RoleClient> for ChannelRmcpTransport {
        type Error = io::Error;

        fn send(
            &mut self,
            item: TxJsonRpcMessage<RoleClient>,
        ) -> impl std::future::Future<Output = std::result::Result<(), Self::Error>> + Send + 'static
        {
            let tx = self.outbound.clone();
            async move {
                tx.send(item).map_err(|_| {
                    io::Error::new(io::ErrorKind::BrokenPipe, "mock rmcp channel closed")
                })
            }
        }

        async fn receive(&mut self) -> Option<RxJsonRpcMessage<RoleClient>> {
            self.inbound.recv().await
        }

        fn close(
            &mut self,
        ) -> impl std::future::Future<Output = std::result::Result<(), Self::Error>> + Send {
            self.inbound.close();
            std::future::ready(Ok(()))
        }
    }

    fn server_message(value: serde_json::Value) -> ServerJsonRpcMessage {
        serde_json::from_value(value).expect("mock server message should deserialize")
    }

    /// Scripted provider: each tools/list answers with `tool_v<n>`. The
    /// answer for `slow_version` is held back before it is sent.
    fn scripted_service(
        state: Arc<CatalogState>,
        slow_version: Option<u32>,
    ) -> (CatalogService, UnboundedSender<RxJsonRpcMessage<RoleClient>>) {
        let (outbound_tx, mut outbound_rx) = unbounded_channel::<TxJsonRpcMessage<RoleClient>>();
        let (inbound_tx, inbound_rx) = unbounded_channel::<RxJsonRpcMessage<RoleClient>>();
        let transport = ChannelRmcpTransport {
            outbound: outbound_tx,
            inbound: inbound_rx,
        };

        let responder = inbound_tx.clone();
        tokio::spawn(async move {
            let mut version: u32 = 0;
            while let Some(message) = outbound_rx.recv().await {
                let Ok(value) = serde_json::to_value(message) else {
                    continue;
                };
                let id = value.get("id").cloned().unwrap_or(serde_json::Value::Null);
                match value.get("method").and_then(|m| m.as_str()) {
                    Some("tools/list") => {
                        version += 1;
                        let reply = server_message(json!({
                            "jsonrpc": "2.0",
                            "id": id,
                            "result": {
                                "tools": [{
                                    "name": format!("tool_v{version}"),
                                    "description": "mock tool",
                                    "inputSchema": { "type": "object", "properties": {} }
                                }]
                            }
                        }));
                        let responder = responder.clone();
                        let slow = slow_version == Some(version);
                        tokio::spawn(async move {
                            if slow {
                                tokio::time::sleep(Duration::from_millis(200)).await;
                            }
                            let _ = responder.send(reply);
                        });
                    }
                    Some("tools/call") => {
                        let _ = responder.send(server_message(json!({
                            "jsonrpc": "2.0",
                            "id": id,
                            "result": {
                                "content": [{ "type": "text", "text": "tool ok" }],
                                "structuredContent": { "ok": true },
                                "isError": false
                            }
                        })));
                    }
                    _ => {}
                }
            }
        });

        let service = serve_directly(CatalogWatcher::new(state), transport, None);
        (service, inbound_tx)
    }

    #[tokio::test]
    async fn list_changed_notification_refreshes_cache_and_notifies() {
        let state = CatalogState::new("scripted");
        let (service, inbound) = scripted_service(Arc::clone(&state), None);
        let connection = McpConnection::start(state, service).await.unwrap();
        assert_eq!(connection.tools()[0].name, "tool_v1");

        let notified = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = unbounded_channel::<()>();
        let counter = Arc::clone(&notified);
        connection.subscribe_catalog_changed(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(());
        }));

        inbound
            .send(server_message(json!({
                "jsonrpc": "2.0",
                "method": "notifications/tools/list_changed"
            })))
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("listener should fire")
            .expect("listener channel open");
        assert_eq!(notified.load(Ordering::SeqCst), 1);
        assert_eq!(connection.tools()[0].name, "tool_v2");

        connection.close().await.unwrap();
    }

    #[tokio::test]
    async fn overlapping_refreshes_keep_the_newest_listing() {
        let state = CatalogState::new("scripted");
        let (service, inbound) = scripted_service(Arc::clone(&state), Some(2));
        let connection = McpConnection::start(state, service).await.unwrap();
        assert_eq!(connection.tools()[0].name, "tool_v1");

        let (tx, mut rx) = unbounded_channel::<()>();
        connection.subscribe_catalog_changed(Arc::new(move || {
            let _ = tx.send(());
        }));

        for _ in 0..2 {
            inbound
                .send(server_message(json!({
                    "jsonrpc": "2.0",
                    "method": "notifications/tools/list_changed"
                })))
                .unwrap();
        }

        for _ in 0..2 {
            tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("listener should fire once per refresh")
                .expect("listener channel open");
        }
        // tool_v2 is answered late and must not overwrite the newer listing.
        assert_eq!(connection.tools()[0].name, "tool_v3");

        connection.close().await.unwrap();
    }

    #[tokio::test]
    async fn call_tool_maps_result_and_close_is_idempotent() {
        let state = CatalogState::new("scripted");
        let (service, _inbound) = scripted_service(Arc::clone(&state), None);
        let connection = McpConnection::start(state, service).await.unwrap();

        let result = connection
            .call_tool("tool_v1", json!({"q": "x"}))
            .await
            .unwrap();
        assert_eq!(result.structured_content, Some(json!({"ok": true})));
        assert_eq!(result.text_content.as_deref(), Some("tool ok"));

        connection.close().await.unwrap();
        connection.close().await.unwrap();
        let err = connection
            .call_tool("tool_v1", json!({}))
            .await
            .expect_err("closed connection should refuse calls");
        assert!(matches!(err, GatewayError::Provider { .. }));
    }

    #[test]
    fn coerce_tool_arguments_accepts_object_and_stringified_object() {
        let from_obj = coerce_tool_arguments(json!({"city":"nyc"}))
            .expect("object arguments should parse")
            .expect("object should be present");
        assert_eq!(from_obj.get("city"), Some(&json!("nyc")));

        let from_str = coerce_tool_arguments(json!(r#"{"city":"la"}"#))
            .expect("stringified object should parse")
            .expect("object should be present");
        assert_eq!(from_str.get("city"), Some(&json!("la")));
        assert!(coerce_tool_arguments(json!(null)).unwrap().is_none());
    }

    #[test]
    fn coerce_tool_arguments_rejects_non_object() {
        let err = coerce_tool_arguments(json!(["bad"])).expect_err("arrays are rejected");
        assert!(matches!(err, GatewayError::InvalidArgument(_)));
    }

    #[test]
    fn map_service_error_keeps_provider_and_timeout() {
        let err = map_service_error("git", "list_tools", ServiceError::UnexpectedResponse);
        assert!(matches!(
            err,
            GatewayError::Provider { provider, message }
                if provider == "git" && message.contains("unexpected MCP response")
        ));

        let err = map_service_error(
            "git",
            "call_tool",
            ServiceError::Timeout {
                timeout: Duration::from_millis(2750),
            },
        );
        assert!(matches!(err, GatewayError::Timeout(2750)));
    }

    #[test]
    fn initialize_jsonrpc_error_maps_to_provider_error() {
        let init_error = ClientInitializeError::JsonRpcError(
            rmcp::model::ErrorData::invalid_request("bad initialize payload", None),
        );
        let err = map_client_initialize_error("remote", init_error);
        assert!(matches!(
            err,
            GatewayError::Provider { provider, message }
                if provider == "remote" && message.contains("bad initialize payload")
        ));
    }

    #[test]
    fn error_payload_maps_to_tool_execution() {
        let result: CallToolResult = serde_json::from_value(json!({
            "content": [{ "type": "text", "text": "tool failed at runtime" }],
            "structuredContent": { "code": "TOOL_FAILURE" },
            "isError": true
        }))
        .expect("fixture call result should deserialize");

        let err = map_call_result("search_docs", result).expect_err("error result");
        assert!(matches!(
            err,
            GatewayError::ToolExecution { tool_name, message }
                if tool_name == "search_docs" && message.contains("TOOL_FAILURE")
        ));
    }
}
