//! MCP (Model Context Protocol) client support.
//!
//! The documentation-search backend is reached over MCP streamable HTTP:
//! JSON-RPC requests are POSTed to a single endpoint, which answers either
//! with a plain JSON body or with SSE frames carrying the response.
//!
//! [`McpToolset`] is the binding agents actually hold: a named endpoint plus
//! an allow-list of remote operations. It must be connected before the first
//! run and closed exactly once at shutdown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{DocsflowError, Result};
use crate::tool::{Tool, ToolRegistry};

// ─────────────────────────────────────────────────────────────────────────────
// MCP Protocol Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: 0,
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: u64,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// Tool definition advertised by a server.
#[derive(Debug, Clone, Deserialize)]
pub struct McpToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<McpToolDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ContentItem {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "resource")]
    Resource { resource: Value },
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallToolResult {
    pub content: Vec<ContentItem>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServerCapabilities {
    #[serde(default)]
    pub tools: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Transport
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait McpTransport: Send + Sync {
    async fn send(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse>;
    async fn close(&self) -> Result<()>;
}

/// Streamable HTTP transport: every request is a POST; the server replies
/// with `application/json` or a short `text/event-stream` carrying the
/// JSON-RPC response. A session id issued at initialize time is echoed on
/// subsequent requests.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    request_id: AtomicU64,
    session: RwLock<Option<String>>,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            request_id: AtomicU64::new(1),
            session: RwLock::new(None),
        }
    }

    fn extract_sse_payload(body: &str) -> Option<&str> {
        body.lines()
            .map(str::trim)
            .filter_map(|line| line.strip_prefix("data:"))
            .map(str::trim)
            .find(|data| !data.is_empty() && *data != "[DONE]")
    }
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn send(&self, mut request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        request.id = id;

        let mut builder = self
            .client
            .post(&self.url)
            .header(reqwest::header::ACCEPT, "application/json, text/event-stream")
            .json(&request);
        if let Some(session) = self.session.read().unwrap().clone() {
            builder = builder.header("Mcp-Session-Id", session);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| DocsflowError::Mcp(format!("HTTP request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DocsflowError::Mcp(format!(
                "server replied with {status}: {body}"
            )));
        }

        if let Some(session) = response
            .headers()
            .get("Mcp-Session-Id")
            .and_then(|v| v.to_str().ok())
        {
            *self.session.write().unwrap() = Some(session.to_string());
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response
            .text()
            .await
            .map_err(|e| DocsflowError::Mcp(format!("failed to read response body: {e}")))?;

        let payload = if content_type.starts_with("text/event-stream") {
            Self::extract_sse_payload(&body).ok_or_else(|| {
                DocsflowError::Mcp("event stream carried no JSON-RPC response".into())
            })?
        } else {
            body.as_str()
        };

        serde_json::from_str(payload)
            .map_err(|e| DocsflowError::Mcp(format!("failed to parse response `{payload}`: {e}")))
    }

    async fn close(&self) -> Result<()> {
        self.session.write().unwrap().take();
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MCP Client
// ─────────────────────────────────────────────────────────────────────────────

pub struct McpClient<T: McpTransport> {
    transport: T,
    initialized: bool,
    server_info: Option<ServerInfo>,
}

impl<T: McpTransport> McpClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            initialized: false,
            server_info: None,
        }
    }

    pub async fn initialize(&mut self) -> Result<&ServerInfo> {
        if self.initialized {
            return self
                .server_info
                .as_ref()
                .ok_or_else(|| DocsflowError::Mcp("server info not available".into()));
        }

        let request = JsonRpcRequest::new(
            "initialize",
            Some(serde_json::json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": {
                    "name": "docsflow",
                    "version": env!("CARGO_PKG_VERSION")
                }
            })),
        );

        let response = self.transport.send(request).await?;
        if let Some(error) = response.error {
            return Err(DocsflowError::Mcp(format!(
                "initialize failed: {}",
                error.message
            )));
        }

        let result: InitializeResult = serde_json::from_value(response.result.unwrap_or_default())
            .map_err(|e| DocsflowError::Mcp(format!("failed to parse initialize result: {e}")))?;
        debug!(server = %result.server_info.name, protocol = %result.protocol_version, "mcp session established");

        self.server_info = Some(result.server_info);
        self.initialized = true;

        let notification = JsonRpcRequest::new("notifications/initialized", None);
        let _ = self.transport.send(notification).await;

        self.server_info
            .as_ref()
            .ok_or_else(|| DocsflowError::Mcp("server info not available".into()))
    }

    pub async fn list_tools(&mut self) -> Result<Vec<McpToolDefinition>> {
        if !self.initialized {
            self.initialize().await?;
        }

        let response = self
            .transport
            .send(JsonRpcRequest::new("tools/list", None))
            .await?;
        if let Some(error) = response.error {
            return Err(DocsflowError::Mcp(format!(
                "tools/list failed: {}",
                error.message
            )));
        }

        let result: ListToolsResult = serde_json::from_value(response.result.unwrap_or_default())
            .map_err(|e| DocsflowError::Mcp(format!("failed to parse tools/list result: {e}")))?;
        Ok(result.tools)
    }

    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<CallToolResult> {
        if !self.initialized {
            self.initialize().await?;
        }

        let response = self
            .transport
            .send(JsonRpcRequest::new(
                "tools/call",
                Some(serde_json::json!({
                    "name": name,
                    "arguments": arguments
                })),
            ))
            .await?;
        if let Some(error) = response.error {
            return Err(DocsflowError::Mcp(format!(
                "tools/call failed: {}",
                error.message
            )));
        }

        serde_json::from_value(response.result.unwrap_or_default())
            .map_err(|e| DocsflowError::Mcp(format!("failed to parse tools/call result: {e}")))
    }

    pub async fn close(&self) -> Result<()> {
        self.transport.close().await
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Toolset (the binding agents hold)
// ─────────────────────────────────────────────────────────────────────────────

/// A restricted proxy to one remote MCP server: only operations on the
/// allow-list may be invoked through it. The underlying connection is
/// shared for the process lifetime; `connect` before the first run,
/// `close` exactly once at shutdown.
pub struct McpToolset<T: McpTransport + 'static> {
    inner: Arc<ToolsetInner<T>>,
}

struct ToolsetInner<T: McpTransport + 'static> {
    name: String,
    allowed_tools: Vec<String>,
    client: Mutex<McpClient<T>>,
    schemas: RwLock<HashMap<String, Value>>,
    connected: AtomicBool,
}

impl McpToolset<HttpTransport> {
    pub fn streamable_http(
        name: impl Into<String>,
        url: impl Into<String>,
        allowed_tools: Vec<String>,
    ) -> Self {
        Self::new(name, McpClient::new(HttpTransport::new(url)), allowed_tools)
    }
}

impl<T: McpTransport + 'static> McpToolset<T> {
    pub fn new(name: impl Into<String>, client: McpClient<T>, allowed_tools: Vec<String>) -> Self {
        Self {
            inner: Arc::new(ToolsetInner {
                name: name.into(),
                allowed_tools,
                client: Mutex::new(client),
                schemas: RwLock::new(HashMap::new()),
                connected: AtomicBool::new(false),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn allowed_tools(&self) -> &[String] {
        &self.inner.allowed_tools
    }

    /// Open the connection and learn the advertised tool schemas. Allowed
    /// operations the server does not advertise are logged, not fatal: the
    /// server remains the authority on what exists.
    pub async fn connect(&self) -> Result<()> {
        let inner = &self.inner;
        let mut client = inner.client.lock().await;
        client.initialize().await?;
        let advertised = client.list_tools().await?;
        drop(client);

        let mut schemas = inner.schemas.write().unwrap();
        schemas.clear();
        for def in advertised {
            if inner.allowed_tools.iter().any(|t| t == &def.name) {
                schemas.insert(def.name, def.input_schema);
            }
        }
        for allowed in &inner.allowed_tools {
            if !schemas.contains_key(allowed) {
                warn!(toolset = %inner.name, tool = %allowed, "allowed tool not advertised by server");
            }
        }
        drop(schemas);

        inner.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub async fn close(&self) -> Result<()> {
        self.inner.connected.store(false, Ordering::SeqCst);
        self.inner.client.lock().await.close().await
    }

    /// Invoke one remote operation, refusing anything off the allow-list.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        self.inner.call(name, arguments).await
    }

    /// Register one proxy tool per allow-listed operation. Descriptions and
    /// schemas reflect what the server advertised at connect time.
    pub fn register_tools(&self, registry: &mut ToolRegistry) {
        for tool_name in &self.inner.allowed_tools {
            registry.register(McpToolProxy {
                tool_name: tool_name.clone(),
                description: format!("Remote operation `{}` on {}", tool_name, self.inner.name),
                inner: Arc::clone(&self.inner),
            });
        }
    }
}

impl<T: McpTransport + 'static> ToolsetInner<T> {
    async fn call(&self, name: &str, arguments: Value) -> Result<Value> {
        if !self.allowed_tools.iter().any(|t| t == name) {
            return Err(DocsflowError::ToolNotPermitted {
                agent: self.name.clone(),
                tool: name.to_string(),
            });
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(DocsflowError::Mcp(format!(
                "toolset `{}` used before connect",
                self.name
            )));
        }

        let mut client = self.client.lock().await;
        let result = client.call_tool(name, arguments).await?;
        drop(client);

        let text = result
            .content
            .iter()
            .map(|item| match item {
                ContentItem::Text { text } => text.clone(),
                ContentItem::Resource { resource } => format!("[resource: {resource}]"),
            })
            .collect::<Vec<_>>()
            .join("\n");

        if result.is_error {
            return Err(DocsflowError::Mcp(text));
        }
        Ok(Value::String(text))
    }
}

/// `Tool` implementation backed by one allow-listed remote operation.
struct McpToolProxy<T: McpTransport + 'static> {
    tool_name: String,
    description: String,
    inner: Arc<ToolsetInner<T>>,
}

#[async_trait]
impl<T: McpTransport + 'static> Tool for McpToolProxy<T> {
    fn name(&self) -> &str {
        &self.tool_name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Option<Value> {
        self.inner
            .schemas
            .read()
            .unwrap()
            .get(&self.tool_name)
            .cloned()
    }

    async fn call(&self, input: Value) -> Result<Value> {
        self.inner.call(&self.tool_name, input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct ScriptedTransport {
        responses: std::sync::Mutex<VecDeque<Value>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<Value>) -> Self {
            Self {
                responses: std::sync::Mutex::new(responses.into()),
            }
        }
    }

    #[async_trait]
    impl McpTransport for ScriptedTransport {
        async fn send(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
            let result = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Value::Null);
            Ok(JsonRpcResponse {
                jsonrpc: "2.0".into(),
                id: request.id,
                result: Some(result),
                error: None,
            })
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    fn initialize_result() -> Value {
        serde_json::json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "stub-docs", "version": "1.0"}
        })
    }

    fn list_tools_result() -> Value {
        serde_json::json!({
            "tools": [
                {
                    "name": "microsoft_docs_search",
                    "description": "Search official documentation",
                    "inputSchema": {"type": "object", "properties": {"question": {"type": "string"}}}
                },
                {
                    "name": "microsoft_docs_fetch",
                    "description": "Fetch a documentation page",
                    "inputSchema": {"type": "object"}
                }
            ]
        })
    }

    fn toolset(responses: Vec<Value>) -> McpToolset<ScriptedTransport> {
        McpToolset::new(
            "Microsoft Learn MCP",
            McpClient::new(ScriptedTransport::new(responses)),
            vec!["microsoft_docs_search".into()],
        )
    }

    #[tokio::test]
    async fn connect_filters_to_allowed_tools() {
        let set = toolset(vec![
            initialize_result(),
            Value::Null, // notifications/initialized
            list_tools_result(),
        ]);
        set.connect().await.unwrap();

        let mut registry = ToolRegistry::new();
        set.register_tools(&mut registry);
        assert_eq!(registry.names(), vec!["microsoft_docs_search"]);
        let descriptions = registry.describe();
        assert!(descriptions[0].parameters.is_some());
    }

    #[tokio::test]
    async fn refuses_operation_off_the_allow_list() {
        let set = toolset(vec![
            initialize_result(),
            Value::Null,
            list_tools_result(),
        ]);
        set.connect().await.unwrap();

        let err = set
            .call_tool("microsoft_docs_fetch", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, DocsflowError::ToolNotPermitted { .. }));
    }

    #[tokio::test]
    async fn refuses_use_before_connect() {
        let set = toolset(vec![]);
        let err = set
            .call_tool("microsoft_docs_search", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, DocsflowError::Mcp(_)));
    }

    #[tokio::test]
    async fn server_reported_failure_becomes_an_error() {
        let set = toolset(vec![
            initialize_result(),
            Value::Null,
            list_tools_result(),
            serde_json::json!({
                "content": [{"type": "text", "text": "search backend unavailable"}],
                "isError": true
            }),
        ]);
        set.connect().await.unwrap();

        let err = set
            .call_tool("microsoft_docs_search", serde_json::json!({"question": "blob storage"}))
            .await
            .unwrap_err();
        match err {
            DocsflowError::Mcp(detail) => assert!(detail.contains("unavailable")),
            other => panic!("expected Mcp error, got {other:?}"),
        }
    }

    #[test]
    fn extracts_json_rpc_payload_from_sse_frames() {
        let body = "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n\n";
        let payload = HttpTransport::extract_sse_payload(body).unwrap();
        assert!(payload.starts_with("{\"jsonrpc\""));
    }
}
