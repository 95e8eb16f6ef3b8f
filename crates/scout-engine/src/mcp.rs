//! Bridges tools exposed by MCP servers into the [`Tool`] contract.
//!
//! Transports live outside this crate: anything implementing [`McpClient`]
//! can be cataloged. Each remote tool is registered as
//! `mcp__<server>__<tool>`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, info};

use scout_core::tools::{Tool, ToolContext, ToolError, ToolEvent, ToolEventStream};

use crate::registry::{ToolRegistry, ToolSource};

pub const MCP_TOOL_CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("MCP transport error: {0}")]
    Transport(String),
    #[error("MCP protocol error: {0}")]
    Protocol(String),
}

/// A tool as listed by `tools/list`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_schema")]
    pub input_schema: Value,
}

fn default_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum McpContent {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        resource: Value,
    },
}

/// Result of `tools/call`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpCallResult {
    #[serde(default)]
    pub content: Vec<McpContent>,
    #[serde(default)]
    pub is_error: bool,
}

impl McpCallResult {
    /// Text parts joined by newlines. Non-text parts become short markers.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(|c| match c {
                McpContent::Text { text } => text.clone(),
                McpContent::Image { mime_type, .. } => format!("[image: {mime_type}]"),
                McpContent::Resource { resource } => resource
                    .get("text")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| resource.to_string()),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// One connected MCP server.
#[async_trait]
pub trait McpClient: Send + Sync {
    fn server_name(&self) -> &str;
    async fn list_tools(&self) -> Result<Vec<McpToolInfo>, McpError>;
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<McpCallResult, McpError>;
}

/// `mcp__<server>__<tool>`, with characters outside `[A-Za-z0-9_-]`
/// replaced by `_`.
pub fn qualified_tool_name(server: &str, tool: &str) -> String {
    fn sanitize(s: &str) -> String {
        s.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
    format!("mcp__{}__{}", sanitize(server), sanitize(tool))
}

/// A single remote tool adapted to [`Tool`].
pub struct McpTool {
    client: Arc<dyn McpClient>,
    info: McpToolInfo,
    qualified_name: String,
}

impl McpTool {
    pub fn new(client: Arc<dyn McpClient>, info: McpToolInfo) -> Self {
        let qualified_name = qualified_tool_name(client.server_name(), &info.name);
        Self {
            client,
            info,
            qualified_name,
        }
    }

    pub fn remote_name(&self) -> &str {
        &self.info.name
    }
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.qualified_name
    }

    fn description(&self) -> &str {
        if self.info.description.is_empty() {
            &self.info.name
        } else {
            &self.info.description
        }
    }

    fn input_schema(&self) -> Value {
        self.info.input_schema.clone()
    }

    async fn validate(&self, input: &Value, _ctx: &ToolContext) -> Result<(), ToolError> {
        if !input.is_object() {
            return Err(ToolError::InvalidArguments(
                "MCP tool arguments must be a JSON object".into(),
            ));
        }
        Ok(())
    }

    fn execute(&self, input: Value, _ctx: &ToolContext) -> ToolEventStream {
        let client = Arc::clone(&self.client);
        let remote = self.info.name.clone();
        Box::pin(async_stream::stream! {
            match client.call_tool(&remote, input).await {
                Ok(result) if result.is_error => {
                    yield Err(ToolError::ExecutionFailed(result.text()));
                }
                Ok(result) => yield Ok(ToolEvent::result(result.text())),
                Err(e) => yield Err(ToolError::ExecutionFailed(e.to_string())),
            }
        })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

struct CachedListing {
    tools: Vec<McpToolInfo>,
    fetched_at: Instant,
}

/// Caches one server's tool listing for [`MCP_TOOL_CACHE_TTL`].
pub struct McpToolCatalog {
    client: Arc<dyn McpClient>,
    ttl: Duration,
    cache: Mutex<Option<CachedListing>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl McpToolCatalog {
    pub fn new(client: Arc<dyn McpClient>) -> Self {
        Self {
            client,
            ttl: MCP_TOOL_CACHE_TTL,
            cache: Mutex::new(None),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn server_name(&self) -> &str {
        self.client.server_name()
    }

    /// The server's tools, from cache while fresh.
    pub async fn tools(&self) -> Result<Vec<McpToolInfo>, McpError> {
        if let Some(cached) = self.cache.lock().as_ref() {
            if cached.fetched_at.elapsed() < self.ttl {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(cached.tools.clone());
            }
        }
        self.refresh().await
    }

    /// Bypass the cache and list again.
    pub async fn refresh(&self) -> Result<Vec<McpToolInfo>, McpError> {
        self.misses.fetch_add(1, Ordering::Relaxed);
        let tools = self.client.list_tools().await?;
        debug!(server = self.server_name(), count = tools.len(), "MCP tools listed");
        *self.cache.lock() = Some(CachedListing {
            tools: tools.clone(),
            fetched_at: Instant::now(),
        });
        Ok(tools)
    }

    pub fn invalidate(&self) {
        *self.cache.lock() = None;
    }

    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Replace this server's tools in `registry`. Returns how many were
    /// registered.
    pub async fn register(&self, registry: &mut ToolRegistry) -> Result<usize, McpError> {
        let tools = self.tools().await?;
        let source = ToolSource::Mcp(self.server_name().to_string());
        registry.unregister_source(&source);
        for info in tools.iter().cloned() {
            registry.register(
                Arc::new(McpTool::new(Arc::clone(&self.client), info)),
                source.clone(),
            );
        }
        info!(server = self.server_name(), count = tools.len(), "MCP tools registered");
        Ok(tools.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::sync::atomic::AtomicUsize;
    use tokio_util::sync::CancellationToken;

    struct FakeServer {
        tools: Mutex<Vec<McpToolInfo>>,
        list_calls: AtomicUsize,
    }

    impl FakeServer {
        fn new(names: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                tools: Mutex::new(names.iter().map(|n| info(n)).collect()),
                list_calls: AtomicUsize::new(0),
            })
        }
    }

    fn info(name: &str) -> McpToolInfo {
        McpToolInfo {
            name: name.into(),
            description: format!("{name} tool"),
            input_schema: default_schema(),
        }
    }

    #[async_trait]
    impl McpClient for FakeServer {
        fn server_name(&self) -> &str {
            "git"
        }

        async fn list_tools(&self) -> Result<Vec<McpToolInfo>, McpError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.tools.lock().clone())
        }

        async fn call_tool(&self, name: &str, arguments: Value) -> Result<McpCallResult, McpError> {
            match name {
                "fail" => Ok(McpCallResult {
                    content: vec![McpContent::Text {
                        text: "not a repository".into(),
                    }],
                    is_error: true,
                }),
                "down" => Err(McpError::Transport("connection reset".into())),
                _ => Ok(McpCallResult {
                    content: vec![
                        McpContent::Text {
                            text: format!("{name} {arguments}"),
                        },
                        McpContent::Image {
                            data: "AAAA".into(),
                            mime_type: "image/png".into(),
                        },
                    ],
                    is_error: false,
                }),
            }
        }
    }

    async fn run(tool: &McpTool, input: Value) -> Result<ToolEvent, ToolError> {
        let ctx = ToolContext::new("/tmp", CancellationToken::new());
        tool.execute(input, &ctx).next().await.unwrap()
    }

    #[test]
    fn names_are_qualified_and_sanitized() {
        assert_eq!(qualified_tool_name("git", "status"), "mcp__git__status");
        assert_eq!(qualified_tool_name("my.server", "read file"), "mcp__my_server__read_file");
    }

    #[test]
    fn tool_info_parses_wire_shape() {
        let parsed: McpToolInfo = serde_json::from_value(json!({
            "name": "log",
            "inputSchema": {"type": "object", "properties": {"n": {"type": "integer"}}}
        }))
        .unwrap();
        assert_eq!(parsed.description, "");
        assert_eq!(parsed.input_schema["properties"]["n"]["type"], "integer");

        let result: McpCallResult = serde_json::from_value(json!({
            "content": [{"type": "text", "text": "ok"}],
            "isError": true
        }))
        .unwrap();
        assert!(result.is_error);
        assert_eq!(result.text(), "ok");
    }

    #[tokio::test]
    async fn tool_calls_remote_name() {
        let tool = McpTool::new(FakeServer::new(&["status"]), info("status"));
        assert_eq!(tool.name(), "mcp__git__status");
        assert_eq!(tool.remote_name(), "status");
        assert!(tool.needs_permission(&json!({})));

        let event = run(&tool, json!({"short": true})).await.unwrap();
        assert_eq!(
            event,
            ToolEvent::result("status {\"short\":true}\n[image: image/png]")
        );
    }

    #[tokio::test]
    async fn remote_errors_become_tool_errors() {
        let server = FakeServer::new(&[]);
        let failing = McpTool::new(server.clone(), info("fail"));
        let err = run(&failing, json!({})).await.unwrap_err();
        assert_eq!(err.for_assistant(), "not a repository");

        let down = McpTool::new(server, info("down"));
        let err = run(&down, json!({})).await.unwrap_err();
        assert!(err.for_assistant().contains("connection reset"));
    }

    #[tokio::test]
    async fn non_object_arguments_rejected() {
        let tool = McpTool::new(FakeServer::new(&[]), info("status"));
        let ctx = ToolContext::new("/tmp", CancellationToken::new());
        assert!(tool.validate(&json!([1, 2]), &ctx).await.is_err());
        assert!(tool.validate(&json!({}), &ctx).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn listing_cached_until_ttl() {
        let server = FakeServer::new(&["status", "log"]);
        let catalog = McpToolCatalog::new(server.clone());

        assert_eq!(catalog.tools().await.unwrap().len(), 2);
        assert_eq!(catalog.tools().await.unwrap().len(), 2);
        assert_eq!(server.list_calls.load(Ordering::SeqCst), 1);
        assert_eq!(catalog.cache_stats(), CacheStats { hits: 1, misses: 1 });

        tokio::time::advance(MCP_TOOL_CACHE_TTL + Duration::from_secs(1)).await;
        catalog.tools().await.unwrap();
        assert_eq!(server.list_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_relist() {
        let server = FakeServer::new(&["status"]);
        let catalog = McpToolCatalog::new(server.clone());
        catalog.tools().await.unwrap();

        server.tools.lock().push(info("diff"));
        assert_eq!(catalog.tools().await.unwrap().len(), 1);

        catalog.invalidate();
        assert_eq!(catalog.tools().await.unwrap().len(), 2);
        assert_eq!(catalog.cache_stats().misses, 2);
    }

    #[tokio::test]
    async fn register_replaces_server_tools() {
        let server = FakeServer::new(&["status", "log"]);
        let catalog = McpToolCatalog::new(server.clone());
        let mut registry = ToolRegistry::new();
        registry.register(
            Arc::new(crate::registry::tests::DummyTool::new("Bash")),
            ToolSource::BuiltIn,
        );

        assert_eq!(catalog.register(&mut registry).await.unwrap(), 2);
        assert_eq!(
            registry.names(),
            vec!["Bash", "mcp__git__log", "mcp__git__status"]
        );

        *server.tools.lock() = vec![info("blame")];
        catalog.invalidate();
        catalog.register(&mut registry).await.unwrap();
        assert_eq!(registry.names(), vec!["Bash", "mcp__git__blame"]);
        assert_eq!(
            registry.source("mcp__git__blame"),
            Some(&ToolSource::Mcp("git".into()))
        );
    }
}
