// crates/query-gate-mcp/src/server.rs
// ============================================================================
// Module: MCP Server
// Description: MCP server implementations for stdio and HTTP transports.
// Purpose: Expose Query Gate tools and prompts via JSON-RPC 2.0.
// Dependencies: query-gate-core, query-gate-store-sqlite, axum, tokio
// ============================================================================

//! ## Overview
//! The MCP server exposes the gateway tools using JSON-RPC 2.0 over framed
//! stdio or HTTP, always routing calls through [`crate::tools::ToolRouter`].
//! Inputs are untrusted: body sizes are capped before parsing and every
//! payload is decoded strictly. Audit channels are wired here (the file
//! channel from configuration, the store channel from the backing store) so
//! every transport shares one pipeline.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::ConnectInfo;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use query_gate_core::AuditChannel;
use query_gate_core::QueryExecutor;
use query_gate_core::QueryGateway;
use query_gate_core::QueryGatewayConfig;
use query_gate_core::QueryRegistry;
use query_gate_core::WarningSink;
use query_gate_store_sqlite::SqliteStore;
use query_gate_store_sqlite::SqliteStoreConfig;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;

use crate::audit_sink::FileAuditChannel;
use crate::audit_sink::StderrWarningSink;
use crate::config::QueryGateConfig;
use crate::config::ServerTransport;
use crate::prompts::prompt_definitions;
use crate::prompts::render_prompt;
use crate::tools::RequestContext;
use crate::tools::ToolDefinition;
use crate::tools::ToolError;
use crate::tools::ToolRouter;

/// Header carrying the opaque caller identity on HTTP requests.
const CALLER_HEADER: &str = "x-query-gate-caller";

// ============================================================================
// SECTION: MCP Server
// ============================================================================

/// MCP server instance.
pub struct McpServer {
    /// Server configuration.
    config: QueryGateConfig,
    /// Tool router for request dispatch.
    router: ToolRouter,
}

impl McpServer {
    /// Builds a new MCP server from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`McpServerError`] when validation or initialization fails.
    pub fn from_config(config: QueryGateConfig) -> Result<Self, McpServerError> {
        config.validate().map_err(|error| McpServerError::Config(error.to_string()))?;
        let store = Arc::new(
            SqliteStore::new(&SqliteStoreConfig {
                path: config.store.path.clone(),
                busy_timeout_ms: config.store.busy_timeout_ms,
            })
            .map_err(|error| McpServerError::Init(error.to_string()))?,
        );
        let file_channel = FileAuditChannel::new(&config.audit.log_path)
            .map_err(|error| McpServerError::Init(error.to_string()))?;
        let warnings: Arc<dyn WarningSink> = Arc::new(StderrWarningSink);
        let audit_channels: Vec<Arc<dyn AuditChannel>> = vec![
            Arc::new(file_channel),
            Arc::clone(&store) as Arc<dyn AuditChannel>,
        ];
        let gateway = QueryGateway::new(QueryGatewayConfig {
            registry: Arc::clone(&store) as Arc<dyn QueryRegistry>,
            executor: store as Arc<dyn QueryExecutor>,
            audit_channels,
            warnings,
            environment: config.environment,
            row_caps: config.limits.row_cap_policy(),
        });
        let router = ToolRouter::new(gateway);
        Ok(Self {
            config,
            router,
        })
    }

    /// Serves requests using the configured transport.
    ///
    /// # Errors
    ///
    /// Returns [`McpServerError`] when the server fails.
    pub async fn serve(self) -> Result<(), McpServerError> {
        let max_body_bytes = self.config.server.max_body_bytes;
        match self.config.server.transport {
            ServerTransport::Stdio => {
                let mut reader = BufReader::new(tokio::io::stdin());
                let mut writer = tokio::io::stdout();
                serve_stdio(&self.router, &mut reader, &mut writer, max_body_bytes).await
            }
            ServerTransport::Http => serve_http(self.config, self.router).await,
        }
    }
}

// ============================================================================
// SECTION: Stdio Transport
// ============================================================================

/// Serves JSON-RPC requests over a framed byte stream until EOF.
async fn serve_stdio<R, W>(
    router: &ToolRouter,
    reader: &mut BufReader<R>,
    writer: &mut W,
    max_body_bytes: usize,
) -> Result<(), McpServerError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let Some(bytes) = read_framed(reader, max_body_bytes).await? else {
            return Ok(());
        };
        let context = RequestContext::stdio();
        let response = match serde_json::from_slice::<JsonRpcRequest>(&bytes) {
            Ok(request) => handle_request(router, &context, request).await.1,
            Err(_) => invalid_request_response(),
        };
        let payload = serde_json::to_vec(&response)
            .map_err(|_| McpServerError::Transport("json-rpc serialization failed".to_string()))?;
        write_framed(writer, &payload).await?;
    }
}

// ============================================================================
// SECTION: HTTP Transport
// ============================================================================

/// Serves JSON-RPC requests over HTTP.
async fn serve_http(config: QueryGateConfig, router: ToolRouter) -> Result<(), McpServerError> {
    let bind = config
        .server
        .bind
        .as_ref()
        .ok_or_else(|| McpServerError::Config("bind address required".to_string()))?;
    let addr: SocketAddr =
        bind.parse().map_err(|_| McpServerError::Config("invalid bind address".to_string()))?;
    let state = Arc::new(ServerState {
        router,
        max_body_bytes: config.server.max_body_bytes,
    });
    let app = Router::new().route("/rpc", post(handle_http)).with_state(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|_| McpServerError::Transport("http bind failed".to_string()))?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .map_err(|_| McpServerError::Transport("http server failed".to_string()))
}

/// Shared server state for HTTP handlers.
#[derive(Clone)]
struct ServerState {
    /// Tool router for request dispatch.
    router: ToolRouter,
    /// Maximum allowed request body size.
    max_body_bytes: usize,
}

/// Handles HTTP JSON-RPC requests.
async fn handle_http(
    State(state): State<Arc<ServerState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    bytes: Bytes,
) -> impl IntoResponse {
    if bytes.len() > state.max_body_bytes {
        return (
            StatusCode::PAYLOAD_TOO_LARGE,
            axum::Json(JsonRpcResponse {
                jsonrpc: "2.0",
                id: Value::Null,
                result: None,
                error: Some(JsonRpcError {
                    code: -32070,
                    message: "request body too large".to_string(),
                }),
            }),
        );
    }
    let caller_id = headers
        .get(CALLER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let context = RequestContext::http(Some(peer.ip().to_string()), caller_id);
    let response = match serde_json::from_slice::<JsonRpcRequest>(bytes.as_ref()) {
        Ok(request) => handle_request(&state.router, &context, request).await,
        Err(_) => (StatusCode::BAD_REQUEST, invalid_request_response()),
    };
    (response.0, axum::Json(response.1))
}

// ============================================================================
// SECTION: JSON-RPC Handling
// ============================================================================

/// Incoming JSON-RPC request payload.
#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    /// JSON-RPC protocol version.
    jsonrpc: String,
    /// Request identifier.
    id: Value,
    /// Method name.
    method: String,
    /// Optional parameters payload.
    params: Option<Value>,
}

/// JSON-RPC response envelope.
#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    /// JSON-RPC protocol version.
    jsonrpc: &'static str,
    /// Request identifier.
    id: Value,
    /// Successful result payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    /// Error payload when the request fails.
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

/// JSON-RPC error payload.
#[derive(Debug, Serialize)]
struct JsonRpcError {
    /// Error code.
    code: i64,
    /// Human-readable error message.
    message: String,
}

/// Tool call parameters for JSON-RPC requests.
#[derive(Debug, Deserialize)]
struct ToolCallParams {
    /// Tool name.
    name: String,
    /// Raw JSON arguments.
    #[serde(default)]
    arguments: Value,
}

/// Prompt fetch parameters for JSON-RPC requests.
#[derive(Debug, Deserialize)]
struct PromptGetParams {
    /// Prompt name.
    name: String,
    /// Prompt arguments.
    #[serde(default)]
    arguments: BTreeMap<String, String>,
}

/// Tool list response payload.
#[derive(Debug, Serialize)]
struct ToolListResult {
    /// Registered tool definitions.
    tools: Vec<ToolDefinition>,
}

/// Builds the response for a malformed request envelope.
fn invalid_request_response() -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0",
        id: Value::Null,
        result: None,
        error: Some(JsonRpcError {
            code: -32600,
            message: "invalid json-rpc request".to_string(),
        }),
    }
}

/// Builds a success response envelope.
fn success_response(id: Value, result: Value) -> (StatusCode, JsonRpcResponse) {
    (
        StatusCode::OK,
        JsonRpcResponse {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        },
    )
}

/// Builds an error response envelope from raw parts.
fn error_response(
    status: StatusCode,
    id: Value,
    code: i64,
    message: String,
) -> (StatusCode, JsonRpcResponse) {
    (
        status,
        JsonRpcResponse {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message,
            }),
        },
    )
}

/// Dispatches a JSON-RPC request to the tool router.
async fn handle_request(
    router: &ToolRouter,
    base_context: &RequestContext,
    request: JsonRpcRequest,
) -> (StatusCode, JsonRpcResponse) {
    if request.jsonrpc != "2.0" {
        return error_response(
            StatusCode::BAD_REQUEST,
            request.id,
            -32600,
            "invalid json-rpc version".to_string(),
        );
    }
    let context = base_context.clone().with_request_id(request.id.to_string());
    match request.method.as_str() {
        "tools/list" => {
            let result = ToolListResult {
                tools: router.list_tools(),
            };
            serde_json::to_value(result).map_or_else(
                |_| jsonrpc_error(Value::Null, &ToolError::Serialization),
                |value| success_response(request.id, value),
            )
        }
        "tools/call" => {
            let id = request.id;
            let params = request.params.unwrap_or(Value::Null);
            match serde_json::from_value::<ToolCallParams>(params) {
                Ok(call) => {
                    // Omitted arguments mean "no arguments", not a null payload.
                    let arguments = if call.arguments.is_null() {
                        Value::Object(serde_json::Map::new())
                    } else {
                        call.arguments
                    };
                    match router.handle_tool_call(&context, &call.name, arguments).await {
                        Ok(result) => {
                            let content = json!({
                                "content": [{ "type": "json", "json": result }]
                            });
                            success_response(id, content)
                        }
                        Err(error) => jsonrpc_error(id, &error),
                    }
                }
                Err(_) => error_response(
                    StatusCode::BAD_REQUEST,
                    id,
                    -32602,
                    "invalid tool params".to_string(),
                ),
            }
        }
        "prompts/list" => {
            let result = json!({ "prompts": prompt_definitions() });
            success_response(request.id, result)
        }
        "prompts/get" => {
            let id = request.id;
            let params = request.params.unwrap_or(Value::Null);
            match serde_json::from_value::<PromptGetParams>(params) {
                Ok(get) => match render_prompt(&get.name, &get.arguments) {
                    Ok(text) => {
                        let result = json!({
                            "messages": [{
                                "role": "user",
                                "content": { "type": "text", "text": text }
                            }]
                        });
                        success_response(id, result)
                    }
                    Err(error) => {
                        error_response(StatusCode::BAD_REQUEST, id, -32601, error.to_string())
                    }
                },
                Err(_) => error_response(
                    StatusCode::BAD_REQUEST,
                    id,
                    -32602,
                    "invalid prompt params".to_string(),
                ),
            }
        }
        _ => error_response(
            StatusCode::BAD_REQUEST,
            request.id,
            -32601,
            "method not found".to_string(),
        ),
    }
}

/// Builds a JSON-RPC error response for a tool failure.
fn jsonrpc_error(id: Value, error: &ToolError) -> (StatusCode, JsonRpcResponse) {
    let (status, code) = match error {
        ToolError::UnknownTool => (StatusCode::BAD_REQUEST, -32601),
        ToolError::InvalidParams(_) => (StatusCode::BAD_REQUEST, -32602),
        ToolError::NotFound(_) => (StatusCode::OK, -32004),
        ToolError::Validation(_) => (StatusCode::OK, -32010),
        ToolError::Rejected(_) => (StatusCode::OK, -32011),
        ToolError::Execution(_) => (StatusCode::OK, -32020),
        ToolError::Integrity => (StatusCode::OK, -32030),
        ToolError::Internal => (StatusCode::OK, -32050),
        ToolError::Serialization => (StatusCode::OK, -32060),
    };
    error_response(status, id, code, error.to_string())
}

// ============================================================================
// SECTION: Framing Helpers
// ============================================================================

/// Reads a framed stdio payload using MCP Content-Length headers.
///
/// Returns `None` on a clean EOF at a frame boundary.
async fn read_framed<R>(
    reader: &mut BufReader<R>,
    max_body_bytes: usize,
) -> Result<Option<Vec<u8>>, McpServerError>
where
    R: AsyncRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut line = String::new();
    loop {
        line.clear();
        let bytes = reader
            .read_line(&mut line)
            .await
            .map_err(|_| McpServerError::Transport("stdio read failed".to_string()))?;
        if bytes == 0 {
            if content_length.is_some() {
                return Err(McpServerError::Transport("stdio closed mid-frame".to_string()));
            }
            return Ok(None);
        }
        if line.trim().is_empty() {
            break;
        }
        if let Some(value) = line.strip_prefix("Content-Length:") {
            let parsed = value
                .trim()
                .parse::<usize>()
                .map_err(|_| McpServerError::Transport("invalid content length".to_string()))?;
            content_length = Some(parsed);
        }
    }
    let len = content_length
        .ok_or_else(|| McpServerError::Transport("missing content length".to_string()))?;
    if len > max_body_bytes {
        return Err(McpServerError::Transport("payload too large".to_string()));
    }
    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|_| McpServerError::Transport("stdio read failed".to_string()))?;
    Ok(Some(buf))
}

/// Writes a framed stdio payload using MCP Content-Length headers.
async fn write_framed<W>(writer: &mut W, payload: &[u8]) -> Result<(), McpServerError>
where
    W: AsyncWrite + Unpin,
{
    let header = format!("Content-Length: {}\r\n\r\n", payload.len());
    writer
        .write_all(header.as_bytes())
        .await
        .map_err(|_| McpServerError::Transport("stdio write failed".to_string()))?;
    writer
        .write_all(payload)
        .await
        .map_err(|_| McpServerError::Transport("stdio write failed".to_string()))?;
    writer
        .flush()
        .await
        .map_err(|_| McpServerError::Transport("stdio write failed".to_string()))
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// MCP server errors.
#[derive(Debug, thiserror::Error)]
pub enum McpServerError {
    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),
    /// Initialization errors.
    #[error("init error: {0}")]
    Init(String),
    /// Transport errors.
    #[error("transport error: {0}")]
    Transport(String),
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::panic,
        clippy::print_stdout,
        clippy::print_stderr,
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::use_debug,
        clippy::dbg_macro,
        clippy::panic_in_result_fn,
        clippy::unwrap_in_result,
        reason = "Test-only framing assertions."
    )]

    use std::io::Cursor;

    use tokio::io::BufReader;

    use super::read_framed;
    use super::write_framed;

    fn framed(payload: &[u8]) -> Vec<u8> {
        format!("Content-Length: {}\r\n\r\n{}", payload.len(), String::from_utf8_lossy(payload))
            .into_bytes()
    }

    #[tokio::test]
    async fn read_framed_rejects_payload_over_limit() {
        let payload = br#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#;
        let mut reader = BufReader::new(Cursor::new(framed(payload)));
        let result = read_framed(&mut reader, payload.len() - 1).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn read_framed_accepts_payload_at_limit() {
        let payload = br#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#;
        let mut reader = BufReader::new(Cursor::new(framed(payload)));
        let result = read_framed(&mut reader, payload.len()).await;
        let bytes = result.expect("payload read").expect("frame present");
        assert_eq!(bytes, payload);
    }

    #[tokio::test]
    async fn read_framed_reports_clean_eof_as_none() {
        let mut reader = BufReader::new(Cursor::new(Vec::new()));
        let result = read_framed(&mut reader, 1024).await;
        assert!(result.expect("clean eof").is_none());
    }

    #[tokio::test]
    async fn write_framed_round_trips_through_read_framed() {
        let payload = br#"{"jsonrpc":"2.0","id":7,"method":"tools/list"}"#;
        let mut buffer = Vec::new();
        write_framed(&mut buffer, payload).await.expect("write");
        let mut reader = BufReader::new(Cursor::new(buffer));
        let bytes = read_framed(&mut reader, 1024).await.expect("read").expect("frame");
        assert_eq!(bytes, payload);
    }
}
