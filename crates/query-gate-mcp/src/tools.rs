// crates/query-gate-mcp/src/tools.rs
// ============================================================================
// Module: MCP Tool Router
// Description: Tool routing for the Query Gate MCP server.
// Purpose: Expose thin wrappers over the gateway pipeline.
// Dependencies: query-gate-core, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! The tool router dispatches MCP tool calls to the gateway pipeline. All
//! tool handlers are thin wrappers over
//! [`query_gate_core::QueryGateway`]; tool inputs are untrusted and are
//! decoded strictly before anything touches the pipeline.
//!
//! ## Invariants
//! - Callers never submit SQL text; tools accept only names and values.
//! - Error classes keep their JSON-RPC identity so callers can distinguish
//!   validation failures from guard rejections.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use query_gate_core::ExecutionOptions;
use query_gate_core::GatewayError;
use query_gate_core::ParameterSpec;
use query_gate_core::QueryDefinition;
use query_gate_core::QueryGateway;
use query_gate_core::QueryName;
use query_gate_core::QuerySummary;
use query_gate_core::RegistryError;
use query_gate_core::RunRequest;
use query_gate_core::StatementKind;
use query_gate_core::StatementOutcome;
use query_gate_core::TagFilter;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;

// ============================================================================
// SECTION: Tool Names
// ============================================================================

/// Canonical MCP tool names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolName {
    /// Discovery listing over the active catalog.
    QueriesList,
    /// Full detail for one named query.
    QueryGet,
    /// Validated execution of one named query.
    QueryRun,
}

impl ToolName {
    /// Parses a wire tool name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "queries_list" => Some(Self::QueriesList),
            "query_get" => Some(Self::QueryGet),
            "query_run" => Some(Self::QueryRun),
            _ => None,
        }
    }

    /// Returns the wire form of the tool name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::QueriesList => "queries_list",
            Self::QueryGet => "query_get",
            Self::QueryRun => "query_run",
        }
    }
}

// ============================================================================
// SECTION: Tool Definitions
// ============================================================================

/// Tool definition shape used by MCP tool listings.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    /// Wire tool name.
    pub name: &'static str,
    /// Human-readable tool description.
    pub description: &'static str,
    /// JSON Schema describing the tool input.
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Returns the canonical MCP tool definitions.
///
/// The order is intentional: discovery first, then inspection, then
/// execution. Append new tools at the end.
#[must_use]
pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: ToolName::QueriesList.as_str(),
            description: "List active registered queries with their parameter schemas. \
                          This is the primary discovery tool; call it before deciding \
                          which query to run. Accepts an optional comma-separated tag \
                          filter.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "tags": {
                        "type": "string",
                        "description": "Optional comma-separated tag filter."
                    }
                },
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: ToolName::QueryGet.as_str(),
            description: "Fetch full detail for a single named query, including its SQL \
                          text, parameter definitions, statement kind, version, and tags.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": {
                        "type": "string",
                        "description": "The query slug to look up."
                    }
                },
                "required": ["name"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: ToolName::QueryRun.as_str(),
            description: "Execute a registered query with validated, typed bind values. \
                          Mutating queries require confirm_mutation on a second, informed \
                          pass. Row counts are capped by the server's hard ceiling.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": {
                        "type": "string",
                        "description": "The query slug to execute."
                    },
                    "parameters": {
                        "type": "object",
                        "description": "Bind parameter values keyed by name."
                    },
                    "max_rows": {
                        "type": "integer",
                        "description": "Maximum rows to return; clamped to the hard ceiling."
                    },
                    "confirm_mutation": {
                        "type": "boolean",
                        "description": "Explicit opt-in required for mutating queries."
                    }
                },
                "required": ["name"],
                "additionalProperties": false
            }),
        },
    ]
}

// ============================================================================
// SECTION: Request Context
// ============================================================================

/// Transport-supplied context for one request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Transport label for warnings and audit identity.
    pub transport: &'static str,
    /// Peer IP address when available.
    pub peer_ip: Option<String>,
    /// Opaque caller identity supplied by the transport.
    pub caller_id: Option<String>,
    /// JSON-RPC request identifier when provided.
    pub request_id: Option<String>,
}

impl RequestContext {
    /// Builds a context for the stdio transport.
    #[must_use]
    pub const fn stdio() -> Self {
        Self {
            transport: "stdio",
            peer_ip: None,
            caller_id: None,
            request_id: None,
        }
    }

    /// Builds a context for the HTTP transport.
    #[must_use]
    pub const fn http(peer_ip: Option<String>, caller_id: Option<String>) -> Self {
        Self {
            transport: "http",
            peer_ip,
            caller_id,
            request_id: None,
        }
    }

    /// Attaches the JSON-RPC request identifier.
    #[must_use]
    pub fn with_request_id(mut self, request_id: String) -> Self {
        self.request_id = Some(request_id);
        self
    }
}

// ============================================================================
// SECTION: Payloads
// ============================================================================

/// `queries_list` request payload.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct QueriesListRequest {
    /// Optional comma-separated tag filter.
    #[serde(default)]
    tags: Option<String>,
}

/// `query_get` request payload.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct QueryGetRequest {
    /// The query slug to look up.
    name: String,
}

/// `query_run` request payload.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct QueryRunRequest {
    /// The query slug to execute.
    name: String,
    /// Bind parameter values keyed by name.
    #[serde(default)]
    parameters: BTreeMap<String, Value>,
    /// Requested row cap.
    #[serde(default)]
    max_rows: Option<i64>,
    /// Explicit opt-in for mutating queries.
    #[serde(default)]
    confirm_mutation: bool,
}

/// `queries_list` response payload.
#[derive(Debug, Serialize)]
struct QueriesListResult {
    /// Active query summaries.
    queries: Vec<QuerySummary>,
}

/// `query_get` response payload.
#[derive(Debug, Serialize)]
struct QueryDetail {
    /// Stable query slug.
    name: String,
    /// Active version number.
    version: i64,
    /// Human-readable description.
    description: String,
    /// Approved SQL text with named bind placeholders.
    sql_text: String,
    /// Ordered parameter schema.
    parameters: Vec<ParameterSpec>,
    /// Statement classification.
    statement_kind: StatementKind,
    /// Discovery tags.
    tags: BTreeSet<String>,
}

impl From<QueryDefinition> for QueryDetail {
    fn from(definition: QueryDefinition) -> Self {
        Self {
            name: definition.name.to_string(),
            version: definition.version,
            description: definition.description,
            sql_text: definition.sql_text,
            parameters: definition.parameters,
            statement_kind: definition.statement_kind,
            tags: definition.tags,
        }
    }
}

// ============================================================================
// SECTION: Tool Router
// ============================================================================

/// Tool router for MCP requests.
#[derive(Clone)]
pub struct ToolRouter {
    /// Gateway pipeline serving all tools.
    gateway: QueryGateway,
}

impl ToolRouter {
    /// Creates a new tool router over a gateway.
    #[must_use]
    pub const fn new(gateway: QueryGateway) -> Self {
        Self {
            gateway,
        }
    }

    /// Lists the MCP tools supported by this server.
    #[must_use]
    pub fn list_tools(&self) -> Vec<ToolDefinition> {
        tool_definitions()
    }

    /// Handles a tool call by name with a JSON payload.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError`] when routing or the pipeline fails.
    pub async fn handle_tool_call(
        &self,
        context: &RequestContext,
        name: &str,
        payload: Value,
    ) -> Result<Value, ToolError> {
        let tool = ToolName::parse(name).ok_or(ToolError::UnknownTool)?;
        match tool {
            ToolName::QueriesList => self.handle_queries_list(payload).await,
            ToolName::QueryGet => self.handle_query_get(payload).await,
            ToolName::QueryRun => self.handle_query_run(context, payload).await,
        }
    }

    /// Handles discovery listing requests.
    async fn handle_queries_list(&self, payload: Value) -> Result<Value, ToolError> {
        let request = decode::<QueriesListRequest>(payload)?;
        let filter = request.tags.as_deref().and_then(TagFilter::parse);
        let queries = self.gateway.list(filter).await?;
        encode(&QueriesListResult {
            queries,
        })
    }

    /// Handles single-query detail requests.
    async fn handle_query_get(&self, payload: Value) -> Result<Value, ToolError> {
        let request = decode::<QueryGetRequest>(payload)?;
        let definition = self.gateway.describe(&QueryName::new(request.name)).await?;
        encode(&QueryDetail::from(definition))
    }

    /// Handles validated execution requests.
    async fn handle_query_run(
        &self,
        context: &RequestContext,
        payload: Value,
    ) -> Result<Value, ToolError> {
        let request = decode::<QueryRunRequest>(payload)?;
        let outcome: StatementOutcome = self
            .gateway
            .run(RunRequest {
                name: QueryName::new(request.name),
                parameters: request.parameters,
                options: ExecutionOptions {
                    max_rows: request.max_rows,
                    confirm_mutation: request.confirm_mutation,
                },
                caller_id: context.caller_id.clone(),
            })
            .await?;
        encode(&outcome)
    }
}

/// Decodes a strict JSON payload into a typed request.
fn decode<T: serde::de::DeserializeOwned>(payload: Value) -> Result<T, ToolError> {
    serde_json::from_value(payload).map_err(|error| ToolError::InvalidParams(error.to_string()))
}

/// Encodes a typed response into a JSON payload.
fn encode<T: Serialize>(payload: &T) -> Result<Value, ToolError> {
    serde_json::to_value(payload).map_err(|_| ToolError::Serialization)
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Tool routing errors with stable JSON-RPC identity per class.
#[derive(Debug, Error, Clone)]
pub enum ToolError {
    /// The tool name is not part of the canonical surface.
    #[error("unknown tool")]
    UnknownTool,
    /// The payload did not decode into the tool's request shape.
    #[error("invalid tool params: {0}")]
    InvalidParams(String),
    /// No active query matched the requested name.
    #[error("{0}")]
    NotFound(String),
    /// Parameter validation failed; the message names the parameter.
    #[error("{0}")]
    Validation(String),
    /// A safety gate rejected the request; retry with corrected options.
    #[error("{0}")]
    Rejected(String),
    /// The statement failed at the store.
    #[error("{0}")]
    Execution(String),
    /// Registry integrity fault; fatal to the request.
    #[error("registry integrity fault")]
    Integrity,
    /// Internal server failure.
    #[error("internal error")]
    Internal,
    /// Response serialization failed.
    #[error("serialization failed")]
    Serialization,
}

impl From<GatewayError> for ToolError {
    fn from(error: GatewayError) -> Self {
        match error {
            GatewayError::Registry(RegistryError::NotFound {
                ..
            }) => Self::NotFound(error.to_string()),
            GatewayError::Registry(RegistryError::Integrity(_)) => Self::Integrity,
            GatewayError::Registry(RegistryError::Store(_)) | GatewayError::Internal(_) => {
                Self::Internal
            }
            GatewayError::Validation(inner) => Self::Validation(inner.to_string()),
            GatewayError::Guard(inner) => Self::Rejected(inner.to_string()),
            GatewayError::Execution(inner) => Self::Execution(inner.to_string()),
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test-only assertions are permitted."
    )]

    use serde_json::json;

    use super::ToolName;
    use super::tool_definitions;

    #[test]
    fn tool_names_round_trip() {
        for tool in [ToolName::QueriesList, ToolName::QueryGet, ToolName::QueryRun] {
            assert_eq!(ToolName::parse(tool.as_str()), Some(tool));
        }
        assert_eq!(ToolName::parse("run_sql"), None);
    }

    #[test]
    fn definitions_cover_the_canonical_surface_in_order() {
        let names: Vec<&str> =
            tool_definitions().iter().map(|definition| definition.name).collect();
        assert_eq!(names, vec!["queries_list", "query_get", "query_run"]);
    }

    #[test]
    fn run_schema_requires_only_the_name() {
        let definitions = tool_definitions();
        let run = definitions
            .iter()
            .find(|definition| definition.name == "query_run")
            .expect("run tool");
        assert_eq!(run.input_schema["required"], json!(["name"]));
        assert_eq!(run.input_schema["additionalProperties"], json!(false));
    }
}
