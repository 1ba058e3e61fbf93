// crates/query-gate-mcp/src/lib.rs
// ============================================================================
// Module: Query Gate MCP
// Description: MCP server, tool surface, and audit sinks for Query Gate.
// Purpose: Provide MCP tool adapters over the gateway pipeline.
// Dependencies: query-gate-core, query-gate-store-sqlite, axum, tokio
// ============================================================================

//! ## Overview
//! Query Gate MCP exposes the gateway pipeline through MCP tools and prompts
//! over JSON-RPC 2.0. All tools are thin wrappers over
//! [`query_gate_core::QueryGateway`]; the server wires the file and store
//! audit channels so every transport shares one audited pipeline.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod audit_sink;
pub mod config;
pub mod prompts;
pub mod server;
pub mod tools;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use audit_sink::FileAuditChannel;
pub use audit_sink::NoopAuditChannel;
pub use audit_sink::StderrWarningSink;
pub use config::AuditConfig;
pub use config::ConfigError;
pub use config::LimitsConfig;
pub use config::QueryGateConfig;
pub use config::ServerConfig;
pub use config::ServerTransport;
pub use config::StoreConfig;
pub use prompts::PromptDefinition;
pub use prompts::PromptName;
pub use prompts::prompt_definitions;
pub use prompts::render_prompt;
pub use server::McpServer;
pub use server::McpServerError;
pub use tools::RequestContext;
pub use tools::ToolDefinition;
pub use tools::ToolError;
pub use tools::ToolName;
pub use tools::ToolRouter;
pub use tools::tool_definitions;
