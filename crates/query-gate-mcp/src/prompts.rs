// crates/query-gate-mcp/src/prompts.rs
// ============================================================================
// Module: MCP Prompts
// Description: Guided workflows for discovery, exploration, and audit review.
// Purpose: Provide parameterized instruction text over the tool surface.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! Prompts are parameterized instruction texts that walk a calling agent
//! through the tool surface: discovering queries, exploring data safely,
//! authoring new registry entries, and reviewing the audit trail. They
//! produce text only and never touch the pipeline themselves.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Prompt Names
// ============================================================================

/// Canonical MCP prompt names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptName {
    /// Walk through discovering registered queries.
    QueryDiscovery,
    /// Walk through exploring data with read-only queries.
    DataExploration,
    /// Walk through drafting a new registry entry.
    QueryAuthoring,
    /// Walk through reviewing the execution audit trail.
    AuditReview,
}

impl PromptName {
    /// Parses a wire prompt name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "query_discovery" => Some(Self::QueryDiscovery),
            "data_exploration" => Some(Self::DataExploration),
            "query_authoring" => Some(Self::QueryAuthoring),
            "audit_review" => Some(Self::AuditReview),
            _ => None,
        }
    }

    /// Returns the wire form of the prompt name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::QueryDiscovery => "query_discovery",
            Self::DataExploration => "data_exploration",
            Self::QueryAuthoring => "query_authoring",
            Self::AuditReview => "audit_review",
        }
    }
}

// ============================================================================
// SECTION: Prompt Definitions
// ============================================================================

/// One declared prompt argument.
#[derive(Debug, Clone, Serialize)]
pub struct PromptArgument {
    /// Argument name.
    pub name: &'static str,
    /// Human-readable argument description.
    pub description: &'static str,
    /// Whether the argument must be supplied.
    pub required: bool,
}

/// Prompt definition shape used by MCP prompt listings.
#[derive(Debug, Clone, Serialize)]
pub struct PromptDefinition {
    /// Wire prompt name.
    pub name: &'static str,
    /// Human-readable prompt description.
    pub description: &'static str,
    /// Declared arguments.
    pub arguments: Vec<PromptArgument>,
}

/// Returns the canonical MCP prompt definitions.
#[must_use]
pub fn prompt_definitions() -> Vec<PromptDefinition> {
    vec![
        PromptDefinition {
            name: PromptName::QueryDiscovery.as_str(),
            description: "Discover and understand queries available in the registry.",
            arguments: vec![PromptArgument {
                name: "tags",
                description: "Optional comma-separated tags to focus discovery on.",
                required: false,
            }],
        },
        PromptDefinition {
            name: PromptName::DataExploration.as_str(),
            description: "Explore data through read-only registered queries.",
            arguments: vec![PromptArgument {
                name: "focus",
                description: "Optional business area to explore first.",
                required: false,
            }],
        },
        PromptDefinition {
            name: PromptName::QueryAuthoring.as_str(),
            description: "Draft a new registry entry for administrative review.",
            arguments: vec![PromptArgument {
                name: "task",
                description: "Optional statement of what the new query should answer.",
                required: false,
            }],
        },
        PromptDefinition {
            name: PromptName::AuditReview.as_str(),
            description: "Review recent query executions for errors and usage trends.",
            arguments: vec![
                PromptArgument {
                    name: "time_range",
                    description: "Lookback window: 1h, 24h, 7d, or 30d. Defaults to 24h.",
                    required: false,
                },
                PromptArgument {
                    name: "query_name",
                    description: "Optional query name to focus the review on.",
                    required: false,
                },
            ],
        },
    ]
}

// ============================================================================
// SECTION: Rendering
// ============================================================================

/// Renders a prompt with its supplied arguments.
///
/// # Errors
///
/// Returns [`PromptError::UnknownPrompt`] for names outside the canonical
/// surface.
pub fn render_prompt(
    name: &str,
    arguments: &BTreeMap<String, String>,
) -> Result<String, PromptError> {
    let prompt = PromptName::parse(name).ok_or(PromptError::UnknownPrompt)?;
    let rendered = match prompt {
        PromptName::QueryDiscovery => query_discovery(arguments.get("tags").map(String::as_str)),
        PromptName::DataExploration => {
            data_exploration(arguments.get("focus").map(String::as_str))
        }
        PromptName::QueryAuthoring => query_authoring(arguments.get("task").map(String::as_str)),
        PromptName::AuditReview => audit_review(
            arguments.get("time_range").map(String::as_str),
            arguments.get("query_name").map(String::as_str),
        ),
    };
    Ok(rendered)
}

/// Builds the query discovery walkthrough.
fn query_discovery(tags: Option<&str>) -> String {
    let mut text = String::from(
        "You are helping a user discover and understand queries available in the \
         Query Gate registry. Follow these steps:\n\n\
         ## Step 1 - List available queries\n\
         Call the `queries_list` tool to see what is available. Present the results \
         as a concise table with columns: Name, Description, Tags.\n\n\
         ## Step 2 - Narrow by tags\n\
         If the full list is large, ask the user which domain they are interested in \
         and re-call `queries_list` with a tag filter.\n\n\
         ## Step 3 - Inspect a specific query\n\
         Once the user identifies a query of interest, call `query_get` with its \
         name. Present its description, each parameter (name, type, required or \
         optional, allowed values, defaults), and its tags.\n\n\
         ## Step 4 - Suggest execution\n\
         Help the user build the correct parameters map and suggest calling \
         `query_run`. Confirm parameter values with the user before executing.\n\n\
         ## Guidelines\n\
         - Never guess parameter values; always ask the user.\n\
         - If a parameter has allowed values, list them for the user.\n\
         - If a parameter is optional, explain what happens when it is omitted.",
    );
    if let Some(tags) = tags {
        text.push_str(&format!(
            "\n\nThe user is interested in queries tagged with: \"{tags}\". Start by \
             filtering with these tags."
        ));
    }
    text
}

/// Builds the data exploration walkthrough.
fn data_exploration(focus: Option<&str>) -> String {
    let mut text = String::from(
        "You are helping a user explore data through the Query Gate registry. Only \
         registered queries can run; raw SQL is never accepted. Follow these steps:\n\n\
         ## Step 1 - Map the available data\n\
         Call `queries_list` and group the results by tag so the user can see which \
         business areas are covered.\n\n\
         ## Step 2 - Start with small result sets\n\
         Prefer read-only queries and pass a small `max_rows` (for example 20) on the \
         first call so the user can inspect the shape of the data cheaply.\n\n\
         ## Step 3 - Drill down\n\
         Use what the first results show to pick narrower parameter values, then \
         re-run with a larger cap only when the user asks for more.\n\n\
         ## Guidelines\n\
         - Never set confirm_mutation while exploring; exploration is read-only.\n\
         - Summarize each result set before showing raw rows.\n\
         - If a query is missing for the question at hand, suggest the query \
           authoring workflow instead of improvising.",
    );
    if let Some(focus) = focus {
        text.push_str(&format!(
            "\n\nThe user wants to explore: \"{focus}\". Start with queries whose tags \
             or descriptions match that area."
        ));
    }
    text
}

/// Builds the query authoring walkthrough.
fn query_authoring(task: Option<&str>) -> String {
    let mut text = String::from(
        "You are helping a user draft a new entry for the Query Gate registry. \
         Registry changes are an administrative act: your output is a proposal for \
         review, never something you can install yourself. Produce:\n\n\
         1. A short slug-style name and one-sentence description.\n\
         2. The SQL text using named bind placeholders (for example :customer_id) \
            for every caller-supplied value. Never interpolate values into the text.\n\
         3. A parameter schema: for each placeholder give name, type (number, text, \
            date, or timestamp), required flag, optional allowed values, optional \
            default, and whether the value is sensitive.\n\
         4. The statement kind: read for SELECT-only text, mutating for anything \
            that changes data.\n\
         5. Suggested tags for discovery.\n\n\
         ## Guidelines\n\
         - Check `queries_list` first; prefer extending coverage over duplicating \
           an existing query.\n\
         - Keep the statement to one purpose; two questions mean two entries.\n\
         - Mark anything resembling identifiers, tax numbers, or account numbers as \
           sensitive.",
    );
    if let Some(task) = task {
        text.push_str(&format!("\n\nThe query to draft should answer: \"{task}\"."));
    }
    text
}

/// Builds the audit review walkthrough.
fn audit_review(time_range: Option<&str>, query_name: Option<&str>) -> String {
    let label = match time_range {
        Some("1h") => "1 hour",
        Some("7d") => "7 days",
        Some("30d") => "30 days",
        _ => "24 hours",
    };
    let mut text = format!(
        "You are reviewing query execution audit data for the past {label}. Query \
         Gate logs every invocation to the query_audit_log table and to the audit \
         log file. Use the audit-focused queries in the registry to surface \
         insights. Follow these steps:\n\n\
         ## Step 1 - Error rate\n\
         Look for executions with status ERROR and group them by query name and \
         error text. A spike on one query usually means a caller is passing bad \
         parameter values.\n\n\
         ## Step 2 - Volume and latency\n\
         Identify the most-run queries and any with unusually high duration_ms. \
         Flag queries that routinely hit the row cap (row_count at the ceiling).\n\n\
         ## Step 3 - Summarize\n\
         Present a short report: top queries by volume, error hotspots, and any \
         slow outliers, with one suggested follow-up action each.\n\n\
         ## Guidelines\n\
         - Audit parameters may be masked on upper tiers; never ask for the \
           unmasked values.\n\
         - Treat caller identities as opaque labels.",
    );
    if let Some(query_name) = query_name {
        text.push_str(&format!(
            "\n\nThe user wants to focus specifically on query: `{query_name}`. When \
             reviewing results, filter or highlight rows matching this query name."
        ));
    }
    text
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Prompt rendering errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PromptError {
    /// The prompt name is not part of the canonical surface.
    #[error("unknown prompt")]
    UnknownPrompt,
}

// ============================================================================
// SECTION: Tests
// ============================================================================
