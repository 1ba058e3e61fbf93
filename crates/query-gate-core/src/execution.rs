// crates/query-gate-core/src/execution.rs
// ============================================================================
// Module: Execution Adapter Seam
// Description: Bind-by-name execution primitive provided by the store.
// Purpose: Run one validated statement; own no validation logic.
// Dependencies: serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! The execution adapter is the seam to the relational store: it binds
//! validated parameters strictly by name (never positionally, never through
//! string interpolation), applies the row cap at fetch time, and wraps any
//! store-level fault into a single store-agnostic error. The original store
//! detail travels alongside for the warning log but is never structurally
//! required by callers.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use thiserror::Error;

use crate::params::BoundParameters;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Result of one statement execution.
///
/// # Invariants
/// - `rows.len() == row_count` and never exceeds the requested cap.
/// - `truncated` is true only when the store had at least one more row.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatementOutcome {
    /// Result column names in select order; empty for statements returning
    /// no rows.
    pub columns: Vec<String>,
    /// Result rows keyed by column name.
    pub rows: Vec<Map<String, Value>>,
    /// True number of rows returned (post-cap).
    pub row_count: u64,
    /// Whether the row cap cut the result short.
    pub truncated: bool,
}

// ============================================================================
// SECTION: Executor Trait
// ============================================================================

/// Bind-by-name execution primitive.
pub trait QueryExecutor: Send + Sync {
    /// Executes the statement with the given binds and row cap.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError`] for any store-level fault; the message is
    /// store-agnostic and the detail is preserved for logging only.
    fn execute(
        &self,
        sql_text: &str,
        parameters: &BoundParameters,
        row_cap: u64,
    ) -> Result<StatementOutcome, ExecutionError>;
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Store-agnostic execution failure.
#[derive(Debug, Error, Clone)]
#[error("{message}")]
pub struct ExecutionError {
    /// Store-agnostic message surfaced to callers.
    pub message: String,
    /// Underlying store detail, logged but never surfaced.
    pub detail: String,
}

impl ExecutionError {
    /// Wraps a store fault with the standard caller-facing message.
    #[must_use]
    pub fn store_fault(detail: impl Into<String>) -> Self {
        Self {
            message: "statement execution failed".to_string(),
            detail: detail.into(),
        }
    }
}
