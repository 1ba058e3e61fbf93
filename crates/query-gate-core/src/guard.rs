// crates/query-gate-core/src/guard.rs
// ============================================================================
// Module: Execution Guard
// Description: Pre-execution gates for mutation confirmation and row caps.
// Purpose: Block unconfirmed mutations and unbounded result sizes.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! The guard encodes the two independently-reasoned safety gates as one
//! explicit step before anything touches the store: a mutating statement runs
//! only when the caller opts in on a second, informed pass, and every run
//! carries a bounded row cap. Nothing else belongs here; parameter
//! correctness is the validator's job.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::registry::QueryDefinition;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Hard ceiling no request may exceed, regardless of what it asks for.
pub const DEFAULT_HARD_MAX_ROWS: u64 = 2_000;
/// Ceiling applied when the caller does not request a row cap.
pub const DEFAULT_ROW_CAP: u64 = 500;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Caller-supplied execution options for a single run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionOptions {
    /// Requested row cap; `None` selects the policy default.
    pub max_rows: Option<i64>,
    /// Explicit opt-in required for mutating statements. Never inferred from
    /// the mere presence of a mutating query name.
    pub confirm_mutation: bool,
}

/// Row cap policy for the deployment.
///
/// # Invariants
/// - `1 <= default_cap <= hard_max`; enforced by [`RowCapPolicy::validate`]
///   at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowCapPolicy {
    /// Hard ceiling for any request.
    pub hard_max: u64,
    /// Ceiling applied when the caller omits `max_rows`.
    pub default_cap: u64,
}

impl Default for RowCapPolicy {
    fn default() -> Self {
        Self {
            hard_max: DEFAULT_HARD_MAX_ROWS,
            default_cap: DEFAULT_ROW_CAP,
        }
    }
}

impl RowCapPolicy {
    /// Checks policy bounds.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::InvalidPolicy`] when the bounds are unusable.
    pub fn validate(&self) -> Result<(), GuardError> {
        if self.hard_max == 0 || self.default_cap == 0 {
            return Err(GuardError::InvalidPolicy(
                "row caps must be greater than zero".to_string(),
            ));
        }
        if self.default_cap > self.hard_max {
            return Err(GuardError::InvalidPolicy(format!(
                "default row cap {} exceeds hard maximum {}",
                self.default_cap, self.hard_max
            )));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Guard
// ============================================================================

/// Applies both safety gates and returns the effective row cap.
///
/// # Errors
///
/// Returns [`GuardError::ConfirmationRequired`] for an unconfirmed mutating
/// statement and [`GuardError::InvalidRowCap`] for a non-positive request.
pub fn guard_request(
    definition: &QueryDefinition,
    options: &ExecutionOptions,
    policy: &RowCapPolicy,
) -> Result<u64, GuardError> {
    if definition.statement_kind.is_mutating() && !options.confirm_mutation {
        return Err(GuardError::ConfirmationRequired {
            name: definition.name.to_string(),
        });
    }
    match options.max_rows {
        None => Ok(policy.default_cap.min(policy.hard_max)),
        Some(requested) if requested <= 0 => Err(GuardError::InvalidRowCap {
            requested,
        }),
        Some(requested) => Ok(u64::try_from(requested).unwrap_or(u64::MAX).min(policy.hard_max)),
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Guard rejections, distinguishable from validation errors so callers can
/// retry with corrected options.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GuardError {
    /// A mutating statement was requested without explicit confirmation.
    #[error("query {name} is mutating; set confirm_mutation to run it")]
    ConfirmationRequired {
        /// The mutating query name.
        name: String,
    },
    /// The requested row cap is not positive.
    #[error("max_rows must be greater than zero, got {requested}")]
    InvalidRowCap {
        /// The rejected requested value.
        requested: i64,
    },
    /// The configured row cap policy is unusable.
    #[error("invalid row cap policy: {0}")]
    InvalidPolicy(String),
}

// ============================================================================
// SECTION: Tests
// ============================================================================
