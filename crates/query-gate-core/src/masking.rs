// crates/query-gate-core/src/masking.rs
// ============================================================================
// Module: Masking Policy
// Description: Tier-conditioned redaction of sensitive parameter values.
// Purpose: Keep sensitive values out of audit records on upper tiers.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Masking applies only to the audit path: parameters flagged sensitive are
//! replaced with a fixed marker on upper deployment tiers, while lower tiers
//! pass values through to aid debugging. The deployment tier is threaded in
//! as an explicit argument, never read from ambient process state, and the
//! bound values handed to the executor are never altered.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::registry::ParameterSpec;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Fixed redaction marker stored in place of sensitive values.
pub const MASKED_VALUE: &str = "***MASKED***";

// ============================================================================
// SECTION: Environment
// ============================================================================

/// Deployment tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    /// Developer workstation.
    #[default]
    Local,
    /// Shared development tier.
    Dev,
    /// System integration testing tier.
    Sit,
    /// User acceptance testing tier; masked.
    Uat,
    /// Production tier; masked.
    Prod,
}

impl Environment {
    /// Returns true on tiers where sensitive values are redacted.
    #[must_use]
    pub const fn masks_sensitive_values(self) -> bool {
        matches!(self, Self::Uat | Self::Prod)
    }

    /// Returns a stable label for logs and config errors.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Dev => "dev",
            Self::Sit => "sit",
            Self::Uat => "uat",
            Self::Prod => "prod",
        }
    }
}

// ============================================================================
// SECTION: Masking
// ============================================================================

/// Returns a copy of the display map safe for audit logging.
///
/// Non-sensitive parameters are never masked; sensitive ones are replaced
/// with [`MASKED_VALUE`] only on tiers where
/// [`Environment::masks_sensitive_values`] holds.
#[must_use]
pub fn mask_parameters(
    values: &BTreeMap<String, Value>,
    schema: &[ParameterSpec],
    environment: Environment,
) -> BTreeMap<String, Value> {
    if !environment.masks_sensitive_values() {
        return values.clone();
    }
    values
        .iter()
        .map(|(name, value)| {
            let sensitive =
                schema.iter().any(|spec| spec.sensitive && spec.name == *name);
            let display = if sensitive {
                Value::String(MASKED_VALUE.to_string())
            } else {
                value.clone()
            };
            (name.clone(), display)
        })
        .collect()
}

// ============================================================================
// SECTION: Tests
// ============================================================================
