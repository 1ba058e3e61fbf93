// crates/query-gate-core/src/registry.rs
// ============================================================================
// Module: Query Registry Model
// Description: Versioned, immutable definitions of pre-approved statements.
// Purpose: Resolve query names to the single active definition per name.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! The registry is the authoritative, versioned catalog of approved SQL
//! statements and their parameter schemas. Definitions are append-only values
//! keyed by `(name, version)`: a change creates a new version and deactivates
//! the prior one, and exactly one version per name may be active at a time.
//! The core only reads definitions; persistence is owned by the store
//! collaborator behind [`QueryRegistry`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Identifier Types
// ============================================================================

/// Stable slug identifying a registered query across versions.
///
/// # Invariants
/// - Opaque UTF-8 string; no normalization is applied by this type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryName(String);

impl QueryName {
    /// Creates a new query name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for QueryName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for QueryName {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

// ============================================================================
// SECTION: Definition Types
// ============================================================================

/// Statement classification driving the mutation confirmation guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    /// Read-only statement; runs without confirmation.
    Read,
    /// Data-modifying statement; requires explicit caller confirmation.
    Mutating,
}

impl StatementKind {
    /// Returns true for statements that modify data.
    #[must_use]
    pub const fn is_mutating(self) -> bool {
        matches!(self, Self::Mutating)
    }

    /// Returns a stable label for storage and error messages.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Mutating => "mutating",
        }
    }
}

/// Declared bind parameter type.
///
/// # Invariants
/// - This enum is closed: each variant has exactly one coercion function in
///   [`crate::params`], and extension happens only by adding a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    /// Integer or decimal numeric value.
    Number,
    /// Plain textual value; structural values are rejected.
    Text,
    /// Calendar date (`YYYY-MM-DD`).
    Date,
    /// Point in time (RFC 3339 date-time).
    Timestamp,
}

impl ParamType {
    /// Returns a stable label for storage and error messages.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Number => "number",
            Self::Text => "text",
            Self::Date => "date",
            Self::Timestamp => "timestamp",
        }
    }
}

/// Declared bind parameter within a query definition.
///
/// # Invariants
/// - `name` is unique within the owning definition.
/// - Required parameters never carry a default; [`QueryDefinition::ensure_integrity`]
///   rejects rows that would mask a missing value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Bind parameter name, unique within the definition.
    pub name: String,
    /// Declared parameter type.
    #[serde(rename = "type")]
    pub param_type: ParamType,
    /// Whether the caller must supply a value.
    #[serde(default = "default_required")]
    pub required: bool,
    /// Optional closed set of acceptable values, in raw registry form.
    #[serde(default)]
    pub allowed_values: Option<Vec<Value>>,
    /// Optional default in raw registry form, used only when `required` is
    /// false and the caller omits the value.
    #[serde(default)]
    pub default: Option<Value>,
    /// Whether the value is redacted in audit records on upper tiers.
    #[serde(default)]
    pub sensitive: bool,
}

/// Returns the default for [`ParameterSpec::required`].
const fn default_required() -> bool {
    true
}

/// Immutable definition of a pre-approved statement.
///
/// # Invariants
/// - `sql_text` never changes once created; a change is a new version.
/// - Binds in `sql_text` are named placeholders covered by `parameters`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDefinition {
    /// Stable query slug.
    pub name: QueryName,
    /// Monotonic version number within the name.
    pub version: i64,
    /// Human-readable description of what the statement does.
    pub description: String,
    /// The approved SQL text with named bind placeholders.
    pub sql_text: String,
    /// Ordered parameter schema; order is preserved into binding.
    pub parameters: Vec<ParameterSpec>,
    /// Statement classification.
    pub statement_kind: StatementKind,
    /// Discovery tags.
    pub tags: BTreeSet<String>,
}

impl QueryDefinition {
    /// Checks definition-level integrity invariants.
    ///
    /// Violations indicate corrupted or mis-authored registry rows, not
    /// caller mistakes, and are surfaced as [`RegistryError::Integrity`].
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Integrity`] when the version is not positive,
    /// a parameter name repeats, or a required parameter carries a default.
    pub fn ensure_integrity(&self) -> Result<(), RegistryError> {
        if self.version < 1 {
            return Err(RegistryError::Integrity(format!(
                "query {} has non-positive version {}",
                self.name, self.version
            )));
        }
        let mut seen = BTreeSet::new();
        for spec in &self.parameters {
            if !seen.insert(spec.name.as_str()) {
                return Err(RegistryError::Integrity(format!(
                    "query {} declares parameter {} more than once",
                    self.name, spec.name
                )));
            }
            if spec.required && spec.default.is_some() {
                return Err(RegistryError::Integrity(format!(
                    "query {} parameter {} is required but carries a default",
                    self.name, spec.name
                )));
            }
        }
        Ok(())
    }

    /// Builds the discovery summary for this definition.
    #[must_use]
    pub fn summary(&self) -> QuerySummary {
        QuerySummary {
            name: self.name.clone(),
            version: self.version,
            description: self.description.clone(),
            statement_kind: self.statement_kind,
            parameters: self.parameters.clone(),
            tags: self.tags.clone(),
        }
    }
}

/// Discovery view of a definition, omitting the SQL text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySummary {
    /// Stable query slug.
    pub name: QueryName,
    /// Active version number.
    pub version: i64,
    /// Human-readable description.
    pub description: String,
    /// Statement classification.
    pub statement_kind: StatementKind,
    /// Ordered parameter schema.
    pub parameters: Vec<ParameterSpec>,
    /// Discovery tags.
    pub tags: BTreeSet<String>,
}

// ============================================================================
// SECTION: Tag Filter
// ============================================================================

/// Tag filter for discovery listings.
///
/// Parsed from a comma-separated string; a summary matches when it carries at
/// least one of the requested tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagFilter {
    /// Requested tags, deduplicated.
    tags: BTreeSet<String>,
}

impl TagFilter {
    /// Parses a comma-separated tag list; returns `None` when no usable tag
    /// remains after trimming.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let tags: BTreeSet<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map(str::to_string)
            .collect();
        if tags.is_empty() {
            None
        } else {
            Some(Self {
                tags,
            })
        }
    }

    /// Returns true when the candidate tag set overlaps the filter.
    #[must_use]
    pub fn matches(&self, candidate: &BTreeSet<String>) -> bool {
        self.tags.iter().any(|tag| candidate.contains(tag))
    }
}

// ============================================================================
// SECTION: Registry Trait
// ============================================================================

/// Read-only lookup service over the versioned statement catalog.
pub trait QueryRegistry: Send + Sync {
    /// Resolves a name to its single active definition.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for unknown or inactive names and
    /// [`RegistryError::Integrity`] when zero-or-one-active is violated at
    /// the storage layer.
    fn resolve_active(&self, name: &QueryName) -> Result<QueryDefinition, RegistryError>;

    /// Lists all active definitions, optionally filtered by tags.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] when the underlying store fails.
    fn list_active(&self, filter: Option<&TagFilter>) -> Result<Vec<QuerySummary>, RegistryError>;
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Registry lookup errors.
///
/// # Invariants
/// - `Integrity` is a data fault, never a caller-input error; the lookup
///   never silently picks one of several active rows.
#[derive(Debug, Error, Clone)]
pub enum RegistryError {
    /// No active definition exists for the name.
    #[error("no active query named {name}")]
    NotFound {
        /// The unresolved query name.
        name: String,
    },
    /// The single-active-version invariant (or a definition-level invariant)
    /// is violated in storage.
    #[error("registry integrity fault: {0}")]
    Integrity(String),
    /// The underlying store failed.
    #[error("registry store error: {0}")]
    Store(String),
}

// ============================================================================
// SECTION: Tests
// ============================================================================
