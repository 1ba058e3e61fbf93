// crates/query-gate-core/src/params.rs
// ============================================================================
// Module: Parameter Validation and Coercion
// Description: Type-checks caller-supplied values against a declared schema.
// Purpose: Produce bind-safe values; reject anything undeclared or malformed.
// Dependencies: serde_json, thiserror, time
// ============================================================================

//! ## Overview
//! Validation is the SQL-injection containment boundary: only declared,
//! typed binds ever reach a statement. Each [`crate::registry::ParamType`]
//! variant has exactly one coercion arm, and validation is all-or-nothing:
//! the first failure aborts the request and callers never receive partial
//! bindings. Output preserves schema order for deterministic binding.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde_json::Number;
use serde_json::Value;
use thiserror::Error;
use time::Date;
use time::OffsetDateTime;
use time::PrimitiveDateTime;
use time::format_description::BorrowedFormatItem;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;

use crate::registry::ParamType;
use crate::registry::ParameterSpec;

// ============================================================================
// SECTION: Formats
// ============================================================================

/// Calendar date wire format (`YYYY-MM-DD`).
const DATE_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Offset-free date-time wire format accepted for timestamps.
const LOCAL_DATETIME_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");

// ============================================================================
// SECTION: Values
// ============================================================================

/// A coerced, type-correct bind value.
///
/// # Invariants
/// - Instances exist only downstream of a successful coercion; the executor
///   never sees raw caller input.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    /// Whole number, bound as an integer.
    Integer(i64),
    /// Decimal number, bound as a float.
    Float(f64),
    /// Plain text.
    Text(String),
    /// Calendar date.
    Date(Date),
    /// Point in time with UTC offset.
    Timestamp(OffsetDateTime),
}

impl ParamValue {
    /// Returns the display form used in audit records and error messages.
    #[must_use]
    pub fn display_value(&self) -> Value {
        match self {
            Self::Integer(value) => Value::Number(Number::from(*value)),
            Self::Float(value) => {
                Number::from_f64(*value).map_or(Value::Null, Value::Number)
            }
            Self::Text(value) => Value::String(value.clone()),
            Self::Date(value) => {
                value.format(DATE_FORMAT).map_or(Value::Null, Value::String)
            }
            Self::Timestamp(value) => {
                value.format(&Rfc3339).map_or(Value::Null, Value::String)
            }
        }
    }
}

/// Ordered, validated bind set consumed exactly once by the executor.
///
/// # Invariants
/// - Entries appear in schema order.
/// - Optional parameters without a supplied value or default are absent,
///   leaving the corresponding bind unset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundParameters {
    /// Bind entries in schema order.
    entries: Vec<(String, ParamValue)>,
}

impl BoundParameters {
    /// Returns the bind entries in schema order.
    #[must_use]
    pub fn entries(&self) -> &[(String, ParamValue)] {
        &self.entries
    }

    /// Returns the number of bound parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when no parameter is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up a bound value by parameter name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.entries.iter().find(|(entry, _)| entry == name).map(|(_, value)| value)
    }

    /// Returns the display map fed to masking and audit records.
    #[must_use]
    pub fn display_map(&self) -> BTreeMap<String, Value> {
        self.entries
            .iter()
            .map(|(name, value)| (name.clone(), value.display_value()))
            .collect()
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Parameter validation errors.
///
/// # Invariants
/// - Every variant names the offending parameter; validation never partially
///   applies and is never retried by the gateway.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A required parameter was omitted.
    #[error("missing required parameter: {name}")]
    MissingParameter {
        /// The omitted parameter name.
        name: String,
    },
    /// A value could not be coerced to its declared type.
    #[error("parameter {name} expects {expected}, got {got}")]
    TypeMismatch {
        /// The offending parameter name.
        name: String,
        /// Stable label of the declared type.
        expected: &'static str,
        /// Short description of the rejected input.
        got: String,
    },
    /// A value fell outside the declared closed set.
    #[error("parameter {name} value {value} is not in the allowed set")]
    DisallowedValue {
        /// The offending parameter name.
        name: String,
        /// Display form of the rejected value.
        value: String,
    },
    /// The caller supplied a parameter absent from the schema.
    #[error("unknown parameter: {name}")]
    UnknownParameter {
        /// The undeclared parameter name.
        name: String,
    },
}

// ============================================================================
// SECTION: Validation
// ============================================================================

/// Validates and coerces raw caller values against the declared schema.
///
/// Unknown keys are rejected before any other processing so undeclared input
/// never flows through coercion. The remaining checks run per
/// [`ParameterSpec`] in schema order: required/default substitution, type
/// coercion, then the closed allowed-value set.
///
/// # Errors
///
/// Returns the first [`ValidationError`] encountered; on error no binding is
/// produced.
pub fn validate_parameters(
    schema: &[ParameterSpec],
    raw: &BTreeMap<String, Value>,
) -> Result<BoundParameters, ValidationError> {
    for name in raw.keys() {
        if !schema.iter().any(|spec| spec.name == *name) {
            return Err(ValidationError::UnknownParameter {
                name: name.clone(),
            });
        }
    }

    let mut entries = Vec::with_capacity(schema.len());
    for spec in schema {
        let Some(value) = raw.get(&spec.name) else {
            if spec.required {
                return Err(ValidationError::MissingParameter {
                    name: spec.name.clone(),
                });
            }
            if let Some(default) = &spec.default {
                let coerced = coerce_value(&spec.name, default, spec.param_type)?;
                entries.push((spec.name.clone(), coerced));
            }
            continue;
        };
        let coerced = coerce_value(&spec.name, value, spec.param_type)?;
        if let Some(allowed) = &spec.allowed_values {
            ensure_allowed(&spec.name, &coerced, allowed, spec.param_type)?;
        }
        entries.push((spec.name.clone(), coerced));
    }

    Ok(BoundParameters {
        entries,
    })
}

/// Checks a coerced value against the declared closed set.
///
/// Allowed entries are coerced through the same per-type arm as caller
/// values; an entry that fails coercion simply never matches, so malformed
/// registry data fails closed.
fn ensure_allowed(
    name: &str,
    value: &ParamValue,
    allowed: &[Value],
    param_type: ParamType,
) -> Result<(), ValidationError> {
    let matched = allowed
        .iter()
        .filter_map(|candidate| coerce_value(name, candidate, param_type).ok())
        .any(|candidate| candidate == *value);
    if matched {
        Ok(())
    } else {
        Err(ValidationError::DisallowedValue {
            name: name.to_string(),
            value: value.display_value().to_string(),
        })
    }
}

// ============================================================================
// SECTION: Coercion
// ============================================================================

/// Coerces a single raw value to its declared type.
///
/// # Errors
///
/// Returns [`ValidationError::TypeMismatch`] naming the parameter and the
/// expected type when the value cannot be represented.
pub fn coerce_value(
    name: &str,
    value: &Value,
    param_type: ParamType,
) -> Result<ParamValue, ValidationError> {
    match param_type {
        ParamType::Number => coerce_number(name, value),
        ParamType::Text => coerce_text(name, value),
        ParamType::Date => coerce_date(name, value),
        ParamType::Timestamp => coerce_timestamp(name, value),
    }
}

/// Coerces integer/decimal textual or native numeric forms.
fn coerce_number(name: &str, value: &Value) -> Result<ParamValue, ValidationError> {
    match value {
        // JSON booleans are numbers to some serializers; never accept them.
        Value::Bool(_) => Err(mismatch(name, ParamType::Number, "a boolean")),
        Value::Number(number) => number.as_i64().map_or_else(
            || {
                number
                    .as_f64()
                    .map(ParamValue::Float)
                    .ok_or_else(|| mismatch(name, ParamType::Number, "an unrepresentable number"))
            },
            |whole| Ok(ParamValue::Integer(whole)),
        ),
        Value::String(text) => {
            let trimmed = text.trim();
            if let Ok(whole) = trimmed.parse::<i64>() {
                return Ok(ParamValue::Integer(whole));
            }
            trimmed
                .parse::<f64>()
                .ok()
                .filter(|parsed| parsed.is_finite())
                .map(ParamValue::Float)
                .ok_or_else(|| mismatch(name, ParamType::Number, &format!("the string \"{text}\"")))
        }
        other => Err(mismatch(name, ParamType::Number, kind_label(other))),
    }
}

/// Coerces textual values, rejecting structural input.
fn coerce_text(name: &str, value: &Value) -> Result<ParamValue, ValidationError> {
    match value {
        Value::String(text) => Ok(ParamValue::Text(text.clone())),
        other => Err(mismatch(name, ParamType::Text, kind_label(other))),
    }
}

/// Coerces an unambiguous `YYYY-MM-DD` calendar date.
fn coerce_date(name: &str, value: &Value) -> Result<ParamValue, ValidationError> {
    match value {
        Value::String(text) => Date::parse(text.trim(), DATE_FORMAT)
            .map(ParamValue::Date)
            .map_err(|_| mismatch(name, ParamType::Date, &format!("the string \"{text}\""))),
        other => Err(mismatch(name, ParamType::Date, kind_label(other))),
    }
}

/// Coerces an RFC 3339 date-time, tolerating an offset-free form read as UTC.
fn coerce_timestamp(name: &str, value: &Value) -> Result<ParamValue, ValidationError> {
    match value {
        Value::String(text) => {
            let trimmed = text.trim();
            if let Ok(parsed) = OffsetDateTime::parse(trimmed, &Rfc3339) {
                return Ok(ParamValue::Timestamp(parsed));
            }
            PrimitiveDateTime::parse(trimmed, LOCAL_DATETIME_FORMAT)
                .map(|parsed| ParamValue::Timestamp(parsed.assume_utc()))
                .map_err(|_| mismatch(name, ParamType::Timestamp, &format!("the string \"{text}\"")))
        }
        other => Err(mismatch(name, ParamType::Timestamp, kind_label(other))),
    }
}

/// Builds a type mismatch error for a parameter.
fn mismatch(name: &str, expected: ParamType, got: &str) -> ValidationError {
    ValidationError::TypeMismatch {
        name: name.to_string(),
        expected: expected.label(),
        got: got.to_string(),
    }
}

/// Returns a short JSON kind label for mismatch messages.
fn kind_label(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
