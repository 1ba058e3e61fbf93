// crates/query-gate-core/src/lib.rs
// ============================================================================
// Module: Query Gate Core
// Description: Registry model, validation pipeline, and gateway runtime.
// Purpose: Execute named, pre-approved statements for untrusted callers.
// Dependencies: serde, serde_json, thiserror, time, tokio
// ============================================================================

//! ## Overview
//! Query Gate Core implements the request pipeline for a closed statement
//! catalog: resolve a name to the single active versioned definition,
//! validate and coerce caller-supplied values against the declared parameter
//! schema, enforce the mutation-confirmation and row-cap gates, execute
//! through a bind-by-name adapter, and record every outcome to independent
//! audit channels without ever letting audit affect the caller's result.
//! Store and transport collaborators plug in behind the
//! [`QueryRegistry`], [`QueryExecutor`], and [`AuditChannel`] seams.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod audit;
pub mod execution;
pub mod gateway;
pub mod guard;
pub mod masking;
pub mod params;
pub mod registry;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use audit::AuditChannel;
pub use audit::AuditChannelError;
pub use audit::AuditRecord;
pub use audit::AuditRecordParams;
pub use audit::AuditStatus;
pub use audit::NoopWarningSink;
pub use audit::WarningEvent;
pub use audit::WarningSink;
pub use audit::dispatch_audit;
pub use execution::ExecutionError;
pub use execution::QueryExecutor;
pub use execution::StatementOutcome;
pub use gateway::GatewayError;
pub use gateway::QueryGateway;
pub use gateway::QueryGatewayConfig;
pub use gateway::RunRequest;
pub use guard::DEFAULT_HARD_MAX_ROWS;
pub use guard::DEFAULT_ROW_CAP;
pub use guard::ExecutionOptions;
pub use guard::GuardError;
pub use guard::RowCapPolicy;
pub use guard::guard_request;
pub use masking::Environment;
pub use masking::MASKED_VALUE;
pub use masking::mask_parameters;
pub use params::BoundParameters;
pub use params::ParamValue;
pub use params::ValidationError;
pub use params::coerce_value;
pub use params::validate_parameters;
pub use registry::ParamType;
pub use registry::ParameterSpec;
pub use registry::QueryDefinition;
pub use registry::QueryName;
pub use registry::QueryRegistry;
pub use registry::QuerySummary;
pub use registry::RegistryError;
pub use registry::StatementKind;
pub use registry::TagFilter;
