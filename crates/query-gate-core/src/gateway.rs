// crates/query-gate-core/src/gateway.rs
// ============================================================================
// Module: Gateway Pipeline Runtime
// Description: Orchestrates lookup, validation, guarding, execution, audit.
// Purpose: Run one pre-approved statement per call with full auditing.
// Dependencies: serde_json, thiserror, tokio
// ============================================================================

//! ## Overview
//! The gateway wires the pipeline over its collaborator seams: registry
//! lookup → parameter validation → execution guard → execution adapter, with
//! masking and dual-channel audit riding alongside the result path. The
//! pipeline runs on the calling task; store I/O moves to the blocking pool.
//! The execution-plus-audit tail runs inside a spawned task so that a caller
//! that disappears mid-statement never tears down a mutating statement: the
//! statement runs to completion and the audit fires with the real outcome.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use thiserror::Error;

use crate::audit::AuditChannel;
use crate::audit::AuditRecord;
use crate::audit::AuditRecordParams;
use crate::audit::AuditStatus;
use crate::audit::WarningEvent;
use crate::audit::WarningSink;
use crate::audit::dispatch_audit;
use crate::execution::ExecutionError;
use crate::execution::QueryExecutor;
use crate::execution::StatementOutcome;
use crate::guard::ExecutionOptions;
use crate::guard::GuardError;
use crate::guard::RowCapPolicy;
use crate::guard::guard_request;
use crate::masking::Environment;
use crate::masking::mask_parameters;
use crate::params::ValidationError;
use crate::params::validate_parameters;
use crate::registry::QueryDefinition;
use crate::registry::QueryName;
use crate::registry::QueryRegistry;
use crate::registry::QuerySummary;
use crate::registry::RegistryError;
use crate::registry::TagFilter;

// ============================================================================
// SECTION: Request Types
// ============================================================================

/// One gateway invocation, constructed and discarded within a single call.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Requested query name.
    pub name: QueryName,
    /// Raw caller-supplied parameter values.
    pub parameters: BTreeMap<String, Value>,
    /// Caller execution options.
    pub options: ExecutionOptions,
    /// Opaque caller identity from the transport collaborator.
    pub caller_id: Option<String>,
}

// ============================================================================
// SECTION: Gateway
// ============================================================================

/// Gateway pipeline over the collaborator seams.
#[derive(Clone)]
pub struct QueryGateway {
    /// Versioned statement catalog.
    registry: Arc<dyn QueryRegistry>,
    /// Bind-by-name execution adapter.
    executor: Arc<dyn QueryExecutor>,
    /// Independent audit channels (file, store).
    audit_channels: Vec<Arc<dyn AuditChannel>>,
    /// Non-propagating sink for downgraded failures.
    warnings: Arc<dyn WarningSink>,
    /// Deployment tier driving the masking policy.
    environment: Environment,
    /// Row cap policy for the deployment.
    row_caps: RowCapPolicy,
}

/// Configuration inputs for building a gateway.
pub struct QueryGatewayConfig {
    /// Versioned statement catalog.
    pub registry: Arc<dyn QueryRegistry>,
    /// Bind-by-name execution adapter.
    pub executor: Arc<dyn QueryExecutor>,
    /// Independent audit channels (file, store).
    pub audit_channels: Vec<Arc<dyn AuditChannel>>,
    /// Non-propagating sink for downgraded failures.
    pub warnings: Arc<dyn WarningSink>,
    /// Deployment tier driving the masking policy.
    pub environment: Environment,
    /// Row cap policy for the deployment.
    pub row_caps: RowCapPolicy,
}

impl QueryGateway {
    /// Creates a new gateway.
    #[must_use]
    pub fn new(config: QueryGatewayConfig) -> Self {
        Self {
            registry: config.registry,
            executor: config.executor,
            audit_channels: config.audit_channels,
            warnings: config.warnings,
            environment: config.environment,
            row_caps: config.row_caps,
        }
    }

    /// Lists active definitions, optionally filtered by tags.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when the registry store fails.
    pub async fn list(
        &self,
        filter: Option<TagFilter>,
    ) -> Result<Vec<QuerySummary>, GatewayError> {
        let registry = Arc::clone(&self.registry);
        let summaries = tokio::task::spawn_blocking(move || {
            registry.list_active(filter.as_ref())
        })
        .await
        .map_err(|_| GatewayError::Internal("registry list task failed".to_string()))??;
        Ok(summaries)
    }

    /// Returns the full active definition for a name.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] for unknown names or registry faults.
    pub async fn describe(&self, name: &QueryName) -> Result<QueryDefinition, GatewayError> {
        self.resolve(name.clone()).await
    }

    /// Runs one pre-approved statement through the full pipeline.
    ///
    /// Every invocation that resolves a definition produces exactly one
    /// audit record, on the success path and every error path alike.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] for resolution, validation, guard, and
    /// execution failures. Audit channel failures never surface here.
    pub async fn run(&self, request: RunRequest) -> Result<StatementOutcome, GatewayError> {
        let definition = self.resolve(request.name.clone()).await?;
        let started = Instant::now();

        let bound = match validate_parameters(&definition.parameters, &request.parameters) {
            Ok(bound) => bound,
            Err(error) => {
                // Audit the raw display values; no binding exists yet.
                let masked = mask_parameters(
                    &request.parameters,
                    &definition.parameters,
                    self.environment,
                );
                self.audit_error(&definition, masked, &request, started, error.to_string());
                return Err(error.into());
            }
        };

        let row_cap = match guard_request(&definition, &request.options, &self.row_caps) {
            Ok(row_cap) => row_cap,
            Err(error) => {
                let masked = mask_parameters(
                    &bound.display_map(),
                    &definition.parameters,
                    self.environment,
                );
                self.audit_error(&definition, masked, &request, started, error.to_string());
                return Err(error.into());
            }
        };

        let masked =
            mask_parameters(&bound.display_map(), &definition.parameters, self.environment);
        let executor = Arc::clone(&self.executor);
        let channels = self.audit_channels.clone();
        let warnings = Arc::clone(&self.warnings);
        let caller_id = request.caller_id.clone();
        let sql_text = definition.sql_text.clone();
        let query_name = definition.name.to_string();
        let query_version = definition.version;

        // The tail task owns execution and audit: dropping the caller's
        // future past this point cannot cancel a statement mid-flight, and
        // the audit still fires with whatever outcome resulted.
        let tail = tokio::spawn(async move {
            let execution = tokio::task::spawn_blocking(move || {
                executor.execute(&sql_text, &bound, row_cap)
            })
            .await
            .map_err(|_| ExecutionError::store_fault("execution task failed"))
            .and_then(|result| result);

            let (status, error, row_count) = match &execution {
                Ok(outcome) => (AuditStatus::Success, None, outcome.row_count),
                Err(error) => {
                    warnings.warn(&WarningEvent::new(
                        "execution_failure",
                        format!("query {query_name}: {}", error.detail),
                    ));
                    (AuditStatus::Error, Some(error.message.clone()), 0)
                }
            };
            let duration_ms = duration_millis(started);
            let record = AuditRecord::new(AuditRecordParams {
                query_name,
                query_version,
                parameters: masked,
                status,
                error,
                row_count,
                duration_ms,
                caller_id,
            });
            dispatch_audit(&channels, &warnings, record);
            execution
        });

        let outcome = tail
            .await
            .map_err(|_| GatewayError::Internal("execution tail task failed".to_string()))??;
        Ok(outcome)
    }

    /// Resolves the active definition, logging integrity faults loudly.
    async fn resolve(&self, name: QueryName) -> Result<QueryDefinition, GatewayError> {
        let registry = Arc::clone(&self.registry);
        let resolved = tokio::task::spawn_blocking(move || registry.resolve_active(&name))
            .await
            .map_err(|_| GatewayError::Internal("registry task failed".to_string()))?;
        match resolved {
            Ok(definition) => Ok(definition),
            Err(error) => {
                if matches!(error, RegistryError::Integrity(_)) {
                    self.warnings
                        .warn(&WarningEvent::new("registry_integrity_fault", error.to_string()));
                }
                Err(error.into())
            }
        }
    }

    /// Emits the single audit record for a pre-execution failure.
    fn audit_error(
        &self,
        definition: &QueryDefinition,
        masked: BTreeMap<String, Value>,
        request: &RunRequest,
        started: Instant,
        detail: String,
    ) {
        let record = AuditRecord::new(AuditRecordParams {
            query_name: definition.name.to_string(),
            query_version: definition.version,
            parameters: masked,
            status: AuditStatus::Error,
            error: Some(detail),
            row_count: 0,
            duration_ms: duration_millis(started),
            caller_id: request.caller_id.clone(),
        });
        dispatch_audit(&self.audit_channels, &self.warnings, record);
    }
}

/// Returns elapsed milliseconds since `started`, saturating.
fn duration_millis(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Gateway pipeline errors.
///
/// # Invariants
/// - Audit channel failures never appear here; they are downgraded to
///   warnings inside the dispatcher.
#[derive(Debug, Error, Clone)]
pub enum GatewayError {
    /// Registry resolution failed (unknown name or integrity fault).
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// Parameter validation failed; never retried, never partially applied.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The request was rejected by a safety gate.
    #[error(transparent)]
    Guard(#[from] GuardError),
    /// The statement failed at the store; not retried automatically.
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    /// Internal runtime failure.
    #[error("internal gateway error: {0}")]
    Internal(String),
}
