// crates/query-gate-core/tests/pipeline.rs
// ============================================================================
// Module: Gateway Pipeline Tests
// Description: End-to-end pipeline behavior over fake collaborators.
// Purpose: Validate guard short-circuits, row caps, masking, and audit
//          durability with a spy execution adapter.
// ============================================================================

//! ## Overview
//! Pipeline-level tests over fake collaborator seams:
//! - The spy executor proves blocked requests never reach the store.
//! - Row caps clamp to the policy's hard maximum.
//! - Masking redacts audit values while execution sees real values.
//! - Audit channel failures never alter the caller-visible result.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use query_gate_core::AuditChannel;
use query_gate_core::AuditChannelError;
use query_gate_core::AuditRecord;
use query_gate_core::AuditStatus;
use query_gate_core::BoundParameters;
use query_gate_core::Environment;
use query_gate_core::ExecutionError;
use query_gate_core::ExecutionOptions;
use query_gate_core::GatewayError;
use query_gate_core::GuardError;
use query_gate_core::MASKED_VALUE;
use query_gate_core::ParamType;
use query_gate_core::ParamValue;
use query_gate_core::ParameterSpec;
use query_gate_core::QueryDefinition;
use query_gate_core::QueryExecutor;
use query_gate_core::QueryGateway;
use query_gate_core::QueryGatewayConfig;
use query_gate_core::QueryName;
use query_gate_core::QueryRegistry;
use query_gate_core::QuerySummary;
use query_gate_core::RegistryError;
use query_gate_core::RowCapPolicy;
use query_gate_core::RunRequest;
use query_gate_core::StatementKind;
use query_gate_core::StatementOutcome;
use query_gate_core::TagFilter;
use query_gate_core::ValidationError;
use query_gate_core::WarningEvent;
use query_gate_core::WarningSink;
use serde_json::Value;
use serde_json::json;

// ============================================================================
// SECTION: Fakes
// ============================================================================

/// In-memory registry over a fixed set of definitions.
struct FixedRegistry {
    definitions: Vec<QueryDefinition>,
}

impl QueryRegistry for FixedRegistry {
    fn resolve_active(&self, name: &QueryName) -> Result<QueryDefinition, RegistryError> {
        self.definitions
            .iter()
            .find(|definition| definition.name == *name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound {
                name: name.to_string(),
            })
    }

    fn list_active(&self, filter: Option<&TagFilter>) -> Result<Vec<QuerySummary>, RegistryError> {
        Ok(self
            .definitions
            .iter()
            .filter(|definition| {
                filter.is_none_or(|filter| filter.matches(&definition.tags))
            })
            .map(QueryDefinition::summary)
            .collect())
    }
}

/// One recorded executor call.
#[derive(Debug, Clone)]
struct ExecutorCall {
    bound: Vec<(String, ParamValue)>,
    row_cap: u64,
}

/// Spy executor that records calls and returns a canned result.
struct SpyExecutor {
    calls: Arc<Mutex<Vec<ExecutorCall>>>,
    rows_to_return: u64,
    fail: bool,
}

impl SpyExecutor {
    fn new(rows_to_return: u64) -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            rows_to_return,
            fail: false,
        }
    }

    fn call_count(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }

    fn calls(&self) -> Vec<ExecutorCall> {
        self.calls.lock().expect("calls lock").clone()
    }
}

impl QueryExecutor for SpyExecutor {
    fn execute(
        &self,
        _sql_text: &str,
        parameters: &BoundParameters,
        row_cap: u64,
    ) -> Result<StatementOutcome, ExecutionError> {
        self.calls.lock().expect("calls lock").push(ExecutorCall {
            bound: parameters.entries().to_vec(),
            row_cap,
        });
        if self.fail {
            return Err(ExecutionError::store_fault("simulated store outage"));
        }
        let returned = self.rows_to_return.min(row_cap);
        let rows = (0 .. returned)
            .map(|index| {
                let mut row = serde_json::Map::new();
                row.insert("id".to_string(), json!(index));
                row
            })
            .collect::<Vec<_>>();
        Ok(StatementOutcome {
            columns: vec!["id".to_string()],
            row_count: returned,
            truncated: self.rows_to_return > row_cap,
            rows,
        })
    }
}

/// Audit channel that collects records.
struct CollectingChannel {
    records: Arc<Mutex<Vec<AuditRecord>>>,
}

impl AuditChannel for CollectingChannel {
    fn name(&self) -> &'static str {
        "collecting"
    }

    fn record(&self, record: &AuditRecord) -> Result<(), AuditChannelError> {
        self.records.lock().expect("records lock").push(record.clone());
        Ok(())
    }
}

/// Audit channel that always fails, standing in for a store outage.
struct FailingChannel;

impl AuditChannel for FailingChannel {
    fn name(&self) -> &'static str {
        "store"
    }

    fn record(&self, _record: &AuditRecord) -> Result<(), AuditChannelError> {
        Err(AuditChannelError {
            channel: "store",
            detail: "audit table unavailable".to_string(),
        })
    }
}

/// Warning sink that collects events.
struct CollectingWarnings {
    events: Arc<Mutex<Vec<WarningEvent>>>,
}

impl WarningSink for CollectingWarnings {
    fn warn(&self, event: &WarningEvent) {
        self.events.lock().expect("events lock").push(event.clone());
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn number_spec(name: &str, sensitive: bool) -> ParameterSpec {
    ParameterSpec {
        name: name.to_string(),
        param_type: ParamType::Number,
        required: true,
        allowed_values: None,
        default: None,
        sensitive,
    }
}

fn definition(kind: StatementKind, parameters: Vec<ParameterSpec>) -> QueryDefinition {
    QueryDefinition {
        name: QueryName::new("active_orders"),
        version: 3,
        description: "Active orders for a customer".to_string(),
        sql_text: "SELECT id FROM orders WHERE customer_id = :customer_id".to_string(),
        parameters,
        statement_kind: kind,
        tags: BTreeSet::new(),
    }
}

struct Harness {
    gateway: QueryGateway,
    executor: Arc<SpyExecutor>,
    records: Arc<Mutex<Vec<AuditRecord>>>,
    events: Arc<Mutex<Vec<WarningEvent>>>,
}

fn harness(definitions: Vec<QueryDefinition>, executor: SpyExecutor) -> Harness {
    harness_with(definitions, executor, Environment::Local, Vec::new())
}

fn harness_with(
    definitions: Vec<QueryDefinition>,
    executor: SpyExecutor,
    environment: Environment,
    extra_channels: Vec<Arc<dyn AuditChannel>>,
) -> Harness {
    let executor = Arc::new(executor);
    let records = Arc::new(Mutex::new(Vec::new()));
    let events = Arc::new(Mutex::new(Vec::new()));
    let mut audit_channels: Vec<Arc<dyn AuditChannel>> = extra_channels;
    audit_channels.push(Arc::new(CollectingChannel {
        records: Arc::clone(&records),
    }));
    let gateway = QueryGateway::new(QueryGatewayConfig {
        registry: Arc::new(FixedRegistry {
            definitions,
        }),
        executor: Arc::clone(&executor) as Arc<dyn QueryExecutor>,
        audit_channels,
        warnings: Arc::new(CollectingWarnings {
            events: Arc::clone(&events),
        }),
        environment,
        row_caps: RowCapPolicy::default(),
    });
    Harness {
        gateway,
        executor,
        records,
        events,
    }
}

fn request(parameters: &[(&str, Value)], options: ExecutionOptions) -> RunRequest {
    RunRequest {
        name: QueryName::new("active_orders"),
        parameters: parameters
            .iter()
            .map(|(name, value)| ((*name).to_string(), value.clone()))
            .collect(),
        options,
        caller_id: Some("agent-7".to_string()),
    }
}

async fn settle_records(records: &Arc<Mutex<Vec<AuditRecord>>>, expected: usize) {
    for _ in 0 .. 200 {
        if records.lock().expect("records lock").len() >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("audit records did not settle");
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn successful_run_binds_by_name_and_audits_success() {
    let harness = harness(
        vec![definition(StatementKind::Read, vec![number_spec("customer_id", false)])],
        SpyExecutor::new(3),
    );
    let outcome = harness
        .gateway
        .run(request(&[("customer_id", json!(42))], ExecutionOptions::default()))
        .await
        .expect("run");
    assert_eq!(outcome.row_count, 3);
    let calls = harness.executor.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0].bound,
        vec![("customer_id".to_string(), ParamValue::Integer(42))]
    );
    settle_records(&harness.records, 1).await;
    let record = harness.records.lock().expect("records lock")[0].clone();
    assert_eq!(record.status, AuditStatus::Success);
    assert_eq!(record.query_name, "active_orders");
    assert_eq!(record.query_version, 3);
    assert_eq!(record.row_count, 3);
    assert_eq!(record.caller_id.as_deref(), Some("agent-7"));
}

#[tokio::test(flavor = "multi_thread")]
async fn type_mismatch_never_reaches_the_executor_and_audits_error() {
    let harness = harness(
        vec![definition(StatementKind::Read, vec![number_spec("customer_id", false)])],
        SpyExecutor::new(3),
    );
    let error = harness
        .gateway
        .run(request(&[("customer_id", json!("abc"))], ExecutionOptions::default()))
        .await
        .expect_err("type mismatch");
    assert!(matches!(
        error,
        GatewayError::Validation(ValidationError::TypeMismatch { .. })
    ));
    assert_eq!(harness.executor.call_count(), 0);
    settle_records(&harness.records, 1).await;
    let record = harness.records.lock().expect("records lock")[0].clone();
    assert_eq!(record.status, AuditStatus::Error);
    assert_eq!(record.row_count, 0);
    assert!(record.error.as_deref().is_some_and(|detail| detail.contains("customer_id")));
}

#[tokio::test(flavor = "multi_thread")]
async fn unconfirmed_mutation_is_blocked_before_the_store() {
    let harness = harness(
        vec![definition(StatementKind::Mutating, vec![number_spec("customer_id", false)])],
        SpyExecutor::new(1),
    );
    let error = harness
        .gateway
        .run(request(&[("customer_id", json!(1))], ExecutionOptions::default()))
        .await
        .expect_err("unconfirmed mutation");
    assert!(matches!(
        error,
        GatewayError::Guard(GuardError::ConfirmationRequired { .. })
    ));
    assert_eq!(harness.executor.call_count(), 0);
    settle_records(&harness.records, 1).await;
    assert_eq!(
        harness.records.lock().expect("records lock")[0].status,
        AuditStatus::Error
    );

    let confirmed = ExecutionOptions {
        max_rows: None,
        confirm_mutation: true,
    };
    harness
        .gateway
        .run(request(&[("customer_id", json!(1))], confirmed))
        .await
        .expect("confirmed mutation");
    assert_eq!(harness.executor.call_count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn row_caps_clamp_to_the_hard_maximum() {
    let harness = harness(
        vec![definition(StatementKind::Read, vec![number_spec("customer_id", false)])],
        SpyExecutor::new(10_000),
    );
    let oversized = ExecutionOptions {
        max_rows: Some(5_000),
        confirm_mutation: false,
    };
    let outcome = harness
        .gateway
        .run(request(&[("customer_id", json!(1))], oversized))
        .await
        .expect("run");
    assert_eq!(outcome.row_count, 2_000);
    assert!(outcome.truncated);

    let small = ExecutionOptions {
        max_rows: Some(10),
        confirm_mutation: false,
    };
    let outcome = harness
        .gateway
        .run(request(&[("customer_id", json!(1))], small))
        .await
        .expect("run");
    assert_eq!(outcome.row_count, 10);
    let caps: Vec<u64> = harness.executor.calls().iter().map(|call| call.row_cap).collect();
    assert_eq!(caps, vec![2_000, 10]);
}

#[tokio::test(flavor = "multi_thread")]
async fn masking_redacts_audit_values_but_not_execution_values() {
    let harness = harness_with(
        vec![definition(StatementKind::Read, vec![number_spec("customer_id", true)])],
        SpyExecutor::new(1),
        Environment::Prod,
        Vec::new(),
    );
    harness
        .gateway
        .run(request(&[("customer_id", json!(42))], ExecutionOptions::default()))
        .await
        .expect("run");
    let calls = harness.executor.calls();
    assert_eq!(
        calls[0].bound,
        vec![("customer_id".to_string(), ParamValue::Integer(42))]
    );
    settle_records(&harness.records, 1).await;
    let record = harness.records.lock().expect("records lock")[0].clone();
    assert_eq!(record.parameters["customer_id"], json!(MASKED_VALUE));
}

#[tokio::test(flavor = "multi_thread")]
async fn store_audit_failure_never_alters_the_caller_result() {
    let harness = harness_with(
        vec![definition(StatementKind::Read, vec![number_spec("customer_id", false)])],
        SpyExecutor::new(4),
        Environment::Local,
        vec![Arc::new(FailingChannel)],
    );
    let outcome = harness
        .gateway
        .run(request(&[("customer_id", json!(42))], ExecutionOptions::default()))
        .await
        .expect("run");
    assert_eq!(outcome.row_count, 4);
    settle_records(&harness.records, 1).await;
    assert_eq!(
        harness.records.lock().expect("records lock")[0].status,
        AuditStatus::Success
    );
    // The failing channel is downgraded to a warning, never surfaced.
    for _ in 0 .. 200 {
        if !harness.events.lock().expect("events lock").is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let events = harness.events.lock().expect("events lock");
    assert!(events.iter().any(|event| event.event == "audit_channel_failure"));
}

#[tokio::test(flavor = "multi_thread")]
async fn execution_failure_audits_error_and_hides_store_detail() {
    let mut executor = SpyExecutor::new(0);
    executor.fail = true;
    let harness = harness(
        vec![definition(StatementKind::Read, vec![number_spec("customer_id", false)])],
        executor,
    );
    let error = harness
        .gateway
        .run(request(&[("customer_id", json!(42))], ExecutionOptions::default()))
        .await
        .expect_err("store outage");
    let GatewayError::Execution(execution) = error else {
        panic!("expected execution error");
    };
    assert_eq!(execution.to_string(), "statement execution failed");
    settle_records(&harness.records, 1).await;
    let record = harness.records.lock().expect("records lock")[0].clone();
    assert_eq!(record.status, AuditStatus::Error);
    assert_eq!(record.error.as_deref(), Some("statement execution failed"));
    // The raw store detail lands in the warning log only.
    for _ in 0 .. 200 {
        if !harness.events.lock().expect("events lock").is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let events = harness.events.lock().expect("events lock");
    assert!(events.iter().any(|event| event.message.contains("simulated store outage")));
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_query_name_returns_not_found_without_audit() {
    let harness = harness(Vec::new(), SpyExecutor::new(0));
    let error = harness
        .gateway
        .run(request(&[], ExecutionOptions::default()))
        .await
        .expect_err("unknown name");
    assert!(matches!(
        error,
        GatewayError::Registry(RegistryError::NotFound { .. })
    ));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(harness.records.lock().expect("records lock").is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn list_applies_the_tag_filter() {
    let mut tagged = definition(StatementKind::Read, Vec::new());
    tagged.tags = ["orders".to_string()].into_iter().collect();
    let mut other = definition(StatementKind::Read, Vec::new());
    other.name = QueryName::new("facility_totals");
    other.tags = ["facility".to_string()].into_iter().collect();
    let harness = harness(vec![tagged, other], SpyExecutor::new(0));
    let all = harness.gateway.list(None).await.expect("list");
    assert_eq!(all.len(), 2);
    let filtered = harness
        .gateway
        .list(TagFilter::parse("facility"))
        .await
        .expect("filtered list");
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].name.as_str(), "facility_totals");
}
