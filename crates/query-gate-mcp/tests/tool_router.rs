// crates/query-gate-mcp/tests/tool_router.rs
// ============================================================================
// Module: Tool Router Integration Tests
// Description: End-to-end tool calls over a real SQLite-backed gateway.
// Purpose: Validate discovery, detail, execution, and error-class mapping.
// ============================================================================

//! ## Overview
//! Router-level tests over a real `SQLite` store in a temp directory:
//! - Discovery and detail tools round-trip registered definitions.
//! - Execution binds by name and honors row caps end to end.
//! - Pipeline failures keep their tool error class (validation vs rejected).

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

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use query_gate_core::AuditChannel;
use query_gate_core::Environment;
use query_gate_core::NoopWarningSink;
use query_gate_core::ParamType;
use query_gate_core::ParameterSpec;
use query_gate_core::QueryDefinition;
use query_gate_core::QueryExecutor;
use query_gate_core::QueryGateway;
use query_gate_core::QueryGatewayConfig;
use query_gate_core::QueryName;
use query_gate_core::QueryRegistry;
use query_gate_core::RowCapPolicy;
use query_gate_core::StatementKind;
use query_gate_core::WarningSink;
use query_gate_core::validate_parameters;
use query_gate_mcp::NoopAuditChannel;
use query_gate_mcp::RequestContext;
use query_gate_mcp::ToolError;
use query_gate_mcp::ToolRouter;
use query_gate_store_sqlite::SqliteStore;
use query_gate_store_sqlite::SqliteStoreConfig;
use serde_json::json;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn router_over(dir: &TempDir) -> (ToolRouter, Arc<SqliteStore>) {
    let store = Arc::new(
        SqliteStore::new(&SqliteStoreConfig {
            path: dir.path().join("gate.db"),
            busy_timeout_ms: 1_000,
        })
        .expect("open store"),
    );
    let gateway = QueryGateway::new(QueryGatewayConfig {
        registry: Arc::clone(&store) as Arc<dyn QueryRegistry>,
        executor: Arc::clone(&store) as Arc<dyn QueryExecutor>,
        audit_channels: vec![Arc::new(NoopAuditChannel) as Arc<dyn AuditChannel>],
        warnings: Arc::new(NoopWarningSink) as Arc<dyn WarningSink>,
        environment: Environment::Local,
        row_caps: RowCapPolicy::default(),
    });
    (ToolRouter::new(gateway), store)
}

fn seed_registry(store: &SqliteStore) {
    let empty = validate_parameters(&[], &BTreeMap::new()).expect("empty binds");
    store
        .execute(
            "CREATE TABLE orders (id INTEGER PRIMARY KEY, customer_id INTEGER, status TEXT)",
            &empty,
            1,
        )
        .expect("create orders");
    for (id, customer, status) in
        [(1, 42, "OPEN"), (2, 42, "OPEN"), (3, 42, "CLOSED"), (4, 9, "OPEN")]
    {
        store
            .execute(
                &format!(
                    "INSERT INTO orders (id, customer_id, status)
                     VALUES ({id}, {customer}, '{status}')"
                ),
                &empty,
                1,
            )
            .expect("insert order");
    }
    store
        .register_version(&QueryDefinition {
            name: QueryName::new("active_orders"),
            version: 3,
            description: "Active orders for a customer".to_string(),
            sql_text: "SELECT id, status FROM orders
                       WHERE customer_id = :customer_id ORDER BY id"
                .to_string(),
            parameters: vec![ParameterSpec {
                name: "customer_id".to_string(),
                param_type: ParamType::Number,
                required: true,
                allowed_values: None,
                default: None,
                sensitive: false,
            }],
            statement_kind: StatementKind::Read,
            tags: BTreeSet::from(["orders".to_string()]),
        })
        .expect("register active_orders");
    store
        .register_version(&QueryDefinition {
            name: QueryName::new("close_order"),
            version: 1,
            description: "Close one order".to_string(),
            sql_text: "UPDATE orders SET status = 'CLOSED' WHERE id = :order_id".to_string(),
            parameters: vec![ParameterSpec {
                name: "order_id".to_string(),
                param_type: ParamType::Number,
                required: true,
                allowed_values: None,
                default: None,
                sensitive: false,
            }],
            statement_kind: StatementKind::Mutating,
            tags: BTreeSet::from(["orders".to_string(), "admin".to_string()]),
        })
        .expect("register close_order");
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn queries_list_round_trips_registered_summaries() {
    let dir = TempDir::new().expect("tempdir");
    let (router, store) = router_over(&dir);
    seed_registry(&store);

    let result = router
        .handle_tool_call(&RequestContext::stdio(), "queries_list", json!({}))
        .await
        .expect("list");
    let queries = result["queries"].as_array().expect("queries array");
    assert_eq!(queries.len(), 2);

    let filtered = router
        .handle_tool_call(&RequestContext::stdio(), "queries_list", json!({"tags": "admin"}))
        .await
        .expect("filtered list");
    let queries = filtered["queries"].as_array().expect("queries array");
    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0]["name"], "close_order");
}

#[tokio::test(flavor = "multi_thread")]
async fn query_get_returns_full_detail() {
    let dir = TempDir::new().expect("tempdir");
    let (router, store) = router_over(&dir);
    seed_registry(&store);

    let result = router
        .handle_tool_call(&RequestContext::stdio(), "query_get", json!({"name": "active_orders"}))
        .await
        .expect("detail");
    assert_eq!(result["version"], 3);
    assert_eq!(result["statement_kind"], "read");
    assert!(result["sql_text"].as_str().expect("sql").contains(":customer_id"));

    let missing = router
        .handle_tool_call(&RequestContext::stdio(), "query_get", json!({"name": "missing"}))
        .await
        .expect_err("unknown query");
    assert!(matches!(missing, ToolError::NotFound(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn query_run_executes_with_typed_binds() {
    let dir = TempDir::new().expect("tempdir");
    let (router, store) = router_over(&dir);
    seed_registry(&store);

    let result = router
        .handle_tool_call(
            &RequestContext::stdio(),
            "query_run",
            json!({"name": "active_orders", "parameters": {"customer_id": 42}}),
        )
        .await
        .expect("run");
    assert_eq!(result["row_count"], 3);
    assert_eq!(result["rows"][0]["status"], "OPEN");

    let capped = router
        .handle_tool_call(
            &RequestContext::stdio(),
            "query_run",
            json!({"name": "active_orders", "parameters": {"customer_id": 42}, "max_rows": 1}),
        )
        .await
        .expect("capped run");
    assert_eq!(capped["row_count"], 1);
    assert_eq!(capped["truncated"], true);
}

#[tokio::test(flavor = "multi_thread")]
async fn query_run_keeps_error_classes_distinct() {
    let dir = TempDir::new().expect("tempdir");
    let (router, store) = router_over(&dir);
    seed_registry(&store);

    let mismatch = router
        .handle_tool_call(
            &RequestContext::stdio(),
            "query_run",
            json!({"name": "active_orders", "parameters": {"customer_id": "abc"}}),
        )
        .await
        .expect_err("type mismatch");
    let ToolError::Validation(message) = mismatch else {
        panic!("expected validation error");
    };
    assert!(message.contains("customer_id"));

    let unconfirmed = router
        .handle_tool_call(
            &RequestContext::stdio(),
            "query_run",
            json!({"name": "close_order", "parameters": {"order_id": 1}}),
        )
        .await
        .expect_err("unconfirmed mutation");
    assert!(matches!(unconfirmed, ToolError::Rejected(_)));

    let confirmed = router
        .handle_tool_call(
            &RequestContext::stdio(),
            "query_run",
            json!({
                "name": "close_order",
                "parameters": {"order_id": 1},
                "confirm_mutation": true
            }),
        )
        .await
        .expect("confirmed mutation");
    assert_eq!(confirmed["row_count"], 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn tool_payloads_are_decoded_strictly() {
    let dir = TempDir::new().expect("tempdir");
    let (router, store) = router_over(&dir);
    seed_registry(&store);

    let error = router
        .handle_tool_call(
            &RequestContext::stdio(),
            "query_run",
            json!({"name": "active_orders", "sql": "SELECT 1"}),
        )
        .await
        .expect_err("undeclared field");
    assert!(matches!(error, ToolError::InvalidParams(_)));

    let unknown = router
        .handle_tool_call(&RequestContext::stdio(), "run_sql", json!({}))
        .await
        .expect_err("unknown tool");
    assert!(matches!(unknown, ToolError::UnknownTool));
}
