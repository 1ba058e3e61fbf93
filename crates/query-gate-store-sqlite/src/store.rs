// crates/query-gate-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Gateway Store
// Description: Registry lookup, execution, and audit inserts over SQLite.
// Purpose: Implement the store collaborator seams with fail-closed reads.
// Dependencies: query-gate-core, rusqlite, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! This module implements the three store seams over `SQLite`: the versioned
//! registry table (`query_registry`), the bind-by-name execution primitive,
//! and the audit-table insert (`query_audit_log`). Execution and audit use
//! separate connections so an invocation never holds one connection across
//! the audit boundary. Registry reads fail closed: zero active rows is
//! `NotFound`, more than one is an integrity fault, never a silent pick.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use query_gate_core::AuditChannel;
use query_gate_core::AuditChannelError;
use query_gate_core::AuditRecord;
use query_gate_core::BoundParameters;
use query_gate_core::ExecutionError;
use query_gate_core::ParamValue;
use query_gate_core::ParameterSpec;
use query_gate_core::QueryDefinition;
use query_gate_core::QueryExecutor;
use query_gate_core::QueryName;
use query_gate_core::QueryRegistry;
use query_gate_core::QuerySummary;
use query_gate_core::RegistryError;
use query_gate_core::StatementKind;
use query_gate_core::StatementOutcome;
use query_gate_core::TagFilter;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::params;
use rusqlite::types::ValueRef;
use serde::Deserialize;
use serde_json::Map;
use serde_json::Number;
use serde_json::Value;
use thiserror::Error;
use time::format_description::well_known::Rfc3339;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the gateway store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

// ============================================================================
// SECTION: Config
// ============================================================================

/// Configuration for the `SQLite` gateway store.
///
/// # Invariants
/// - `path` must resolve to a file path (not a directory).
/// - `busy_timeout_ms` is interpreted as milliseconds.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
///
/// # Invariants
/// - Error messages avoid embedding statement text or bind values.
#[derive(Debug, Error, Clone)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Invalid stored data.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
    /// Registry integrity violation.
    #[error("sqlite store integrity fault: {0}")]
    Integrity(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
}

impl From<SqliteStoreError> for RegistryError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Integrity(message) => Self::Integrity(message),
            other => Self::Store(other.to_string()),
        }
    }
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed gateway store.
///
/// # Invariants
/// - Execution and registry reads share one connection; audit inserts use a
///   second, independent connection.
/// - Registry resolution enforces the single-active-version invariant at
///   read time.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    /// Connection used for registry reads and statement execution.
    exec_connection: Arc<Mutex<Connection>>,
    /// Dedicated connection for the store audit channel.
    audit_connection: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens the gateway store, creating tables on first use.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened or
    /// initialized, or when an existing store carries a different schema
    /// version.
    pub fn new(config: &SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        ensure_parent_dir(&config.path)?;
        let exec_connection = open_connection(config)?;
        initialize_schema(&exec_connection)?;
        let audit_connection = open_connection(config)?;
        Ok(Self {
            exec_connection: Arc::new(Mutex::new(exec_connection)),
            audit_connection: Arc::new(Mutex::new(audit_connection)),
        })
    }

    /// Registers a new definition version and activates it.
    ///
    /// This is the out-of-band administrative act: rows are append-only, and
    /// activating a version deactivates every prior version of the name in
    /// the same transaction.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the definition violates integrity
    /// invariants or the insert fails (including version collisions).
    pub fn register_version(
        &self,
        definition: &QueryDefinition,
    ) -> Result<(), SqliteStoreError> {
        definition
            .ensure_integrity()
            .map_err(|error| SqliteStoreError::Integrity(error.to_string()))?;
        let parameters = serde_json::to_string(&definition.parameters)
            .map_err(|error| SqliteStoreError::Invalid(error.to_string()))?;
        let tags = definition.tags.iter().cloned().collect::<Vec<_>>().join(",");
        let mut guard = self
            .exec_connection
            .lock()
            .map_err(|_| SqliteStoreError::Db("exec mutex poisoned".to_string()))?;
        let tx = guard.transaction().map_err(|error| SqliteStoreError::Db(error.to_string()))?;
        tx.execute(
            "UPDATE query_registry SET is_active = 0 WHERE name = ?1",
            params![definition.name.as_str()],
        )
        .map_err(|error| SqliteStoreError::Db(error.to_string()))?;
        tx.execute(
            "INSERT INTO query_registry
                 (name, version, description, sql_text, parameters,
                  statement_kind, is_active, tags, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?8)",
            params![
                definition.name.as_str(),
                definition.version,
                definition.description,
                definition.sql_text,
                parameters,
                definition.statement_kind.label(),
                tags,
                unix_millis(),
            ],
        )
        .map_err(|error| SqliteStoreError::Db(error.to_string()))?;
        tx.commit().map_err(|error| SqliteStoreError::Db(error.to_string()))?;
        Ok(())
    }

    /// Loads every active row matching the optional name filter.
    fn load_active_rows(
        &self,
        name: Option<&QueryName>,
    ) -> Result<Vec<QueryDefinition>, SqliteStoreError> {
        let guard = self
            .exec_connection
            .lock()
            .map_err(|_| SqliteStoreError::Db("exec mutex poisoned".to_string()))?;
        let sql = match name {
            Some(_) => {
                "SELECT name, version, description, sql_text, parameters, statement_kind, tags
                 FROM query_registry WHERE is_active = 1 AND name = ?1 ORDER BY name"
            }
            None => {
                "SELECT name, version, description, sql_text, parameters, statement_kind, tags
                 FROM query_registry WHERE is_active = 1 ORDER BY name"
            }
        };
        let mut stmt =
            guard.prepare(sql).map_err(|error| SqliteStoreError::Db(error.to_string()))?;
        let map_row = |row: &rusqlite::Row<'_>| {
            let name: String = row.get(0)?;
            let version: i64 = row.get(1)?;
            let description: String = row.get(2)?;
            let sql_text: String = row.get(3)?;
            let parameters: String = row.get(4)?;
            let statement_kind: String = row.get(5)?;
            let tags: String = row.get(6)?;
            Ok((name, version, description, sql_text, parameters, statement_kind, tags))
        };
        let rows = match name {
            Some(name) => stmt
                .query_map(params![name.as_str()], map_row)
                .map_err(|error| SqliteStoreError::Db(error.to_string()))?
                .collect::<Result<Vec<_>, _>>(),
            None => stmt
                .query_map([], map_row)
                .map_err(|error| SqliteStoreError::Db(error.to_string()))?
                .collect::<Result<Vec<_>, _>>(),
        }
        .map_err(|error| SqliteStoreError::Db(error.to_string()))?;
        rows.into_iter().map(build_definition).collect()
    }
}

// ============================================================================
// SECTION: Registry Implementation
// ============================================================================

impl QueryRegistry for SqliteStore {
    fn resolve_active(&self, name: &QueryName) -> Result<QueryDefinition, RegistryError> {
        let mut rows = self.load_active_rows(Some(name)).map_err(RegistryError::from)?;
        match rows.len() {
            0 => Err(RegistryError::NotFound {
                name: name.to_string(),
            }),
            1 => {
                // Index 0 exists; checked by the arm above.
                let definition = rows.swap_remove(0);
                definition.ensure_integrity()?;
                Ok(definition)
            }
            count => Err(RegistryError::Integrity(format!(
                "{count} active versions found for query {name}"
            ))),
        }
    }

    fn list_active(&self, filter: Option<&TagFilter>) -> Result<Vec<QuerySummary>, RegistryError> {
        let rows = self.load_active_rows(None).map_err(RegistryError::from)?;
        Ok(rows
            .iter()
            .filter(|definition| filter.is_none_or(|filter| filter.matches(&definition.tags)))
            .map(QueryDefinition::summary)
            .collect())
    }
}

/// Builds a definition from a raw registry row, failing closed on bad data.
fn build_definition(
    row: (String, i64, String, String, String, String, String),
) -> Result<QueryDefinition, SqliteStoreError> {
    let (name, version, description, sql_text, parameters, statement_kind, tags) = row;
    let parameters: Vec<ParameterSpec> = serde_json::from_str(&parameters).map_err(|error| {
        SqliteStoreError::Integrity(format!("query {name} has malformed parameter schema: {error}"))
    })?;
    let statement_kind = parse_statement_kind(&name, &statement_kind)?;
    let tags: BTreeSet<String> = tags
        .split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect();
    Ok(QueryDefinition {
        name: QueryName::new(name),
        version,
        description,
        sql_text,
        parameters,
        statement_kind,
        tags,
    })
}

/// Parses the stored statement kind label, failing closed on unknown values.
fn parse_statement_kind(name: &str, label: &str) -> Result<StatementKind, SqliteStoreError> {
    match label {
        "read" => Ok(StatementKind::Read),
        "mutating" => Ok(StatementKind::Mutating),
        other => Err(SqliteStoreError::Integrity(format!(
            "query {name} has unknown statement kind \"{other}\""
        ))),
    }
}

// ============================================================================
// SECTION: Executor Implementation
// ============================================================================

impl QueryExecutor for SqliteStore {
    fn execute(
        &self,
        sql_text: &str,
        parameters: &BoundParameters,
        row_cap: u64,
    ) -> Result<StatementOutcome, ExecutionError> {
        let guard = self
            .exec_connection
            .lock()
            .map_err(|_| ExecutionError::store_fault("exec mutex poisoned"))?;
        let mut stmt = guard
            .prepare(sql_text)
            .map_err(|error| ExecutionError::store_fault(error.to_string()))?;
        let columns: Vec<String> = stmt.column_names().iter().map(ToString::to_string).collect();

        for (name, value) in parameters.entries() {
            let placeholder = format!(":{name}");
            let index = stmt
                .parameter_index(&placeholder)
                .map_err(|error| ExecutionError::store_fault(error.to_string()))?
                .ok_or_else(|| {
                    ExecutionError::store_fault(format!(
                        "statement has no bind placeholder {placeholder}"
                    ))
                })?;
            stmt.raw_bind_parameter(index, bind_value(value))
                .map_err(|error| ExecutionError::store_fault(error.to_string()))?;
        }

        if columns.is_empty() {
            // Statement returns no rows (DML); run it and report zero rows.
            stmt.raw_execute()
                .map_err(|error| ExecutionError::store_fault(error.to_string()))?;
            return Ok(StatementOutcome::default());
        }

        let mut rows = stmt.raw_query();
        let mut collected: Vec<Map<String, Value>> = Vec::new();
        let mut row_count: u64 = 0;
        let mut truncated = false;
        loop {
            let row = rows
                .next()
                .map_err(|error| ExecutionError::store_fault(error.to_string()))?;
            let Some(row) = row else {
                break;
            };
            if row_count >= row_cap {
                // One row past the cap proves truncation; never return it.
                truncated = true;
                break;
            }
            let mut object = Map::new();
            for (index, column) in columns.iter().enumerate() {
                let value = row
                    .get_ref(index)
                    .map_err(|error| ExecutionError::store_fault(error.to_string()))?;
                object.insert(column.clone(), column_value(value));
            }
            collected.push(object);
            row_count += 1;
        }
        Ok(StatementOutcome {
            columns,
            rows: collected,
            row_count,
            truncated,
        })
    }
}

/// Converts a coerced bind value to its `SQLite` storage form.
fn bind_value(value: &ParamValue) -> rusqlite::types::Value {
    match value.display_value() {
        Value::Number(number) => number.as_i64().map_or_else(
            || {
                number
                    .as_f64()
                    .map_or(rusqlite::types::Value::Null, rusqlite::types::Value::Real)
            },
            rusqlite::types::Value::Integer,
        ),
        Value::String(text) => rusqlite::types::Value::Text(text),
        _ => rusqlite::types::Value::Null,
    }
}

/// Converts a `SQLite` column value to its JSON result form.
fn column_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(whole) => Value::Number(Number::from(whole)),
        ValueRef::Real(real) => Number::from_f64(real).map_or(Value::Null, Value::Number),
        ValueRef::Text(text) => Value::String(String::from_utf8_lossy(text).into_owned()),
        ValueRef::Blob(bytes) => Value::String(BASE64.encode(bytes)),
    }
}

// ============================================================================
// SECTION: Audit Channel Implementation
// ============================================================================

impl AuditChannel for SqliteStore {
    fn name(&self) -> &'static str {
        "store"
    }

    fn record(&self, record: &AuditRecord) -> Result<(), AuditChannelError> {
        let executed_at = record
            .executed_at
            .format(&Rfc3339)
            .map_err(|error| channel_error(error.to_string()))?;
        let parameters = serde_json::to_string(&record.parameters)
            .map_err(|error| channel_error(error.to_string()))?;
        let row_count =
            i64::try_from(record.row_count).map_err(|error| channel_error(error.to_string()))?;
        let duration_ms =
            i64::try_from(record.duration_ms).unwrap_or(i64::MAX);
        let guard = self
            .audit_connection
            .lock()
            .map_err(|_| channel_error("audit mutex poisoned".to_string()))?;
        guard
            .execute(
                "INSERT INTO query_audit_log
                     (query_name, query_version, executed_at, parameters,
                      status, error, row_count, duration_ms, caller_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.query_name,
                    record.query_version,
                    executed_at,
                    parameters,
                    record.status.label(),
                    record.error,
                    row_count,
                    duration_ms,
                    record.caller_id,
                ],
            )
            .map_err(|error| channel_error(error.to_string()))?;
        Ok(())
    }
}

/// Builds a store audit channel error.
fn channel_error(detail: String) -> AuditChannelError {
    AuditChannelError {
        channel: "store",
        detail,
    }
}

// ============================================================================
// SECTION: Connection Helpers
// ============================================================================

/// Ensures the parent directory of the database path exists.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|error| SqliteStoreError::Io(error.to_string()))?;
    }
    Ok(())
}

/// Opens a configured connection with WAL and busy-timeout pragmas applied.
fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let connection =
        Connection::open(&config.path).map_err(|error| SqliteStoreError::Io(error.to_string()))?;
    connection
        .busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))
        .map_err(|error| SqliteStoreError::Db(error.to_string()))?;
    let _mode: String = connection
        .query_row("PRAGMA journal_mode = wal", [], |row| row.get(0))
        .map_err(|error| SqliteStoreError::Db(error.to_string()))?;
    connection
        .execute_batch("PRAGMA synchronous = full; PRAGMA foreign_keys = on;")
        .map_err(|error| SqliteStoreError::Db(error.to_string()))?;
    Ok(connection)
}

/// Creates tables on first use and verifies the stored schema version.
fn initialize_schema(connection: &Connection) -> Result<(), SqliteStoreError> {
    connection
        .execute_batch(
            "CREATE TABLE IF NOT EXISTS gate_meta (
                 key TEXT PRIMARY KEY,
                 value TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS query_registry (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 name TEXT NOT NULL,
                 version INTEGER NOT NULL,
                 description TEXT NOT NULL DEFAULT '',
                 sql_text TEXT NOT NULL,
                 parameters TEXT NOT NULL DEFAULT '[]',
                 statement_kind TEXT NOT NULL DEFAULT 'read',
                 is_active INTEGER NOT NULL DEFAULT 0,
                 tags TEXT NOT NULL DEFAULT '',
                 created_at INTEGER NOT NULL,
                 UNIQUE (name, version)
             );
             CREATE INDEX IF NOT EXISTS idx_query_registry_active
                 ON query_registry (name, is_active);
             CREATE TABLE IF NOT EXISTS query_audit_log (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 query_name TEXT NOT NULL,
                 query_version INTEGER NOT NULL,
                 executed_at TEXT NOT NULL,
                 parameters TEXT NOT NULL,
                 status TEXT NOT NULL,
                 error TEXT,
                 row_count INTEGER NOT NULL,
                 duration_ms INTEGER NOT NULL,
                 caller_id TEXT
             );",
        )
        .map_err(|error| SqliteStoreError::Db(error.to_string()))?;
    let stored: Option<String> = connection
        .query_row(
            "SELECT value FROM gate_meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(|error| SqliteStoreError::Db(error.to_string()))?;
    match stored {
        None => {
            connection
                .execute(
                    "INSERT INTO gate_meta (key, value) VALUES ('schema_version', ?1)",
                    params![SCHEMA_VERSION.to_string()],
                )
                .map_err(|error| SqliteStoreError::Db(error.to_string()))?;
            Ok(())
        }
        Some(value) if value == SCHEMA_VERSION.to_string() => Ok(()),
        Some(value) => Err(SqliteStoreError::VersionMismatch(format!(
            "expected schema version {SCHEMA_VERSION}, found {value}"
        ))),
    }
}

/// Returns the current unix time in milliseconds.
fn unix_millis() -> i64 {
    let millis =
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
    i64::try_from(millis).unwrap_or(i64::MAX)
}
