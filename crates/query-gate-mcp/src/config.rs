// crates/query-gate-mcp/src/config.rs
// ============================================================================
// Module: Gateway Configuration
// Description: Canonical TOML configuration model for the MCP server.
// Purpose: Validate deployment settings before any component starts.
// Dependencies: serde, toml, query-gate-core
// ============================================================================

//! ## Overview
//! One configuration model covers the server transport, the backing store,
//! the audit file channel, row cap limits, and the deployment tier that
//! drives masking. Validation fails closed: a server never starts on a
//! config it cannot fully honor.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;

use query_gate_core::Environment;
use query_gate_core::RowCapPolicy;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default maximum JSON-RPC request body size.
const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;
/// Default audit log file path.
const DEFAULT_AUDIT_LOG: &str = "query_audit.log";

// ============================================================================
// SECTION: Types
// ============================================================================

/// Server transport selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServerTransport {
    /// JSON-RPC over framed stdin/stdout.
    #[default]
    Stdio,
    /// JSON-RPC over HTTP POST.
    Http,
}

/// Server transport settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Transport used to serve requests.
    #[serde(default)]
    pub transport: ServerTransport,
    /// Bind address; required for the HTTP transport.
    #[serde(default)]
    pub bind: Option<String>,
    /// Maximum allowed request body size in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: ServerTransport::Stdio,
            bind: None,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// Returns the default request body limit.
const fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

/// Backing store settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

/// Returns the default store busy timeout.
const fn default_busy_timeout_ms() -> u64 {
    5_000
}

/// File audit channel settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    /// Path of the append-only audit log file.
    #[serde(default = "default_audit_log_path")]
    pub log_path: PathBuf,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from(DEFAULT_AUDIT_LOG),
        }
    }
}

/// Returns the default audit log path.
fn default_audit_log_path() -> PathBuf {
    PathBuf::from(DEFAULT_AUDIT_LOG)
}

/// Row cap limit settings.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LimitsConfig {
    /// Hard ceiling no request may exceed.
    #[serde(default = "default_hard_max_rows")]
    pub hard_max_rows: u64,
    /// Ceiling applied when the caller omits `max_rows`.
    #[serde(default = "default_max_rows")]
    pub default_max_rows: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            hard_max_rows: query_gate_core::DEFAULT_HARD_MAX_ROWS,
            default_max_rows: query_gate_core::DEFAULT_ROW_CAP,
        }
    }
}

/// Returns the default hard row ceiling.
const fn default_hard_max_rows() -> u64 {
    query_gate_core::DEFAULT_HARD_MAX_ROWS
}

/// Returns the default per-request row cap.
const fn default_max_rows() -> u64 {
    query_gate_core::DEFAULT_ROW_CAP
}

impl LimitsConfig {
    /// Converts the limits into the core row cap policy.
    #[must_use]
    pub const fn row_cap_policy(self) -> RowCapPolicy {
        RowCapPolicy {
            hard_max: self.hard_max_rows,
            default_cap: self.default_max_rows,
        }
    }
}

/// Canonical gateway configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryGateConfig {
    /// Server transport settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Backing store settings.
    pub store: StoreConfig,
    /// File audit channel settings.
    #[serde(default)]
    pub audit: AuditConfig,
    /// Row cap limit settings.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Deployment tier driving the masking policy.
    #[serde(default)]
    pub environment: Environment,
}

impl QueryGateConfig {
    /// Loads and parses a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|error| ConfigError::Io(format!("{}: {error}", path.display())))?;
        toml::from_str(&raw).map_err(|error| ConfigError::Parse(error.to_string()))
    }

    /// Checks the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] on any unusable setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.transport == ServerTransport::Http && self.server.bind.is_none() {
            return Err(ConfigError::Invalid(
                "server.bind is required for the http transport".to_string(),
            ));
        }
        if self.server.max_body_bytes == 0 {
            return Err(ConfigError::Invalid(
                "server.max_body_bytes must be greater than zero".to_string(),
            ));
        }
        if self.store.busy_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "store.busy_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.store.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("store.path must not be empty".to_string()));
        }
        if self.audit.log_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("audit.log_path must not be empty".to_string()));
        }
        self.limits
            .row_cap_policy()
            .validate()
            .map_err(|error| ConfigError::Invalid(error.to_string()))?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration errors.
#[derive(Debug, Error, Clone)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("config io error: {0}")]
    Io(String),
    /// The configuration file could not be parsed.
    #[error("config parse error: {0}")]
    Parse(String),
    /// A setting is out of range or inconsistent.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Tests
// ============================================================================
