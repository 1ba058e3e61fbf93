// crates/query-gate-mcp/src/audit_sink.rs
// ============================================================================
// Module: Audit Sink Implementations
// Description: File audit channel and warning sinks for the MCP server.
// Purpose: Persist audit records as JSON lines without hard dependencies.
// Dependencies: query-gate-core, serde_json
// ============================================================================

//! ## Overview
//! The file audit channel appends one JSON line per record to an append-mode
//! log file; deployments route rotation through their platform tooling. The
//! stderr warning sink receives downgraded channel failures and integrity
//! warnings as JSON lines. Sinks are intentionally lightweight so
//! deployments can swap in their preferred logging pipeline without
//! redesign.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use query_gate_core::AuditChannel;
use query_gate_core::AuditChannelError;
use query_gate_core::AuditRecord;
use query_gate_core::WarningEvent;
use query_gate_core::WarningSink;

// ============================================================================
// SECTION: File Channel
// ============================================================================

/// Audit channel that appends JSON lines to a log file.
pub struct FileAuditChannel {
    /// File handle used for append-only logging.
    file: Mutex<File>,
}

impl FileAuditChannel {
    /// Opens the audit log file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl AuditChannel for FileAuditChannel {
    fn name(&self) -> &'static str {
        "file"
    }

    fn record(&self, record: &AuditRecord) -> Result<(), AuditChannelError> {
        let payload = serde_json::to_string(record).map_err(|error| AuditChannelError {
            channel: "file",
            detail: error.to_string(),
        })?;
        let mut file = self.file.lock().map_err(|_| AuditChannelError {
            channel: "file",
            detail: "audit file mutex poisoned".to_string(),
        })?;
        writeln!(file, "{payload}")
            .and_then(|()| file.flush())
            .map_err(|error| AuditChannelError {
                channel: "file",
                detail: error.to_string(),
            })
    }
}

// ============================================================================
// SECTION: Warning Sinks
// ============================================================================

/// Warning sink that logs JSON lines to stderr.
pub struct StderrWarningSink;

impl WarningSink for StderrWarningSink {
    fn warn(&self, event: &WarningEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr(), "{payload}");
        }
    }
}

// ============================================================================
// SECTION: No-op Channel
// ============================================================================

/// Audit channel that drops all records.
pub struct NoopAuditChannel;

impl AuditChannel for NoopAuditChannel {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn record(&self, _record: &AuditRecord) -> Result<(), AuditChannelError> {
        Ok(())
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
