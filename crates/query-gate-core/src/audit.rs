// crates/query-gate-core/src/audit.rs
// ============================================================================
// Module: Audit Recording
// Description: Immutable per-invocation audit records and dispatch channels.
// Purpose: Record every outcome to two independent sinks without ever
//          affecting the caller's result or response time.
// Dependencies: serde, serde_json, thiserror, time, tokio
// ============================================================================

//! ## Overview
//! One [`AuditRecord`] is built per invocation that resolves a definition,
//! on the success path and every error path alike, and handed to each
//! configured [`AuditChannel`] as an independent, never-joined task. Channel
//! failures are caught at the task boundary and funneled to a
//! [`WarningSink`]; they are never surfaced to the caller and never alter
//! the record handed to the other channel.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;

// ============================================================================
// SECTION: Record Types
// ============================================================================

/// Invocation outcome recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditStatus {
    /// The statement executed and returned a result.
    Success,
    /// The invocation failed at any stage after resolution.
    Error,
}

impl AuditStatus {
    /// Returns a stable label for storage.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Error => "ERROR",
        }
    }
}

/// Immutable audit record, one per invocation regardless of outcome.
///
/// # Invariants
/// - `parameters` holds the *masked* display mapping, never raw bind values.
/// - Never mutated after construction; both channels receive the same value.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    /// Executed query name.
    pub query_name: String,
    /// Executed query version.
    pub query_version: i64,
    /// Invocation timestamp (UTC).
    #[serde(with = "time::serde::rfc3339")]
    pub executed_at: OffsetDateTime,
    /// Masked parameter mapping.
    pub parameters: BTreeMap<String, Value>,
    /// Invocation outcome.
    pub status: AuditStatus,
    /// Error detail, present only on [`AuditStatus::Error`].
    pub error: Option<String>,
    /// Rows returned; zero on error or for statements returning none.
    pub row_count: u64,
    /// Pipeline duration in milliseconds.
    pub duration_ms: u64,
    /// Opaque caller identity supplied by the transport collaborator.
    pub caller_id: Option<String>,
}

/// Inputs required to construct an audit record.
pub struct AuditRecordParams {
    /// Executed query name.
    pub query_name: String,
    /// Executed query version.
    pub query_version: i64,
    /// Masked parameter mapping.
    pub parameters: BTreeMap<String, Value>,
    /// Invocation outcome.
    pub status: AuditStatus,
    /// Error detail, present only on error.
    pub error: Option<String>,
    /// Rows returned.
    pub row_count: u64,
    /// Pipeline duration in milliseconds.
    pub duration_ms: u64,
    /// Opaque caller identity.
    pub caller_id: Option<String>,
}

impl AuditRecord {
    /// Creates a new audit record with a consistent timestamp.
    #[must_use]
    pub fn new(params: AuditRecordParams) -> Self {
        Self {
            query_name: params.query_name,
            query_version: params.query_version,
            executed_at: OffsetDateTime::now_utc(),
            parameters: params.parameters,
            status: params.status,
            error: params.error,
            row_count: params.row_count,
            duration_ms: params.duration_ms,
            caller_id: params.caller_id,
        }
    }
}

// ============================================================================
// SECTION: Channel Traits
// ============================================================================

/// An independent audit sink.
pub trait AuditChannel: Send + Sync {
    /// Stable channel label used in warning events.
    fn name(&self) -> &'static str;

    /// Persists one audit record.
    ///
    /// # Errors
    ///
    /// Returns [`AuditChannelError`] when the sink cannot persist the record;
    /// the dispatcher downgrades the failure to a warning.
    fn record(&self, record: &AuditRecord) -> Result<(), AuditChannelError>;
}

/// Audit channel failure.
///
/// # Invariants
/// - Never propagated to the caller under any circumstance.
#[derive(Debug, Error, Clone)]
#[error("audit channel {channel} failed: {detail}")]
pub struct AuditChannelError {
    /// Failing channel label.
    pub channel: &'static str,
    /// Channel-specific failure detail.
    pub detail: String,
}

/// Non-propagating sink for downgraded failures and integrity warnings.
pub trait WarningSink: Send + Sync {
    /// Emits one warning event.
    fn warn(&self, event: &WarningEvent);
}

/// Structured warning event payload.
#[derive(Debug, Clone, Serialize)]
pub struct WarningEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (UTC).
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// Human-readable message.
    pub message: String,
}

impl WarningEvent {
    /// Creates a new warning event with a consistent timestamp.
    #[must_use]
    pub fn new(event: &'static str, message: impl Into<String>) -> Self {
        Self {
            event,
            timestamp: OffsetDateTime::now_utc(),
            message: message.into(),
        }
    }
}

/// Warning sink that drops all events.
pub struct NoopWarningSink;

impl WarningSink for NoopWarningSink {
    fn warn(&self, _event: &WarningEvent) {}
}

// ============================================================================
// SECTION: Dispatch
// ============================================================================

/// Dispatches one record to every channel as independent, unawaited tasks.
///
/// Must be called from within a Tokio runtime. Each channel runs on the
/// blocking pool (sinks do file or store I/O), is joined never, and reports
/// failure only through the warning sink.
pub fn dispatch_audit(
    channels: &[Arc<dyn AuditChannel>],
    warnings: &Arc<dyn WarningSink>,
    record: AuditRecord,
) {
    let record = Arc::new(record);
    for channel in channels {
        let channel = Arc::clone(channel);
        let warnings = Arc::clone(warnings);
        let record = Arc::clone(&record);
        drop(tokio::task::spawn_blocking(move || {
            if let Err(error) = channel.record(&record) {
                warnings.warn(&WarningEvent::new("audit_channel_failure", error.to_string()));
            }
        }));
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test-only assertions are permitted."
    )]

    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::time::Duration;

    use super::AuditChannel;
    use super::AuditChannelError;
    use super::AuditRecord;
    use super::AuditRecordParams;
    use super::AuditStatus;
    use super::WarningEvent;
    use super::WarningSink;
    use super::dispatch_audit;

    /// Collects records for assertions.
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

    /// Always fails, for durability tests.
    struct FailingChannel;

    impl AuditChannel for FailingChannel {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn record(&self, _record: &AuditRecord) -> Result<(), AuditChannelError> {
            Err(AuditChannelError {
                channel: "failing",
                detail: "sink unavailable".to_string(),
            })
        }
    }

    /// Collects warning events.
    struct CollectingWarnings {
        events: Arc<Mutex<Vec<WarningEvent>>>,
    }

    impl WarningSink for CollectingWarnings {
        fn warn(&self, event: &WarningEvent) {
            self.events.lock().expect("events lock").push(event.clone());
        }
    }

    fn sample_record() -> AuditRecord {
        AuditRecord::new(AuditRecordParams {
            query_name: "active_orders".to_string(),
            query_version: 3,
            parameters: BTreeMap::new(),
            status: AuditStatus::Success,
            error: None,
            row_count: 7,
            duration_ms: 12,
            caller_id: Some("agent-1".to_string()),
        })
    }

    async fn settle<T>(shared: &Arc<Mutex<Vec<T>>>, expected: usize) {
        for _ in 0 .. 100 {
            if shared.lock().expect("lock").len() >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("audit dispatch did not settle");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dispatch_reaches_every_channel() {
        let records = Arc::new(Mutex::new(Vec::new()));
        let channel: Arc<dyn AuditChannel> = Arc::new(CollectingChannel {
            records: Arc::clone(&records),
        });
        let second_records = Arc::new(Mutex::new(Vec::new()));
        let second: Arc<dyn AuditChannel> = Arc::new(CollectingChannel {
            records: Arc::clone(&second_records),
        });
        let warnings: Arc<dyn WarningSink> = Arc::new(super::NoopWarningSink);
        dispatch_audit(&[channel, second], &warnings, sample_record());
        settle(&records, 1).await;
        settle(&second_records, 1).await;
        assert_eq!(records.lock().expect("lock")[0].status, AuditStatus::Success);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn channel_failure_is_downgraded_to_a_warning() {
        let records = Arc::new(Mutex::new(Vec::new()));
        let surviving: Arc<dyn AuditChannel> = Arc::new(CollectingChannel {
            records: Arc::clone(&records),
        });
        let failing: Arc<dyn AuditChannel> = Arc::new(FailingChannel);
        let events = Arc::new(Mutex::new(Vec::new()));
        let warnings: Arc<dyn WarningSink> = Arc::new(CollectingWarnings {
            events: Arc::clone(&events),
        });
        dispatch_audit(&[failing, surviving], &warnings, sample_record());
        settle(&records, 1).await;
        settle(&events, 1).await;
        let event = &events.lock().expect("lock")[0];
        assert_eq!(event.event, "audit_channel_failure");
        assert!(event.message.contains("failing"));
    }

    #[test]
    fn record_serializes_stable_status_labels() {
        let payload = serde_json::to_value(sample_record()).expect("payload");
        assert_eq!(payload["status"], "SUCCESS");
        assert_eq!(payload["row_count"], 7);
    }
}
