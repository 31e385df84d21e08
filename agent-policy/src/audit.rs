//! Audit records emitted for every scoped capability invocation.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::PolicyResult;

/// One capability access attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditRecord {
    /// Capability that was invoked.
    pub capability_id: String,
    /// Caller user id, or [`crate::ANONYMOUS_USER`].
    pub user_id: String,
    /// Scopes held by the caller after expansion.
    pub held_scopes: Vec<String>,
    /// Scopes the capability requires.
    pub required_scopes: Vec<String>,
    /// Whether access was granted and the executor succeeded.
    pub success: bool,
    /// Wall-clock time spent in the capability.
    pub duration: Duration,
    /// When the record was produced.
    pub recorded_at: DateTime<Utc>,
}

/// Destination for audit records.
///
/// Sinks report failures through the returned result; callers log and
/// continue so auditing never fails the invocation it describes.
pub trait AuditSink: Send + Sync {
    /// Persists the supplied record.
    ///
    /// # Errors
    ///
    /// Returns [`crate::PolicyError::Audit`] when the record could not be stored.
    fn record(&self, record: &AuditRecord) -> PolicyResult<()>;
}

/// Sink that writes records to the `audit` tracing target.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: &AuditRecord) -> PolicyResult<()> {
        #[allow(clippy::cast_possible_truncation)]
        let elapsed_ms = record.duration.as_millis() as u64;
        if record.success {
            info!(
                target: "audit",
                capability_id = %record.capability_id,
                user_id = %record.user_id,
                held = ?record.held_scopes,
                required = ?record.required_scopes,
                elapsed_ms,
                "capability access granted"
            );
        } else {
            warn!(
                target: "audit",
                capability_id = %record.capability_id,
                user_id = %record.user_id,
                held = ?record.held_scopes,
                required = ?record.required_scopes,
                elapsed_ms,
                "capability access failed"
            );
        }
        Ok(())
    }
}

/// Sink that keeps records in memory for later inspection.
#[derive(Debug, Default)]
pub struct CollectingAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl CollectingAuditSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every collected record.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().expect("audit sink poisoned").clone()
    }
}

impl AuditSink for CollectingAuditSink {
    fn record(&self, record: &AuditRecord) -> PolicyResult<()> {
        self.records
            .lock()
            .map_err(|_| crate::PolicyError::audit("collecting sink poisoned"))?
            .push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(success: bool) -> AuditRecord {
        AuditRecord {
            capability_id: "files.read".into(),
            user_id: "alice".into(),
            held_scopes: vec!["files:read".into()],
            required_scopes: vec!["files:read".into()],
            success,
            duration: Duration::from_millis(12),
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn collecting_sink_keeps_records() {
        let sink = CollectingAuditSink::new();
        sink.record(&record(true)).unwrap();
        sink.record(&record(false)).unwrap();
        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert!(records[0].success);
        assert!(!records[1].success);
    }

    #[test]
    fn tracing_sink_never_fails() {
        assert!(TracingAuditSink.record(&record(false)).is_ok());
    }
}
