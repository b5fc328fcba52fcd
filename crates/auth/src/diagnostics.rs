//! Non-fatal anomaly reporting
//!
//! Token payloads come from a remote issuer and stored values come from a
//! backend the host may not control. Problems with either are recovered
//! locally and reported here instead of being returned as errors.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

/// Category of a recorded anomaly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnomalyKind {
    /// A known claim was present with an unexpected type
    UnexpectedClaimType,
    /// A persisted token could not be decoded or lacked a usable expiry
    MalformedStoredToken,
    /// A storage read failed and was degraded to "absent"
    StorageReadFailed,
    /// Removing keys after revocation or abort failed
    StorageCleanupFailed,
    /// Persisted expiry disagreed with the token's own `exp` claim
    ExpiryMismatch,
    /// Stored access token without its expiry marker (interrupted write)
    IncompleteStoredRecord,
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::UnexpectedClaimType => "unexpected_claim_type",
            Self::MalformedStoredToken => "malformed_stored_token",
            Self::StorageReadFailed => "storage_read_failed",
            Self::StorageCleanupFailed => "storage_cleanup_failed",
            Self::ExpiryMismatch => "expiry_mismatch",
            Self::IncompleteStoredRecord => "incomplete_stored_record",
        };
        f.write_str(name)
    }
}

/// Structured anomaly record `{kind, detail}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anomaly {
    pub kind: AnomalyKind,
    pub detail: String,
}

impl Anomaly {
    #[must_use]
    pub fn new(kind: AnomalyKind, detail: impl Into<String>) -> Self {
        Self { kind, detail: detail.into() }
    }
}

/// Receiver for anomaly records
///
/// Implementations must not block; they run inline with token operations.
pub trait DiagnosticsSink: Send + Sync {
    /// Record one anomaly
    fn record(&self, anomaly: Anomaly);
}

/// Sink that forwards anomalies to `tracing` at WARN level
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn record(&self, anomaly: Anomaly) {
        warn!(kind = %anomaly.kind, detail = %anomaly.detail, "Token anomaly");
    }
}

/// Sink that keeps every anomaly in memory
///
/// Useful for hosts that batch diagnostics and for assertions in tests.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<Anomaly>>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded anomalies in arrival order
    #[must_use]
    pub fn records(&self) -> Vec<Anomaly> {
        self.records.lock().clone()
    }

    /// Number of anomalies of the given kind
    #[must_use]
    pub fn count(&self, kind: AnomalyKind) -> usize {
        self.records.lock().iter().filter(|a| a.kind == kind).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl DiagnosticsSink for MemorySink {
    fn record(&self, anomaly: Anomaly) {
        self.records.lock().push(anomaly);
    }
}

/// Optional sink handle; absence is a no-op
#[derive(Clone, Default)]
pub(crate) struct Diagnostics {
    sink: Option<Arc<dyn DiagnosticsSink>>,
}

impl Diagnostics {
    pub(crate) fn new(sink: Option<Arc<dyn DiagnosticsSink>>) -> Self {
        Self { sink }
    }

    pub(crate) fn report(&self, kind: AnomalyKind, detail: impl Into<String>) {
        if let Some(sink) = &self.sink {
            sink.record(Anomaly::new(kind, detail));
        }
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics").field("sink", &self.sink.is_some()).finish()
    }
}
