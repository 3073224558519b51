//! Prometheus metrics for the interception pipeline
//!
//! Counters are bumped inline by the hooks, the policy engine and the audit
//! sink. `gather_text()` renders the registry in the text exposition format.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, Counter, CounterVec, Encoder, Gauge,
    TextEncoder,
};

lazy_static! {
    // ─────────────────────────────────────────────────────────────────────────────
    // Policy Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Policy decisions, by operation kind and outcome.
    ///
    /// Labels:
    /// - op: "read", "write", "rename", "unlink", "create"
    /// - decision: "allow", "deny", "delay"
    pub static ref DECISIONS: CounterVec = register_counter_vec!(
        "mtdfs_decisions_total",
        "Policy decisions taken for intercepted operations",
        &["op", "decision"]
    ).expect("failed to register DECISIONS metric");

    /// Number of process identifiers currently in the block set.
    pub static ref BLOCKED_PROCESSES: Gauge = register_gauge!(
        "mtdfs_blocked_processes",
        "Process identifiers confirmed malicious and block-listed"
    ).expect("failed to register BLOCKED_PROCESSES metric");

    /// Operations that waited out the delay grace period.
    pub static ref DELAYED_OPERATIONS: Counter = register_counter!(
        "mtdfs_delayed_operations_total",
        "Modifying operations held back for the classifier grace period"
    ).expect("failed to register DELAYED_OPERATIONS metric");

    /// Failed reads of the classifier verdict artifact.
    pub static ref VERDICT_READ_FAILURES: Counter = register_counter!(
        "mtdfs_verdict_read_failures_total",
        "Classifier verdict artifact reads that failed"
    ).expect("failed to register VERDICT_READ_FAILURES metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Audit Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Operation events appended to the audit buffer.
    pub static ref AUDIT_ROWS: Counter = register_counter!(
        "mtdfs_audit_rows_total",
        "Operation events recorded by the audit sink"
    ).expect("failed to register AUDIT_ROWS metric");

    /// Audit windows flushed to an artifact.
    pub static ref AUDIT_WINDOWS: Counter = register_counter!(
        "mtdfs_audit_windows_total",
        "Audit windows written out"
    ).expect("failed to register AUDIT_WINDOWS metric");

    /// Windows whose records were dropped because the artifact could not be written.
    pub static ref AUDIT_FLUSH_FAILURES: Counter = register_counter!(
        "mtdfs_audit_flush_failures_total",
        "Audit windows dropped after an artifact write failure"
    ).expect("failed to register AUDIT_FLUSH_FAILURES metric");
}

/// Touch metrics so they show up in the registry before the first event.
pub fn init() {
    BLOCKED_PROCESSES.set(0.0);
    let _ = AUDIT_ROWS.get();
    let _ = AUDIT_WINDOWS.get();
}

/// Render every registered metric in the Prometheus text format.
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
