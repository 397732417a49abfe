//! # Metrics
//!
//! Prometheus metrics for monitoring the operator.
//!
//! ## Metrics Exposed
//!
//! - `taskcluster_operator_reconciliations_total` - Total number of reconciliations
//! - `taskcluster_operator_reconciliation_errors_total` - Reconciliation errors by reason
//! - `taskcluster_operator_reconciliation_duration_seconds` - Duration of reconciliation passes
//! - `taskcluster_operator_children_applied_total` - Child resources applied
//! - `taskcluster_operator_children_pruned_total` - Child resources pruned
//! - `taskcluster_operator_credential_operations_total` - Database and broker credential operations
//! - `taskcluster_operator_requeues_total` - Requeues by reason

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, Registry};
use std::sync::LazyLock;

// Metrics
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "taskcluster_operator_reconciliations_total",
        "Total number of reconciliations",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "taskcluster_operator_reconciliation_errors_total",
            "Total number of reconciliation errors by reason",
        ),
        &["reason"],
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "taskcluster_operator_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static CHILDREN_APPLIED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "taskcluster_operator_children_applied_total",
        "Total number of child resources applied",
    )
    .expect("Failed to create CHILDREN_APPLIED_TOTAL metric - this should never happen")
});

static CHILDREN_PRUNED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "taskcluster_operator_children_pruned_total",
        "Total number of child resources pruned",
    )
    .expect("Failed to create CHILDREN_PRUNED_TOTAL metric - this should never happen")
});

static CREDENTIAL_OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "taskcluster_operator_credential_operations_total",
            "Total number of credential operations by backend and result",
        ),
        &["backend", "result"],
    )
    .expect("Failed to create CREDENTIAL_OPERATIONS_TOTAL metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "taskcluster_operator_requeues_total",
            "Total number of requeues by reason",
        ),
        &["reason"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Registration only fails when a metric is registered twice"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(CHILDREN_APPLIED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CHILDREN_PRUNED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CREDENTIAL_OPERATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;

    Ok(())
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors(reason: &str) {
    RECONCILIATION_ERRORS_TOTAL
        .with_label_values(&[reason])
        .inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

/// Record the children applied and pruned by one composite pass
pub fn record_composite_outcome(applied: usize, pruned: usize) {
    CHILDREN_APPLIED_TOTAL.inc_by(applied as u64);
    CHILDREN_PRUNED_TOTAL.inc_by(pruned as u64);
}

/// Record one credential operation against `backend` (`database` or `messaging`)
pub fn record_credential_operation(backend: &str, success: bool) {
    let result = if success { "success" } else { "error" };
    CREDENTIAL_OPERATIONS_TOTAL
        .with_label_values(&[backend, result])
        .inc();
}

pub fn increment_requeues(reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[reason]).inc();
}
