//! Observability infrastructure for analysis runs
//!
//! Provides:
//! - Prometheus metrics (evaluation latency, sizing latency, run counters)
//! - Structured logging of run events with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, Encoder, Histogram,
    IntCounter, IntGauge, TextEncoder,
};
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::models::ViolationRecord;

/// Histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<AnalyzerMetricsInner> = OnceLock::new();

struct AnalyzerMetricsInner {
    evaluation_latency_seconds: Histogram,
    sizing_latency_seconds: Histogram,
    rules_evaluated: IntCounter,
    rule_failures: IntCounter,
    violations: IntCounter,
    missing_limit_entities: IntGauge,
    containers_sized: IntGauge,
}

impl AnalyzerMetricsInner {
    fn new() -> Self {
        Self {
            evaluation_latency_seconds: register_histogram!(
                "rightsize_rule_evaluation_latency_seconds",
                "Time spent evaluating one rule against one series",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register rule_evaluation_latency_seconds"),

            sizing_latency_seconds: register_histogram!(
                "rightsize_sizing_latency_seconds",
                "Time spent computing sizing for one data window",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register sizing_latency_seconds"),

            rules_evaluated: register_int_counter!(
                "rightsize_rules_evaluated_total",
                "Total number of rule evaluations that completed"
            )
            .expect("Failed to register rules_evaluated"),

            rule_failures: register_int_counter!(
                "rightsize_rule_failures_total",
                "Total number of rules rejected at load or evaluation time"
            )
            .expect("Failed to register rule_failures"),

            violations: register_int_counter!(
                "rightsize_violation_records_total",
                "Total number of entity violation records produced"
            )
            .expect("Failed to register violations"),

            missing_limit_entities: register_int_gauge!(
                "rightsize_missing_limit_entities",
                "Entities excluded from the last evaluation for lack of a limit"
            )
            .expect("Failed to register missing_limit_entities"),

            containers_sized: register_int_gauge!(
                "rightsize_containers_sized",
                "Containers with a recommendation in the last sizing run"
            )
            .expect("Failed to register containers_sized"),
        }
    }
}

/// Analyzer metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct AnalyzerMetrics {
    _private: (),
}

impl Default for AnalyzerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalyzerMetrics {
    /// Create a metrics handle (registers global metrics on first call)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AnalyzerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AnalyzerMetricsInner {
        GLOBAL_METRICS.get_or_init(AnalyzerMetricsInner::new)
    }

    pub fn observe_evaluation_latency(&self, duration_secs: f64) {
        self.inner().evaluation_latency_seconds.observe(duration_secs);
    }

    pub fn observe_sizing_latency(&self, duration_secs: f64) {
        self.inner().sizing_latency_seconds.observe(duration_secs);
    }

    /// Count a completed evaluation and its violation records
    pub fn record_evaluation(&self, violation_records: usize) {
        self.inner().rules_evaluated.inc();
        self.inner().violations.inc_by(violation_records as u64);
    }

    pub fn inc_rule_failures(&self) {
        self.inner().rule_failures.inc();
    }

    pub fn set_missing_limit_entities(&self, count: i64) {
        self.inner().missing_limit_entities.set(count);
    }

    pub fn set_containers_sized(&self, count: i64) {
        self.inner().containers_sized.set(count);
    }
}

/// Render every registered metric in the Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

/// Structured logger for analysis run events
#[derive(Clone)]
pub struct StructuredLogger {
    run_name: String,
}

impl StructuredLogger {
    pub fn new(run_name: impl Into<String>) -> Self {
        Self {
            run_name: run_name.into(),
        }
    }

    pub fn log_run_started(&self, command: &str, time_range: &str) {
        info!(
            event = "run_started",
            run = %self.run_name,
            command = %command,
            time_range = %time_range,
            "Analysis run started"
        );
    }

    pub fn log_run_finished(&self, command: &str, failures: usize, elapsed_secs: f64) {
        if failures == 0 {
            info!(
                event = "run_finished",
                run = %self.run_name,
                command = %command,
                failures = failures,
                elapsed_secs = elapsed_secs,
                "Analysis run finished"
            );
        } else {
            warn!(
                event = "run_finished",
                run = %self.run_name,
                command = %command,
                failures = failures,
                elapsed_secs = elapsed_secs,
                "Analysis run finished with failures"
            );
        }
    }

    /// Log the outcome of one rule in one namespace
    pub fn log_rule_evaluated(&self, namespace: &str, rule: &str, records: &[ViolationRecord]) {
        let worst = records
            .iter()
            .max_by(|a, b| a.violation_pct.total_cmp(&b.violation_pct));
        info!(
            event = "rule_evaluated",
            run = %self.run_name,
            namespace = %namespace,
            rule = %rule,
            violating_entities = records.len(),
            worst_entity = ?worst.map(|r| r.entity.to_string()),
            worst_pct = ?worst.map(|r| r.violation_pct),
            "Rule evaluated"
        );
    }

    pub fn log_rule_failed(&self, namespace: &str, rule: &str, error: &str) {
        warn!(
            event = "rule_failed",
            run = %self.run_name,
            namespace = %namespace,
            rule = %rule,
            error = %error,
            "Rule skipped"
        );
    }

    pub fn log_missing_limits(&self, namespace: &str, rule: &str, entities: usize) {
        warn!(
            event = "missing_limits",
            run = %self.run_name,
            namespace = %namespace,
            rule = %rule,
            entities = entities,
            "Entities without limit excluded from ratio"
        );
    }

    pub fn log_sizing_computed(&self, window: &str, containers: usize) {
        info!(
            event = "sizing_computed",
            run = %self.run_name,
            window = %window,
            containers = containers,
            "Sizing computed"
        );
    }
}
