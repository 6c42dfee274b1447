mod server;

use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry};

pub use server::start_metrics_server;

// ============================================================================
// Metrics Module - Prometheus metrics for the order lifecycle
// ============================================================================
//
// Covers:
// - Orders created and status updates recorded
// - Payment results and rejected payment transitions
// - Store failures by kind
// - Lifecycle operation latency
//
// Exposed for scraping on /metrics by the metrics server.
// ============================================================================

pub struct Metrics {
    registry: Registry,

    // Lifecycle
    pub orders_created: IntCounter,
    pub status_updates: IntCounterVec,
    pub operation_duration: HistogramVec,

    // Payments
    pub payment_results: IntCounterVec,
    pub rejected_transitions: IntCounter,

    // Storage
    pub store_failures: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let orders_created = IntCounter::new("orders_created_total", "Total orders created")?;
        registry.register(Box::new(orders_created.clone()))?;

        let status_updates = IntCounterVec::new(
            Opts::new("order_status_updates_total", "Status updates recorded"),
            &["terminal"],
        )?;
        registry.register(Box::new(status_updates.clone()))?;

        let operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "order_operation_duration_seconds",
                "Lifecycle operation duration",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["operation"],
        )?;
        registry.register(Box::new(operation_duration.clone()))?;

        let payment_results = IntCounterVec::new(
            Opts::new("payment_results_total", "Payment outcomes applied"),
            &["outcome"],
        )?;
        registry.register(Box::new(payment_results.clone()))?;

        let rejected_transitions = IntCounter::new(
            "payment_transitions_rejected_total",
            "Payment status changes refused as moving away from paid",
        )?;
        registry.register(Box::new(rejected_transitions.clone()))?;

        let store_failures = IntCounterVec::new(
            Opts::new("store_failures_total", "Failed units of work by error kind"),
            &["operation", "kind"],
        )?;
        registry.register(Box::new(store_failures.clone()))?;

        Ok(Self {
            registry,
            orders_created,
            status_updates,
            operation_duration,
            payment_results,
            rejected_transitions,
            store_failures,
        })
    }

    /// Registry handed to the metrics server.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_order_created(&self) {
        self.orders_created.inc();
    }

    pub fn record_status_update(&self, terminal: bool) {
        let label = if terminal { "true" } else { "false" };
        self.status_updates.with_label_values(&[label]).inc();
    }

    pub fn record_payment_result(&self, outcome: &str) {
        self.payment_results.with_label_values(&[outcome]).inc();
    }

    pub fn record_rejected_transition(&self) {
        self.rejected_transitions.inc();
    }

    pub fn record_store_failure(&self, operation: &str, kind: &str) {
        self.store_failures.with_label_values(&[operation, kind]).inc();
    }

    pub fn observe_duration(&self, operation: &str, duration_secs: f64) {
        self.operation_duration
            .with_label_values(&[operation])
            .observe(duration_secs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        metrics.record_order_created();
        assert!(!metrics.registry().gather().is_empty());
    }

    #[test]
    fn test_status_updates_split_by_terminal() {
        let metrics = Metrics::new().unwrap();
        metrics.record_status_update(false);
        metrics.record_status_update(false);
        metrics.record_status_update(true);

        let gathered = metrics.registry().gather();
        let updates = gathered
            .iter()
            .find(|m| m.name() == "order_status_updates_total")
            .unwrap();
        assert_eq!(updates.metric.len(), 2);
    }

    #[test]
    fn test_rejected_transitions_counted() {
        let metrics = Metrics::new().unwrap();
        metrics.record_rejected_transition();
        assert_eq!(metrics.rejected_transitions.get(), 1);
    }
}
