// Private module declaration
mod server;

use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};

// Re-export for public API
pub use server::start_metrics_server;

// ============================================================================
// Metrics - Prometheus instrumentation for the runtime
// ============================================================================
//
// Covers the full event path:
// - append and publish throughput
// - fold/apply throughput and duration per view
// - out-of-order discards
// - dead-letter volume
// - rebuild runs
// - broker circuit breaker state
//
// Scraped via /metrics (see `server`).
//
// ============================================================================

pub struct Metrics {
    registry: Registry,

    pub events_appended: IntCounterVec,
    pub events_published: IntCounterVec,
    pub events_applied: IntCounterVec,
    pub events_discarded: IntCounterVec,
    pub apply_duration: HistogramVec,

    pub dead_letters_total: IntCounter,
    pub dead_letters_by_source: IntCounterVec,

    pub rebuild_runs: IntCounterVec,
    pub rebuilt_aggregates: IntCounterVec,

    pub circuit_breaker_state: IntGauge,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let events_appended = IntCounterVec::new(
            Opts::new("events_appended_total", "Events appended to the log"),
            &["command"],
        )?;
        registry.register(Box::new(events_appended.clone()))?;

        let events_published = IntCounterVec::new(
            Opts::new("events_published_total", "Events published to the broker"),
            &["topic"],
        )?;
        registry.register(Box::new(events_published.clone()))?;

        let events_applied = IntCounterVec::new(
            Opts::new("events_applied_total", "Events folded into a view"),
            &["view"],
        )?;
        registry.register(Box::new(events_applied.clone()))?;

        let events_discarded = IntCounterVec::new(
            Opts::new(
                "events_discarded_total",
                "Events discarded for arriving out of order",
            ),
            &["view"],
        )?;
        registry.register(Box::new(events_discarded.clone()))?;

        let apply_duration = HistogramVec::new(
            HistogramOpts::new("apply_duration_seconds", "Per-event fold duration")
                .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
            &["view"],
        )?;
        registry.register(Box::new(apply_duration.clone()))?;

        let dead_letters_total =
            IntCounter::new("dead_letters_total", "Events routed to dead letters")?;
        registry.register(Box::new(dead_letters_total.clone()))?;

        let dead_letters_by_source = IntCounterVec::new(
            Opts::new("dead_letters_by_source", "Dead letters by consumer"),
            &["source"],
        )?;
        registry.register(Box::new(dead_letters_by_source.clone()))?;

        let rebuild_runs = IntCounterVec::new(
            Opts::new("rebuild_runs_total", "Full rebuild invocations"),
            &["container", "outcome"],
        )?;
        registry.register(Box::new(rebuild_runs.clone()))?;

        let rebuilt_aggregates = IntCounterVec::new(
            Opts::new("rebuilt_aggregates_total", "Aggregates written during rebuilds"),
            &["container"],
        )?;
        registry.register(Box::new(rebuilt_aggregates.clone()))?;

        let circuit_breaker_state = IntGauge::new(
            "broker_circuit_state",
            "Broker circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)",
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        Ok(Self {
            registry,
            events_appended,
            events_published,
            events_applied,
            events_discarded,
            apply_duration,
            dead_letters_total,
            dead_letters_by_source,
            rebuild_runs,
            rebuilt_aggregates,
            circuit_breaker_state,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_append(&self, command: &str) {
        self.events_appended.with_label_values(&[command]).inc();
    }

    pub fn record_publish(&self, topic: &str) {
        self.events_published.with_label_values(&[topic]).inc();
    }

    pub fn record_applied(&self, view: &str, duration_secs: f64) {
        self.events_applied.with_label_values(&[view]).inc();
        self.apply_duration
            .with_label_values(&[view])
            .observe(duration_secs);
    }

    pub fn record_out_of_order(&self, view: &str) {
        self.events_discarded.with_label_values(&[view]).inc();
    }

    pub fn record_dead_letter(&self, source: &str) {
        self.dead_letters_total.inc();
        self.dead_letters_by_source
            .with_label_values(&[source])
            .inc();
    }

    pub fn record_rebuild(&self, container: &str, cancelled: bool, rebuilt: usize) {
        let outcome = if cancelled { "cancelled" } else { "complete" };
        self.rebuild_runs
            .with_label_values(&[container, outcome])
            .inc();
        self.rebuilt_aggregates
            .with_label_values(&[container])
            .inc_by(rebuilt as u64);
    }

    pub fn set_circuit_state(&self, state: i64) {
        self.circuit_breaker_state.set(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_holds_all_families() {
        let metrics = Metrics::new().unwrap();
        metrics.record_append("Create_Site");
        metrics.record_dead_letter("site-consumer");
        assert!(metrics.registry.gather().len() > 0);
    }

    #[test]
    fn applied_counter_increments_per_view() {
        let metrics = Metrics::new().unwrap();
        metrics.record_applied("Site", 0.002);
        metrics.record_applied("Site", 0.004);

        let gathered = metrics.registry.gather();
        let applied = gathered
            .iter()
            .find(|m| m.name() == "events_applied_total")
            .unwrap();
        assert_eq!(applied.metric[0].counter.value, Some(2.0));
    }

    #[test]
    fn dead_letters_count_total_and_by_source() {
        let metrics = Metrics::new().unwrap();
        metrics.record_dead_letter("site-consumer");
        metrics.record_dead_letter("dashboard-consumer");

        let gathered = metrics.registry.gather();
        let total = gathered
            .iter()
            .find(|m| m.name() == "dead_letters_total")
            .unwrap();
        assert_eq!(total.metric[0].counter.value, Some(2.0));

        let by_source = gathered
            .iter()
            .find(|m| m.name() == "dead_letters_by_source")
            .unwrap();
        assert_eq!(by_source.metric.len(), 2);
    }

    #[test]
    fn rebuild_outcomes_are_labeled() {
        let metrics = Metrics::new().unwrap();
        metrics.record_rebuild("Site", false, 10);
        metrics.record_rebuild("Site", true, 3);

        let gathered = metrics.registry.gather();
        let runs = gathered
            .iter()
            .find(|m| m.name() == "rebuild_runs_total")
            .unwrap();
        assert_eq!(runs.metric.len(), 2);
    }
}
