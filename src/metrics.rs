//! Metrics sink owned by whoever builds the limiter.
//!
//! Nothing here is process-global: each `PrometheusMetrics` carries its own
//! registry, so two limiters (or two tests) never share counters.

use crate::Decision;
use crate::error::RateLimitError;
use crate::sentinel::MasterEndpoint;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

pub trait MetricsSink: Send + Sync {
    fn record_decision(&self, decision: &Decision);
    fn record_store_error(&self, error: &RateLimitError);
    fn record_master_change(&self, from: &MasterEndpoint, to: &MasterEndpoint);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_decision(&self, _decision: &Decision) {}
    fn record_store_error(&self, _error: &RateLimitError) {}
    fn record_master_change(&self, _from: &MasterEndpoint, _to: &MasterEndpoint) {}
}

#[derive(Clone)]
pub struct PrometheusMetrics {
    registry: Registry,
    decisions: IntCounterVec,
    store_errors: IntCounterVec,
    master_changes: IntCounter,
}

impl PrometheusMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let decisions = IntCounterVec::new(
            Opts::new("rate_limit_decisions_total", "Rate limit decisions by outcome"),
            &["outcome"],
        )?;
        let store_errors = IntCounterVec::new(
            Opts::new("rate_limit_store_errors_total", "Store faults seen by the limiter"),
            &["kind"],
        )?;
        let master_changes = IntCounter::new(
            "rate_limit_master_changes_total",
            "Times the resolved master address changed",
        )?;

        registry.register(Box::new(decisions.clone()))?;
        registry.register(Box::new(store_errors.clone()))?;
        registry.register(Box::new(master_changes.clone()))?;

        Ok(Self {
            registry,
            decisions,
            store_errors,
            master_changes,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn decisions(&self, outcome: &str) -> u64 {
        self.decisions.with_label_values(&[outcome]).get()
    }

    pub fn store_errors(&self, kind: &str) -> u64 {
        self.store_errors.with_label_values(&[kind]).get()
    }

    pub fn master_changes(&self) -> u64 {
        self.master_changes.get()
    }

    /// Text exposition format for a `/metrics` endpoint
    pub fn encode(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

impl MetricsSink for PrometheusMetrics {
    fn record_decision(&self, decision: &Decision) {
        self.decisions
            .with_label_values(&[decision.outcome()])
            .inc();
    }

    fn record_store_error(&self, error: &RateLimitError) {
        self.store_errors.with_label_values(&[error.kind()]).inc();
    }

    fn record_master_change(&self, _from: &MasterEndpoint, _to: &MasterEndpoint) {
        self.master_changes.inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_per_instance() {
        let a = PrometheusMetrics::new().unwrap();
        let b = PrometheusMetrics::new().unwrap();

        a.record_decision(&Decision::admitted(10, 9, 60));
        a.record_decision(&Decision::failed_open(10));
        a.record_store_error(&RateLimitError::StoreUnavailable("down".into()));

        assert_eq!(a.decisions("allowed"), 1);
        assert_eq!(a.decisions("failed_open"), 1);
        assert_eq!(a.store_errors("store_unavailable"), 1);
        assert_eq!(b.decisions("allowed"), 0);
    }

    #[test]
    fn test_encode_contains_series() {
        let metrics = PrometheusMetrics::new().unwrap();
        metrics.record_master_change(
            &MasterEndpoint::new("10.0.0.1", 6379),
            &MasterEndpoint::new("10.0.0.2", 6379),
        );
        let text = metrics.encode().unwrap();
        assert!(text.contains("rate_limit_master_changes_total 1"));
    }
}
