use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

mod telemetry;

pub use telemetry::{ClassificationEvent, FanoutSink, MetricsSink, TelemetrySink, TracingSink};

static TRACING_INIT: OnceCell<()> = OnceCell::new();

#[derive(Debug, Default)]
pub struct AppMetrics {
    classifications_total: AtomicU64,
    unknown_total: AtomicU64,
    method_failures_total: AtomicU64,
    fallback_embeddings_total: AtomicU64,
    feedback_total: AtomicU64,
    retrains_total: AtomicU64,
    total_latency_millis: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub classifications_total: u64,
    pub unknown_total: u64,
    pub method_failures_total: u64,
    pub fallback_embeddings_total: u64,
    pub feedback_total: u64,
    pub retrains_total: u64,
    pub avg_latency_millis: f64,
}

impl AppMetrics {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inc_classification(&self) {
        self.classifications_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_unknown(&self) {
        self.unknown_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_method_failure(&self) {
        self.method_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Fallback embeddings are counted by the embedder; this mirrors its running total.
    pub fn set_fallback_embeddings(&self, total: u64) {
        self.fallback_embeddings_total
            .store(total, Ordering::Relaxed);
    }

    pub fn inc_feedback(&self) {
        self.feedback_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_retrain(&self) {
        self.retrains_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn observe_latency(&self, duration: Duration) {
        self.total_latency_millis
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let classifications = self.classifications_total.load(Ordering::Relaxed);
        let latency = self.total_latency_millis.load(Ordering::Relaxed);

        MetricsSnapshot {
            classifications_total: classifications,
            unknown_total: self.unknown_total.load(Ordering::Relaxed),
            method_failures_total: self.method_failures_total.load(Ordering::Relaxed),
            fallback_embeddings_total: self.fallback_embeddings_total.load(Ordering::Relaxed),
            feedback_total: self.feedback_total.load(Ordering::Relaxed),
            retrains_total: self.retrains_total.load(Ordering::Relaxed),
            avg_latency_millis: if classifications == 0 {
                0.0
            } else {
                latency as f64 / classifications as f64
            },
        }
    }
}

pub fn init_tracing(service_name: &str) {
    TRACING_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}=info,switchboard_api=info,switchboard_router=info,switchboard_semantic=info,switchboard_ml=info",
                service_name
            ))
        });

        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .with_span_list(true)
            .init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_averages_latency_per_classification() {
        let metrics = AppMetrics::default();
        metrics.inc_classification();
        metrics.inc_classification();
        metrics.observe_latency(Duration::from_millis(10));
        metrics.observe_latency(Duration::from_millis(30));
        metrics.inc_unknown();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.classifications_total, 2);
        assert_eq!(snapshot.unknown_total, 1);
        assert!((snapshot.avg_latency_millis - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_snapshot_has_zero_latency() {
        assert_eq!(AppMetrics::default().snapshot().avg_latency_millis, 0.0);
    }
}
