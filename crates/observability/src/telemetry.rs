use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use switchboard_core::{ClassificationResult, Intent, Method};
use tracing::info;

use crate::AppMetrics;

/// What a sink sees for every classification.
#[derive(Debug, Clone, Serialize)]
pub struct ClassificationEvent {
    pub at: DateTime<Utc>,
    pub query: String,
    pub intent: Intent,
    pub confidence: f32,
    pub method: Method,
    pub latency_ms: u64,
    pub failed_methods: Vec<Method>,
}

impl ClassificationEvent {
    pub fn new(
        query: &str,
        result: &ClassificationResult,
        latency_ms: u64,
        failed_methods: Vec<Method>,
    ) -> Self {
        Self {
            at: Utc::now(),
            query: query.to_string(),
            intent: result.intent.clone(),
            confidence: result.confidence,
            method: result.method,
            latency_ms,
            failed_methods,
        }
    }
}

/// Per-classification observer. Callers treat errors as non-fatal.
pub trait TelemetrySink: Send + Sync {
    fn record(&self, event: &ClassificationEvent) -> Result<()>;
}

pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn record(&self, event: &ClassificationEvent) -> Result<()> {
        info!(
            intent = %event.intent,
            confidence = event.confidence,
            method = %event.method,
            latency_ms = event.latency_ms,
            failed_methods = event.failed_methods.len(),
            "classification"
        );
        Ok(())
    }
}

/// Feeds the in-process counters and the `metrics` facade.
pub struct MetricsSink {
    metrics: Arc<AppMetrics>,
}

impl MetricsSink {
    pub fn new(metrics: Arc<AppMetrics>) -> Self {
        Self { metrics }
    }
}

impl TelemetrySink for MetricsSink {
    fn record(&self, event: &ClassificationEvent) -> Result<()> {
        self.metrics.inc_classification();
        self.metrics
            .observe_latency(std::time::Duration::from_millis(event.latency_ms));
        if event.intent.is_unknown() {
            self.metrics.inc_unknown();
        }
        for _ in &event.failed_methods {
            self.metrics.inc_method_failure();
        }

        metrics::counter!("switchboard_classifications_total", "method" => event.method.as_code())
            .increment(1);
        metrics::histogram!("switchboard_classification_latency_ms")
            .record(event.latency_ms as f64);
        Ok(())
    }
}

#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn TelemetrySink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn TelemetrySink>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn TelemetrySink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl TelemetrySink for FanoutSink {
    fn record(&self, event: &ClassificationEvent) -> Result<()> {
        // Every sink sees the event; the first failure is reported afterwards.
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(err) = sink.record(event) {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
