use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use serde::Serialize;
use switchboard_core::{
    ClassificationResult, FeedbackRecord, Intent, MethodWeights, PatternMatcher, RouterConfig,
    TemplateCatalog,
};
use switchboard_ml::{load_jsonl, RetrainReport, TrainedClassifier, TrainingEvent, TrainingOptions};
use switchboard_observability::{
    AppMetrics, ClassificationEvent, FanoutSink, MetricsSink, MetricsSnapshot, TelemetrySink,
    TracingSink,
};
use switchboard_semantic::{
    Embedder, EmbedderStats, EmbeddingProvider, HttpEmbeddingProvider, SemanticMatcher,
};
use switchboard_storage::{ModelRepository, Store};
use tracing::{debug, info, instrument, warn};

use crate::ensemble::{EnsembleCoordinator, VotingRules};
use crate::feedback::FeedbackLoop;
use crate::matcher::Matcher;

const RECENT_TRAINING_EVENTS: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct FeedbackOutcome {
    pub buffered: usize,
    pub threshold: usize,
    /// Present when this record completed a batch.
    pub retrain: Option<RetrainReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RouterStats {
    pub weights: MethodWeights,
    pub confidence_threshold: f32,
    pub min_vote_confidence: f32,
    pub semantic_threshold: f32,
    pub catalog_templates: usize,
    pub embedding: EmbedderStats,
    pub model_version: u64,
    pub vocabulary_size: usize,
    pub hidden_size: usize,
    pub intents: Vec<Intent>,
    pub training_events: usize,
    pub recent_training: Vec<TrainingEvent>,
    pub feedback_buffered: usize,
    pub feedback_threshold: usize,
    pub storage: Option<&'static str>,
    pub metrics: MetricsSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub provider_configured: bool,
    pub model_valid: bool,
    pub model_version: u64,
    pub catalog_templates: usize,
    pub intents: usize,
}

/// Entry point for consumers: classification, feedback and diagnostics over one ensemble.
pub struct IntentRouter {
    config: RouterConfig,
    catalog: Arc<TemplateCatalog>,
    coordinator: EnsembleCoordinator<Matcher>,
    classifier: Arc<TrainedClassifier>,
    embedder: Arc<Embedder>,
    feedback: FeedbackLoop,
    store: Option<Store>,
    telemetry: FanoutSink,
    metrics: Arc<AppMetrics>,
}

impl IntentRouter {
    /// Loads the catalog, embeds semantic seeds, and trains or loads the classifier.
    pub async fn build(config: RouterConfig) -> Result<Self> {
        config.validate()?;

        let catalog = match &config.catalog_path {
            Some(path) => TemplateCatalog::from_path(path)?,
            None => TemplateCatalog::builtin()?,
        };

        let store = match &config.database_url {
            Some(url) => Some(Store::sqlite(url, config.model_retention).await?),
            None => None,
        };

        let classifier = Arc::new(bootstrap_classifier(&config, &catalog).await?);
        if let Some(store) = &store {
            adopt_stored_model(store, &classifier).await?;
        }

        let provider = match &config.embedding_api_key {
            Some(key) => {
                let provider = HttpEmbeddingProvider::new(
                    &config.embedding_url,
                    config.embedding_model.clone(),
                    key.clone(),
                    config.embedding_dims,
                    config.embedding_timeout(),
                )?;
                Some(Arc::new(provider) as Arc<dyn EmbeddingProvider>)
            }
            None => None,
        };

        let embedder = Arc::new(Embedder::new(
            provider,
            config.embedding_dims,
            config.embedding_cache_capacity,
            config.embedding_timeout(),
        ));

        let semantic = SemanticMatcher::build(
            &catalog,
            embedder.clone(),
            config.semantic_threshold,
            config.semantic_alternatives,
        )
        .await;
        let pattern = PatternMatcher::new(&catalog, config.pattern_confidence)?;

        let coordinator = EnsembleCoordinator::new(
            vec![
                Matcher::Pattern(pattern),
                Matcher::Semantic(semantic),
                Matcher::Trained(classifier.clone()),
            ],
            VotingRules::from(&config),
            config.method_timeout(),
        );

        let metrics = AppMetrics::shared();
        let telemetry = FanoutSink::new(vec![
            Arc::new(TracingSink),
            Arc::new(MetricsSink::new(metrics.clone())),
        ]);

        info!(
            templates = catalog.len(),
            intents = catalog.intents().len(),
            provider = embedder.has_provider(),
            model_version = classifier.version(),
            storage = store.as_ref().map(Store::backend),
            "intent router ready"
        );

        Ok(Self {
            feedback: FeedbackLoop::new(config.feedback_threshold),
            config,
            catalog: Arc::new(catalog),
            coordinator,
            classifier,
            embedder,
            store,
            telemetry,
            metrics,
        })
    }

    pub fn add_sink(&mut self, sink: Arc<dyn TelemetrySink>) {
        self.telemetry.push(sink);
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn catalog(&self) -> &TemplateCatalog {
        &self.catalog
    }

    pub fn classifier(&self) -> &Arc<TrainedClassifier> {
        &self.classifier
    }

    pub fn metrics(&self) -> &Arc<AppMetrics> {
        &self.metrics
    }

    pub fn feedback_len(&self) -> usize {
        self.feedback.len()
    }

    #[instrument(skip(self, query))]
    pub async fn classify(&self, query: &str) -> ClassificationResult {
        let started = Instant::now();
        let decision = self.coordinator.route(query).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        self.metrics
            .set_fallback_embeddings(self.embedder.stats().fallback_calls);
        let event = ClassificationEvent::new(
            query,
            &decision.result,
            latency_ms,
            decision.failed_methods(),
        );
        self.emit(&event);

        decision.result
    }

    /// Buffers one correction. The call that fills the buffer runs the retrain before
    /// returning, so later classifications see the new weights.
    #[instrument(skip(self, query))]
    pub async fn record_feedback(
        &self,
        query: &str,
        predicted_intent: Intent,
        actual_intent: Intent,
        was_correct: bool,
    ) -> Result<FeedbackOutcome> {
        self.metrics.inc_feedback();
        let record = FeedbackRecord::new(query, predicted_intent, actual_intent, was_correct);

        let Some(batch) = self.feedback.record(record) else {
            return Ok(FeedbackOutcome {
                buffered: self.feedback.len(),
                threshold: self.feedback.threshold(),
                retrain: None,
            });
        };

        let samples = FeedbackLoop::training_samples(&batch);
        info!(
            batch = batch.len(),
            correct = samples.len(),
            "feedback threshold reached; retraining classifier"
        );

        let report = tokio::spawn(retrain_and_persist(
            self.classifier.clone(),
            self.metrics.clone(),
            self.store.clone(),
            samples,
        ))
        .await
        .context("retrain task panicked")??;

        Ok(FeedbackOutcome {
            buffered: self.feedback.len(),
            threshold: self.feedback.threshold(),
            retrain: Some(report),
        })
    }

    pub fn stats(&self) -> RouterStats {
        let model = self.classifier.snapshot();
        let history = &model.history;
        let recent_start = history.len().saturating_sub(RECENT_TRAINING_EVENTS);

        RouterStats {
            weights: self.config.weights,
            confidence_threshold: self.config.confidence_threshold,
            min_vote_confidence: self.config.min_vote_confidence,
            semantic_threshold: self.config.semantic_threshold,
            catalog_templates: self.catalog.len(),
            embedding: self.embedder.stats(),
            model_version: model.version,
            vocabulary_size: model.vocabulary.len(),
            hidden_size: model.hidden.outputs,
            intents: model.intents.clone(),
            training_events: history.len(),
            recent_training: history[recent_start..].to_vec(),
            feedback_buffered: self.feedback.len(),
            feedback_threshold: self.feedback.threshold(),
            storage: self.store.as_ref().map(Store::backend),
            metrics: self.metrics.snapshot(),
        }
    }

    pub fn health_check(&self) -> HealthReport {
        let model = self.classifier.snapshot();
        let model_valid = model.validate().is_ok();
        let healthy = model_valid && !model.intents.is_empty() && !self.catalog.is_empty();

        HealthReport {
            status: if healthy { "ok" } else { "degraded" },
            provider_configured: self.embedder.has_provider(),
            model_valid,
            model_version: model.version,
            catalog_templates: self.catalog.len(),
            intents: model.intents.len(),
        }
    }

    fn emit(&self, event: &ClassificationEvent) {
        match catch_unwind(AssertUnwindSafe(|| self.telemetry.record(event))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => debug!(error = %err, "telemetry sink failed"),
            Err(_) => debug!("telemetry sink panicked"),
        }
    }
}

/// Retrain plus its bookkeeping, spawned on its own task: a dropped feedback caller
/// cannot leave a published model uncounted or unsaved.
async fn retrain_and_persist(
    classifier: Arc<TrainedClassifier>,
    metrics: Arc<AppMetrics>,
    store: Option<Store>,
    samples: Vec<(String, Intent)>,
) -> Result<RetrainReport> {
    let trainer = classifier.clone();
    let report = tokio::task::spawn_blocking(move || trainer.retrain(&samples))
        .await
        .context("retrain task did not complete")??;

    if report.applied {
        metrics.inc_retrain();
        if let Some(store) = &store {
            let snapshot = classifier.snapshot();
            if let Err(err) = store.save_model(&snapshot).await {
                warn!(error = %err, version = snapshot.version, "failed persisting model snapshot");
            }
        }
    }

    Ok(report)
}

async fn bootstrap_classifier(
    config: &RouterConfig,
    catalog: &TemplateCatalog,
) -> Result<TrainedClassifier> {
    let options = TrainingOptions::from(config);

    if let Some(path) = &config.model_path {
        let classifier = TrainedClassifier::load(path, options)?;
        info!(path = %path.display(), version = classifier.version(), "classifier loaded");
        return Ok(classifier);
    }

    let samples = match &config.dataset_path {
        Some(path) => load_jsonl(path)?,
        None => catalog.labeled_examples(),
    };

    let classifier = tokio::task::spawn_blocking(move || TrainedClassifier::train(&samples, options))
        .await
        .context("training task did not complete")??;
    Ok(classifier)
}

/// Prefers a stored snapshot that is newer than the bootstrapped model.
async fn adopt_stored_model(store: &Store, classifier: &TrainedClassifier) -> Result<()> {
    let Some(stored) = store.load_latest().await? else {
        return Ok(());
    };
    if stored.version <= classifier.version() {
        return Ok(());
    }

    let version = stored.version;
    match classifier.publish(stored) {
        Ok(()) => info!(version, "restored classifier snapshot from storage"),
        Err(err) => warn!(error = %err, version, "ignoring stored classifier snapshot"),
    }
    Ok(())
}
