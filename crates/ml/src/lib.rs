mod dataset;
mod features;
mod mlp;
mod network;
mod trainer;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use switchboard_core::{ClassificationResult, Intent, IntentMatcher, Method, RouterError};
use tracing::{error, info};

pub use dataset::{load_jsonl, parse_jsonl};
pub use features::Vocabulary;
pub use mlp::IntentMlp;
pub use network::{ClassifierModel, Layer, TrainingEvent, TrainingKind, MAX_HISTORY};
pub use trainer::{retrain, train, EpochStats, RetrainReport, TrainingOptions};

/// Serves predictions from the current model snapshot and swaps in retrained snapshots.
///
/// Readers clone the `Arc` once per call, so an in-flight prediction keeps the snapshot
/// it started with while a retrain publishes the next one.
pub struct TrainedClassifier {
    current: RwLock<Arc<ClassifierModel>>,
    retrain_lock: Mutex<()>,
    options: TrainingOptions,
}

impl TrainedClassifier {
    pub fn new(model: ClassifierModel, options: TrainingOptions) -> Result<Self, RouterError> {
        model.validate()?;
        Ok(Self {
            current: RwLock::new(Arc::new(model)),
            retrain_lock: Mutex::new(()),
            options,
        })
    }

    pub fn train(samples: &[(String, Intent)], options: TrainingOptions) -> Result<Self, RouterError> {
        let model = train(samples, &options)?;
        Self::new(model, options)
    }

    pub fn load(path: impl AsRef<Path>, options: TrainingOptions) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed reading model at {}", path.as_ref().display()))?;
        let model: ClassifierModel =
            serde_json::from_str(&raw).context("model file is not a valid classifier")?;
        Ok(Self::new(model, options)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let snapshot = self.snapshot();
        let encoded = serde_json::to_string(snapshot.as_ref())?;
        fs::write(path.as_ref(), encoded)
            .with_context(|| format!("failed writing model to {}", path.as_ref().display()))
    }

    pub fn snapshot(&self) -> Arc<ClassifierModel> {
        self.current.read().clone()
    }

    pub fn version(&self) -> u64 {
        self.snapshot().version
    }

    pub fn options(&self) -> &TrainingOptions {
        &self.options
    }

    pub fn query_to_vector(&self, query: &str) -> Vec<f32> {
        self.snapshot().query_to_vector(query)
    }

    pub fn predict(&self, query: &str) -> ClassificationResult {
        self.snapshot().predict(query)
    }

    /// Replaces the current model after validating its dimensions.
    pub fn publish(&self, model: ClassifierModel) -> Result<(), RouterError> {
        model.validate()?;
        *self.current.write() = Arc::new(model);
        Ok(())
    }

    /// Incremental retrain on `(query, intent)` pairs. On any error the previous
    /// snapshot keeps serving.
    pub fn retrain(&self, samples: &[(String, Intent)]) -> Result<RetrainReport, RouterError> {
        let _guard = self.retrain_lock.lock();
        let base = self.snapshot();

        match retrain(&base, samples, &self.options) {
            Ok((Some(model), report)) => {
                self.publish(model)?;
                info!(
                    version = report.version,
                    samples = report.samples_used,
                    skipped = report.samples_skipped,
                    loss = report.final_loss,
                    "classifier retrained"
                );
                Ok(report)
            }
            Ok((None, report)) => {
                info!(
                    skipped = report.samples_skipped,
                    "retrain skipped: no usable samples"
                );
                Ok(report)
            }
            Err(err) => {
                error!(error = %err, version = base.version, "retrain aborted, keeping previous model");
                Err(err)
            }
        }
    }
}

impl IntentMatcher for TrainedClassifier {
    fn method(&self) -> Method {
        Method::TrainedModel
    }

    async fn classify(&self, query: &str) -> Result<ClassificationResult> {
        Ok(self.predict(query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> TrainingOptions {
        TrainingOptions {
            hidden_size: 16,
            learning_rate: 1.0,
            epochs: 300,
            retrain_epochs: 20,
            seed: 5,
        }
    }

    fn samples() -> Vec<(String, Intent)> {
        [
            ("track my order", "order_status"),
            ("where is the package", "order_status"),
            ("check stock levels", "inventory_check"),
            ("warehouse inventory count", "inventory_check"),
        ]
        .into_iter()
        .map(|(t, i)| (t.to_string(), Intent::new(i)))
        .collect()
    }

    #[test]
    fn empty_query_vector_matches_vocabulary_size() {
        let classifier = TrainedClassifier::train(&samples(), options()).unwrap();
        let vector = classifier.query_to_vector("");
        assert_eq!(vector.len(), classifier.snapshot().vocabulary.len());
        assert!(vector.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn in_flight_snapshot_survives_retrain() {
        let classifier = TrainedClassifier::train(&samples(), options()).unwrap();
        let held = classifier.snapshot();

        let report = classifier
            .retrain(&[("package location".to_string(), Intent::new("order_status"))])
            .unwrap();

        assert!(report.applied);
        assert_eq!(held.version, 1);
        assert_eq!(classifier.version(), 2);
        assert_eq!(held.predict("track my order").model_version, Some(1));
        assert_eq!(classifier.predict("track my order").model_version, Some(2));
    }

    #[test]
    fn empty_retrain_leaves_weights_untouched() {
        let classifier = TrainedClassifier::train(&samples(), options()).unwrap();
        let before = classifier.snapshot();
        let report = classifier.retrain(&[]).unwrap();
        let after = classifier.snapshot();

        assert!(!report.applied);
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn publishing_a_mismatched_model_keeps_the_previous_one() {
        let classifier = TrainedClassifier::train(&samples(), options()).unwrap();
        let before = classifier.snapshot();

        let mut corrupted = (*before).clone();
        corrupted.intents.push(Intent::new("help"));
        corrupted.version += 1;

        assert!(matches!(
            classifier.publish(corrupted),
            Err(RouterError::ClassifierDimensionMismatch { .. })
        ));
        assert!(Arc::ptr_eq(&before, &classifier.snapshot()));
    }

    #[test]
    fn retrain_on_corrupted_snapshot_aborts() {
        let classifier = TrainedClassifier::train(&samples(), options()).unwrap();
        let mut corrupted = (*classifier.snapshot()).clone();
        corrupted.output.bias.push(0.0);
        // Bypass validation to simulate a corrupted in-memory snapshot.
        *classifier.current.write() = Arc::new(corrupted);
        let before = classifier.snapshot();

        let result =
            classifier.retrain(&[("track my order".to_string(), Intent::new("order_status"))]);

        assert!(result.is_err());
        assert!(Arc::ptr_eq(&before, &classifier.snapshot()));
    }

    #[test]
    fn rejects_invalid_model_on_construction() {
        let mut model = train(&samples(), &options()).unwrap();
        model.hidden.inputs += 1;
        assert!(TrainedClassifier::new(model, options()).is_err());
    }

    #[tokio::test]
    async fn classify_reports_method_and_version() {
        let classifier = TrainedClassifier::train(&samples(), options()).unwrap();
        let result = classifier.classify("check stock levels").await.unwrap();
        assert_eq!(result.method, Method::TrainedModel);
        assert_eq!(result.model_version, Some(1));
        assert_eq!(result.alternatives.len(), 1);
    }
}
