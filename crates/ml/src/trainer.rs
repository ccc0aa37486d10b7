use burn::backend::Autodiff;
use burn::nn::loss::CrossEntropyLossConfig;
use burn::optim::{GradientsParams, Optimizer, SgdConfig};
use burn_ndarray::{NdArray, NdArrayDevice};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use switchboard_core::{Intent, RouterConfig, RouterError};
use tracing::{debug, info};

use crate::features::Vocabulary;
use crate::mlp::{input_batch, target_batch, IntentMlp};
use crate::network::{ClassifierModel, TrainingEvent, TrainingKind};

type TrainingBackend = Autodiff<NdArray>;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingOptions {
    pub hidden_size: usize,
    pub learning_rate: f32,
    pub epochs: usize,
    pub retrain_epochs: usize,
    pub seed: u64,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        Self::from(&RouterConfig::default())
    }
}

impl From<&RouterConfig> for TrainingOptions {
    fn from(config: &RouterConfig) -> Self {
        Self {
            hidden_size: config.hidden_size,
            learning_rate: config.learning_rate,
            epochs: config.train_epochs,
            retrain_epochs: config.retrain_epochs,
            seed: config.seed,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EpochStats {
    pub epoch: usize,
    pub loss: f32,
    pub accuracy: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrainReport {
    pub applied: bool,
    pub samples_used: usize,
    pub samples_skipped: usize,
    pub version: u64,
    pub final_loss: Option<f32>,
    pub final_accuracy: Option<f32>,
}

struct EncodedSample {
    features: Vec<f32>,
    target: usize,
}

/// Offline supervised training. Vocabulary and intent set are derived from the samples;
/// intents keep first-seen order.
pub fn train(samples: &[(String, Intent)], options: &TrainingOptions) -> Result<ClassifierModel, RouterError> {
    let samples = samples
        .iter()
        .filter(|(text, intent)| !text.trim().is_empty() && !intent.is_unknown())
        .collect::<Vec<_>>();
    if samples.is_empty() {
        return Err(RouterError::EmptyTrainingSet);
    }

    let vocabulary = Vocabulary::build(samples.iter().map(|(text, _)| text.as_str()));
    if vocabulary.is_empty() {
        return Err(RouterError::EmptyTrainingSet);
    }

    let mut intents: Vec<Intent> = Vec::new();
    for (_, intent) in &samples {
        if !intents.contains(intent) {
            intents.push(intent.clone());
        }
    }

    let mut rng = StdRng::seed_from_u64(options.seed);
    let mut model =
        ClassifierModel::initialize(vocabulary, intents, options.hidden_size, &mut rng);
    model.validate()?;

    let mut encoded = samples
        .iter()
        .filter_map(|(text, intent)| {
            model.intent_index(intent).map(|target| EncodedSample {
                features: model.query_to_vector(text),
                target,
            })
        })
        .collect::<Vec<_>>();

    let stats = run_epochs(
        &mut model,
        &mut encoded,
        options.epochs,
        options.learning_rate,
        &mut rng,
    );
    record_history(&mut model, TrainingKind::Train, encoded.len(), &stats);

    if let Some(last) = stats.last() {
        info!(
            vocabulary = model.vocabulary.len(),
            intents = model.intents.len(),
            samples = encoded.len(),
            epochs = stats.len(),
            loss = last.loss,
            accuracy = last.accuracy,
            "classifier trained"
        );
    }

    Ok(model)
}

/// Continues gradient descent from `base` on a batch of corrections. The vocabulary and
/// intent set never change: samples with an unseen intent are skipped. Returns the
/// candidate model without publishing it; `base` is never mutated.
pub fn retrain(
    base: &ClassifierModel,
    samples: &[(String, Intent)],
    options: &TrainingOptions,
) -> Result<(Option<ClassifierModel>, RetrainReport), RouterError> {
    base.validate()?;

    let mut skipped = 0;
    let mut encoded = Vec::new();
    for (text, intent) in samples {
        match base.intent_index(intent) {
            Some(target) => encoded.push(EncodedSample {
                features: base.query_to_vector(text),
                target,
            }),
            None => {
                debug!(intent = %intent, "retrain sample skipped: intent outside frozen set");
                skipped += 1;
            }
        }
    }

    if encoded.is_empty() {
        return Ok((
            None,
            RetrainReport {
                applied: false,
                samples_used: 0,
                samples_skipped: skipped,
                version: base.version,
                final_loss: None,
                final_accuracy: None,
            },
        ));
    }

    for sample in &encoded {
        if sample.features.len() != base.vocabulary.len() {
            return Err(RouterError::ClassifierDimensionMismatch {
                component: "retrain sample features",
                expected: base.vocabulary.len(),
                actual: sample.features.len(),
            });
        }
    }

    let mut model = base.clone();
    model.version = base.version + 1;
    let mut rng = StdRng::seed_from_u64(options.seed ^ model.version);
    let stats = run_epochs(
        &mut model,
        &mut encoded,
        options.retrain_epochs,
        options.learning_rate,
        &mut rng,
    );
    record_history(&mut model, TrainingKind::Retrain, encoded.len(), &stats);
    model.validate()?;

    let report = RetrainReport {
        applied: true,
        samples_used: encoded.len(),
        samples_skipped: skipped,
        version: model.version,
        final_loss: stats.last().map(|s| s.loss),
        final_accuracy: stats.last().map(|s| s.accuracy),
    };
    Ok((Some(model), report))
}

/// Per-sample SGD over `samples`, continuing from the model's current layers. The
/// trained parameters are copied back into `model` once every epoch has run.
fn run_epochs(
    model: &mut ClassifierModel,
    samples: &mut [EncodedSample],
    epochs: usize,
    learning_rate: f32,
    rng: &mut StdRng,
) -> Vec<EpochStats> {
    let device = NdArrayDevice::Cpu;
    let width = model.vocabulary.len();
    let mut mlp =
        IntentMlp::<TrainingBackend>::from_layers(&model.hidden, &model.output, &device);
    let mut optimizer = SgdConfig::new().init::<TrainingBackend, IntentMlp<TrainingBackend>>();
    let criterion = CrossEntropyLossConfig::new().init::<TrainingBackend>(&device);

    let mut stats = Vec::with_capacity(epochs);
    for epoch in 1..=epochs {
        samples.shuffle(rng);

        let mut loss = 0.0_f32;
        let mut correct = 0usize;
        for sample in samples.iter() {
            let input =
                input_batch::<TrainingBackend>(&[sample.features.as_slice()], width, &device);
            let target = target_batch::<TrainingBackend>(&[sample.target], &device);

            let logits = mlp.forward(input);
            let predicted = logits.clone().argmax(1).into_scalar() as usize;
            if predicted == sample.target {
                correct += 1;
            }

            let step_loss = criterion.forward(logits, target);
            loss += step_loss.clone().into_scalar();

            let grads = GradientsParams::from_grads(step_loss.backward(), &mlp);
            mlp = optimizer.step(f64::from(learning_rate), mlp, grads);
        }

        let count = samples.len().max(1) as f32;
        stats.push(EpochStats {
            epoch,
            loss: loss / count,
            accuracy: correct as f32 / count,
        });
    }

    let (hidden, output) = mlp.to_layers();
    model.hidden = hidden;
    model.output = output;
    stats
}

fn record_history(
    model: &mut ClassifierModel,
    kind: TrainingKind,
    samples: usize,
    stats: &[EpochStats],
) {
    let at = Utc::now();
    let version = model.version;
    for epoch in stats {
        model.push_history(TrainingEvent {
            at,
            kind,
            version,
            epoch: epoch.epoch,
            samples,
            loss: epoch.loss,
            accuracy: epoch.accuracy,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> TrainingOptions {
        TrainingOptions {
            hidden_size: 16,
            learning_rate: 1.0,
            epochs: 400,
            retrain_epochs: 30,
            seed: 11,
        }
    }

    fn dataset() -> Vec<(String, Intent)> {
        [
            ("track my order", "order_status"),
            ("where is the package", "order_status"),
            ("shipment delivery status", "order_status"),
            ("check stock levels", "inventory_check"),
            ("warehouse inventory count", "inventory_check"),
            ("items left in stock", "inventory_check"),
            ("weekly sales summary", "sales_report"),
            ("revenue from sales yesterday", "sales_report"),
            ("sales numbers by region", "sales_report"),
        ]
        .into_iter()
        .map(|(text, intent)| (text.to_string(), Intent::new(intent)))
        .collect()
    }

    #[test]
    fn training_fits_the_dataset() {
        let model = train(&dataset(), &options()).unwrap();
        assert!(model.validate().is_ok());
        assert_eq!(model.intents.len(), 3);
        assert_eq!(model.version, 1);

        for (text, intent) in dataset() {
            assert_eq!(model.predict(&text).intent, intent, "query: {text}");
        }
    }

    #[test]
    fn training_history_records_each_epoch_and_loss_falls() {
        let model = train(&dataset(), &options()).unwrap();
        assert_eq!(model.history.len(), 400);
        let first = model.history.first().unwrap();
        let last = model.history.last().unwrap();
        assert_eq!(first.kind, TrainingKind::Train);
        assert!(last.loss < first.loss);
        assert!(last.accuracy >= first.accuracy);
    }

    #[test]
    fn training_is_deterministic_for_a_seed() {
        let a = train(&dataset(), &options()).unwrap();
        let b = train(&dataset(), &options()).unwrap();
        assert_eq!(a.hidden, b.hidden);
        assert_eq!(a.output, b.output);
    }

    #[test]
    fn empty_training_set_is_rejected() {
        assert!(matches!(
            train(&[], &options()),
            Err(RouterError::EmptyTrainingSet)
        ));
    }

    #[test]
    fn retrain_continues_from_current_weights_and_bumps_version() {
        let base = train(&dataset(), &options()).unwrap();
        let corrections = vec![("package tracking".to_string(), Intent::new("order_status"))];

        let (candidate, report) = retrain(&base, &corrections, &options()).unwrap();
        let candidate = candidate.unwrap();

        assert!(report.applied);
        assert_eq!(report.version, 2);
        assert_eq!(candidate.version, 2);
        assert_eq!(candidate.vocabulary, base.vocabulary);
        assert_eq!(candidate.intents, base.intents);
        assert_ne!(candidate.output.weights, base.output.weights);
        assert_eq!(base.version, 1);
        assert_eq!(
            candidate.history.len(),
            base.history.len() + options().retrain_epochs
        );
        assert_eq!(
            candidate.history.last().map(|e| e.kind),
            Some(TrainingKind::Retrain)
        );
    }

    #[test]
    fn retrain_skips_unknown_intents_and_never_grows_the_model() {
        let base = train(&dataset(), &options()).unwrap();
        let corrections = vec![
            ("book a meeting room".to_string(), Intent::new("calendar")),
            ("brand new words entirely".to_string(), Intent::new("sales_report")),
        ];

        let (candidate, report) = retrain(&base, &corrections, &options()).unwrap();
        let candidate = candidate.unwrap();
        assert_eq!(report.samples_used, 1);
        assert_eq!(report.samples_skipped, 1);
        assert_eq!(candidate.vocabulary.len(), base.vocabulary.len());
        assert_eq!(candidate.intents.len(), base.intents.len());
    }

    #[test]
    fn retrain_with_no_usable_samples_is_a_noop() {
        let base = train(&dataset(), &options()).unwrap();
        let (candidate, report) = retrain(&base, &[], &options()).unwrap();
        assert!(candidate.is_none());
        assert!(!report.applied);
        assert_eq!(report.version, base.version);
    }

    #[test]
    fn retrain_refuses_a_corrupted_base() {
        let mut base = train(&dataset(), &options()).unwrap();
        base.hidden.bias.pop();
        let corrections = vec![("track my order".to_string(), Intent::new("order_status"))];
        assert!(matches!(
            retrain(&base, &corrections, &options()),
            Err(RouterError::ClassifierDimensionMismatch { .. })
        ));
    }
}
