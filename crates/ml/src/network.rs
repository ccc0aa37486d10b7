use std::cmp::Ordering;

use burn_ndarray::{NdArray, NdArrayDevice};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use switchboard_core::{Alternative, ClassificationResult, Intent, Method, RouterError};

use crate::features::Vocabulary;
use crate::mlp::{input_batch, IntentMlp};

/// Oldest entries are dropped beyond this many.
pub const MAX_HISTORY: usize = 2_000;

/// Dense layer record, weights row-major as `inputs × outputs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub inputs: usize,
    pub outputs: usize,
    pub weights: Vec<f32>,
    pub bias: Vec<f32>,
}

impl Layer {
    /// Uniform init in `±1/sqrt(fan_in)`, zero bias.
    pub fn random(inputs: usize, outputs: usize, rng: &mut impl Rng) -> Self {
        let limit = 1.0 / (inputs.max(1) as f32).sqrt();
        let weights = (0..inputs * outputs)
            .map(|_| rng.random_range(-limit..limit))
            .collect();

        Self {
            inputs,
            outputs,
            weights,
            bias: vec![0.0; outputs],
        }
    }

    fn check(&self, component: &'static str) -> Result<(), RouterError> {
        expect_len(component, self.inputs * self.outputs, self.weights.len())?;
        expect_len(component, self.outputs, self.bias.len())?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingKind {
    Train,
    Retrain,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingEvent {
    pub at: DateTime<Utc>,
    pub kind: TrainingKind,
    pub version: u64,
    pub epoch: usize,
    pub samples: usize,
    pub loss: f32,
    pub accuracy: f32,
}

/// Bag-of-words → sigmoid hidden layer → softmax over intents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierModel {
    pub vocabulary: Vocabulary,
    pub hidden: Layer,
    pub output: Layer,
    pub intents: Vec<Intent>,
    pub version: u64,
    #[serde(default)]
    pub history: Vec<TrainingEvent>,
}

impl ClassifierModel {
    pub fn initialize(
        vocabulary: Vocabulary,
        intents: Vec<Intent>,
        hidden_size: usize,
        rng: &mut impl Rng,
    ) -> Self {
        let hidden = Layer::random(vocabulary.len(), hidden_size, rng);
        let output = Layer::random(hidden_size, intents.len(), rng);
        Self {
            vocabulary,
            hidden,
            output,
            intents,
            version: 1,
            history: Vec::new(),
        }
    }

    /// Vocabulary, both layers and the intent list must agree on every dimension.
    pub fn validate(&self) -> Result<(), RouterError> {
        expect_len("hidden layer inputs", self.vocabulary.len(), self.hidden.inputs)?;
        expect_len("output layer inputs", self.hidden.outputs, self.output.inputs)?;
        expect_len("output layer outputs", self.intents.len(), self.output.outputs)?;
        self.hidden.check("hidden layer weights")?;
        self.output.check("output layer weights")?;
        Ok(())
    }

    pub fn intent_index(&self, intent: &Intent) -> Option<usize> {
        self.intents.iter().position(|known| known == intent)
    }

    pub fn query_to_vector(&self, query: &str) -> Vec<f32> {
        self.vocabulary.query_to_vector(query)
    }

    /// Intent probabilities for one query vector, in `intents` order.
    pub fn probabilities(&self, features: &[f32]) -> Vec<f32> {
        let device = NdArrayDevice::Cpu;
        let mlp = IntentMlp::<NdArray>::from_layers(&self.hidden, &self.output, &device);
        let input = input_batch(&[features], self.vocabulary.len(), &device);
        mlp.probabilities(input).into_data().iter::<f32>().collect()
    }

    /// A query without a single in-vocabulary token carries no evidence and is `unknown`,
    /// as is any query against a model whose dimensions disagree.
    pub fn predict(&self, query: &str) -> ClassificationResult {
        let features = self.query_to_vector(query);
        if self.intents.is_empty()
            || self.validate().is_err()
            || features.iter().all(|value| *value == 0.0)
        {
            return ClassificationResult::unknown(Method::TrainedModel)
                .with_model_version(self.version);
        }

        let mut ranked = self
            .intents
            .iter()
            .cloned()
            .zip(self.probabilities(&features))
            .collect::<Vec<_>>();
        ranked.sort_by(|(_, a), (_, b)| b.partial_cmp(a).unwrap_or(Ordering::Equal));

        let (intent, confidence) = ranked[0].clone();
        let alternatives = ranked
            .into_iter()
            .skip(1)
            .map(|(intent, confidence)| Alternative { intent, confidence })
            .collect();

        ClassificationResult::new(intent, confidence, Method::TrainedModel)
            .with_alternatives(alternatives)
            .with_model_version(self.version)
    }

    pub(crate) fn push_history(&mut self, event: TrainingEvent) {
        self.history.push(event);
        if self.history.len() > MAX_HISTORY {
            let excess = self.history.len() - MAX_HISTORY;
            self.history.drain(..excess);
        }
    }
}

fn expect_len(component: &'static str, expected: usize, actual: usize) -> Result<(), RouterError> {
    if expected == actual {
        Ok(())
    } else {
        Err(RouterError::ClassifierDimensionMismatch {
            component,
            expected,
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn model() -> ClassifierModel {
        let vocabulary = Vocabulary::build(["track order", "check stock", "sales report"]);
        let intents = vec![
            Intent::new("order_status"),
            Intent::new("inventory_check"),
            Intent::new("sales_report"),
        ];
        ClassifierModel::initialize(vocabulary, intents, 8, &mut StdRng::seed_from_u64(7))
    }

    #[test]
    fn init_respects_fan_in_scale() {
        let model = model();
        let limit = 1.0 / (model.vocabulary.len() as f32).sqrt();
        assert!(model.hidden.weights.iter().all(|w| w.abs() <= limit));
        assert!(model.hidden.bias.iter().all(|b| *b == 0.0));
        assert!(model.validate().is_ok());
    }

    #[test]
    fn predict_ranks_every_intent() {
        let result = model().predict("track order");
        assert_eq!(result.method, Method::TrainedModel);
        assert_eq!(result.alternatives.len(), 2);
        assert_eq!(result.model_version, Some(1));
        assert!(result.alternatives.iter().all(|a| a.confidence <= result.confidence));
        let total = result.confidence + result.alternatives.iter().map(|a| a.confidence).sum::<f32>();
        assert!((total - 1.0).abs() < 1e-5);
    }

    #[test]
    fn out_of_vocabulary_query_is_unknown() {
        let result = model().predict("zebra quantum");
        assert!(result.is_unknown());
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.model_version, Some(1));
    }

    #[test]
    fn validate_detects_intent_mismatch() {
        let mut model = model();
        model.intents.push(Intent::new("help"));
        assert!(matches!(
            model.validate(),
            Err(RouterError::ClassifierDimensionMismatch { .. })
        ));
    }

    #[test]
    fn validate_detects_truncated_weights() {
        let mut model = model();
        model.output.weights.pop();
        assert!(model.validate().is_err());
        assert!(model.predict("track order").is_unknown());
    }
}
