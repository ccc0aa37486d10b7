use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::RouterError;
use crate::models::Method;

/// Static per-method vote weights. Must sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MethodWeights {
    pub pattern: f32,
    pub semantic: f32,
    pub trained: f32,
}

impl Default for MethodWeights {
    fn default() -> Self {
        Self {
            pattern: 0.30,
            semantic: 0.35,
            trained: 0.35,
        }
    }
}

impl MethodWeights {
    pub fn weight_for(&self, method: Method) -> f32 {
        match method {
            Method::Pattern => self.pattern,
            Method::Semantic => self.semantic,
            Method::TrainedModel => self.trained,
            Method::Ensemble => 0.0,
        }
    }

    pub fn total(&self) -> f32 {
        self.pattern + self.semantic + self.trained
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    pub weights: MethodWeights,
    pub confidence_threshold: f32,
    pub min_vote_confidence: f32,
    pub pattern_confidence: f32,
    pub semantic_threshold: f32,
    pub semantic_alternatives: usize,
    pub embedding_dims: usize,
    pub embedding_timeout_ms: u64,
    pub embedding_cache_capacity: u64,
    pub embedding_url: String,
    pub embedding_model: String,
    #[serde(skip_serializing)]
    pub embedding_api_key: Option<String>,
    pub hidden_size: usize,
    pub learning_rate: f32,
    pub train_epochs: usize,
    pub retrain_epochs: usize,
    pub seed: u64,
    pub feedback_threshold: usize,
    pub method_timeout_ms: u64,
    pub catalog_path: Option<PathBuf>,
    pub dataset_path: Option<PathBuf>,
    pub model_path: Option<PathBuf>,
    #[serde(skip_serializing)]
    pub database_url: Option<String>,
    /// Stored snapshots kept per database; older versions are pruned on save.
    pub model_retention: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            weights: MethodWeights::default(),
            confidence_threshold: 0.6,
            min_vote_confidence: 0.35,
            pattern_confidence: 0.95,
            semantic_threshold: 0.75,
            semantic_alternatives: 3,
            embedding_dims: 1536,
            embedding_timeout_ms: 5_000,
            embedding_cache_capacity: 10_000,
            embedding_url: "https://api.openai.com/v1".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_api_key: None,
            hidden_size: 128,
            learning_rate: 0.5,
            train_epochs: 300,
            retrain_epochs: 25,
            seed: 42,
            feedback_threshold: 50,
            method_timeout_ms: 10_000,
            catalog_path: None,
            dataset_path: None,
            model_path: None,
            database_url: None,
            model_retention: 10,
        }
    }
}

impl RouterConfig {
    /// Reads `SWITCHBOARD_*` overrides on top of the defaults. Unparsable values keep the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            weights: MethodWeights {
                pattern: env_or("SWITCHBOARD_WEIGHT_PATTERN", defaults.weights.pattern),
                semantic: env_or("SWITCHBOARD_WEIGHT_SEMANTIC", defaults.weights.semantic),
                trained: env_or("SWITCHBOARD_WEIGHT_TRAINED", defaults.weights.trained),
            },
            confidence_threshold: env_or(
                "SWITCHBOARD_CONFIDENCE_THRESHOLD",
                defaults.confidence_threshold,
            ),
            min_vote_confidence: env_or(
                "SWITCHBOARD_MIN_VOTE_CONFIDENCE",
                defaults.min_vote_confidence,
            ),
            pattern_confidence: env_or("SWITCHBOARD_PATTERN_CONFIDENCE", defaults.pattern_confidence),
            semantic_threshold: env_or("SWITCHBOARD_SEMANTIC_THRESHOLD", defaults.semantic_threshold),
            semantic_alternatives: env_or(
                "SWITCHBOARD_SEMANTIC_ALTERNATIVES",
                defaults.semantic_alternatives,
            ),
            embedding_dims: env_or("SWITCHBOARD_EMBEDDING_DIMS", defaults.embedding_dims),
            embedding_timeout_ms: env_or(
                "SWITCHBOARD_EMBEDDING_TIMEOUT_MS",
                defaults.embedding_timeout_ms,
            ),
            embedding_cache_capacity: env_or(
                "SWITCHBOARD_EMBEDDING_CACHE_CAPACITY",
                defaults.embedding_cache_capacity,
            ),
            embedding_url: env::var("SWITCHBOARD_EMBEDDING_URL").unwrap_or(defaults.embedding_url),
            embedding_model: env::var("SWITCHBOARD_EMBEDDING_MODEL")
                .unwrap_or(defaults.embedding_model),
            embedding_api_key: non_empty_var("SWITCHBOARD_EMBEDDING_API_KEY"),
            hidden_size: env_or("SWITCHBOARD_HIDDEN_SIZE", defaults.hidden_size),
            learning_rate: env_or("SWITCHBOARD_LEARNING_RATE", defaults.learning_rate),
            train_epochs: env_or("SWITCHBOARD_TRAIN_EPOCHS", defaults.train_epochs),
            retrain_epochs: env_or("SWITCHBOARD_RETRAIN_EPOCHS", defaults.retrain_epochs),
            seed: env_or("SWITCHBOARD_SEED", defaults.seed),
            feedback_threshold: env_or("SWITCHBOARD_FEEDBACK_THRESHOLD", defaults.feedback_threshold),
            method_timeout_ms: env_or("SWITCHBOARD_METHOD_TIMEOUT_MS", defaults.method_timeout_ms),
            catalog_path: non_empty_var("SWITCHBOARD_CATALOG").map(PathBuf::from),
            dataset_path: non_empty_var("SWITCHBOARD_DATASET").map(PathBuf::from),
            model_path: non_empty_var("SWITCHBOARD_MODEL").map(PathBuf::from),
            database_url: non_empty_var("SWITCHBOARD_DATABASE_URL"),
            model_retention: env_or("SWITCHBOARD_MODEL_RETENTION", defaults.model_retention),
        }
    }

    pub fn validate(&self) -> Result<(), RouterError> {
        let weights = [
            ("pattern", self.weights.pattern),
            ("semantic", self.weights.semantic),
            ("trained", self.weights.trained),
        ];
        if let Some((name, value)) = weights
            .iter()
            .find(|(_, value)| !value.is_finite() || *value < 0.0)
        {
            return Err(RouterError::InvalidConfig(format!(
                "{name} weight must be a non-negative number, got {value}"
            )));
        }
        if (self.weights.total() - 1.0).abs() > 1e-6 {
            return Err(RouterError::InvalidConfig(format!(
                "method weights must sum to 1.0, got {}",
                self.weights.total()
            )));
        }

        for (name, value) in [
            ("confidence_threshold", self.confidence_threshold),
            ("min_vote_confidence", self.min_vote_confidence),
            ("pattern_confidence", self.pattern_confidence),
            ("semantic_threshold", self.semantic_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(RouterError::InvalidConfig(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }

        if self.embedding_dims == 0 || self.hidden_size == 0 {
            return Err(RouterError::InvalidConfig(
                "embedding_dims and hidden_size must be positive".to_string(),
            ));
        }
        if self.feedback_threshold == 0 || self.model_retention == 0 {
            return Err(RouterError::InvalidConfig(
                "feedback_threshold and model_retention must be positive".to_string(),
            ));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(RouterError::InvalidConfig(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }

        Ok(())
    }

    pub fn embedding_timeout(&self) -> Duration {
        Duration::from_millis(self.embedding_timeout_ms)
    }

    pub fn method_timeout(&self) -> Duration {
        Duration::from_millis(self.method_timeout_ms)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
