use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const UNKNOWN_INTENT: &str = "unknown";

/// Label from the closed intent taxonomy, or `unknown`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Intent(String);

impl Intent {
    pub fn new(label: impl AsRef<str>) -> Self {
        let label = label.as_ref().trim().to_lowercase();
        if label.is_empty() {
            Self::unknown()
        } else {
            Self(label)
        }
    }

    pub fn unknown() -> Self {
        Self(UNKNOWN_INTENT.to_string())
    }

    pub fn is_unknown(&self) -> bool {
        self.0 == UNKNOWN_INTENT
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Intent {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Intent {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<Intent> for String {
    fn from(value: Intent) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Pattern,
    Semantic,
    TrainedModel,
    /// Final decision that no single method can be credited with.
    Ensemble,
}

impl Method {
    pub fn as_code(self) -> &'static str {
        match self {
            Self::Pattern => "pattern",
            Self::Semantic => "semantic",
            Self::TrainedModel => "trained_model",
            Self::Ensemble => "ensemble",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_code())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alternative {
    pub intent: Intent,
    pub confidence: f32,
}

/// One method's contribution to an ensemble decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodVote {
    pub method: Method,
    pub intent: Intent,
    pub confidence: f32,
    pub weight: f32,
    pub vote: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub intent: Intent,
    pub confidence: f32,
    pub method: Method,
    pub alternatives: Vec<Alternative>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub votes: Vec<MethodVote>,
}

impl ClassificationResult {
    pub fn new(intent: Intent, confidence: f32, method: Method) -> Self {
        Self {
            intent,
            confidence: clamp_confidence(confidence),
            method,
            alternatives: Vec::new(),
            model_version: None,
            votes: Vec::new(),
        }
    }

    pub fn unknown(method: Method) -> Self {
        Self::new(Intent::unknown(), 0.0, method)
    }

    pub fn with_alternatives(mut self, alternatives: Vec<Alternative>) -> Self {
        self.alternatives = alternatives
            .into_iter()
            .map(|alt| Alternative {
                intent: alt.intent,
                confidence: clamp_confidence(alt.confidence),
            })
            .collect();
        self
    }

    pub fn with_model_version(mut self, version: u64) -> Self {
        self.model_version = Some(version);
        self
    }

    pub fn is_unknown(&self) -> bool {
        self.intent.is_unknown()
    }
}

/// Maps any score into `[0, 1]`; NaN becomes 0.
pub fn clamp_confidence(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub id: Uuid,
    pub at: DateTime<Utc>,
    pub query: String,
    pub predicted_intent: Intent,
    pub actual_intent: Intent,
    pub was_correct: bool,
}

impl FeedbackRecord {
    pub fn new(
        query: impl Into<String>,
        predicted_intent: Intent,
        actual_intent: Intent,
        was_correct: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            at: Utc::now(),
            query: query.into(),
            predicted_intent,
            actual_intent,
            was_correct,
        }
    }
}
