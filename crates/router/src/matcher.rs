use std::sync::Arc;

use anyhow::Result;
use switchboard_core::{ClassificationResult, IntentMatcher, Method, PatternMatcher};
use switchboard_ml::TrainedClassifier;
use switchboard_semantic::SemanticMatcher;

/// The three sub-classifiers behind one concrete type, so the coordinator can hold them in a `Vec`.
pub enum Matcher {
    Pattern(PatternMatcher),
    Semantic(SemanticMatcher),
    Trained(Arc<TrainedClassifier>),
}

impl IntentMatcher for Matcher {
    fn method(&self) -> Method {
        match self {
            Matcher::Pattern(matcher) => matcher.method(),
            Matcher::Semantic(matcher) => matcher.method(),
            Matcher::Trained(classifier) => classifier.method(),
        }
    }

    async fn classify(&self, query: &str) -> Result<ClassificationResult> {
        match self {
            Matcher::Pattern(matcher) => matcher.classify(query).await,
            Matcher::Semantic(matcher) => matcher.classify(query).await,
            Matcher::Trained(classifier) => classifier.classify(query).await,
        }
    }
}
