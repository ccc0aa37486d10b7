use std::cmp::Ordering;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::future::join_all;
use futures::FutureExt;
use switchboard_core::{
    Alternative, ClassificationResult, Intent, IntentMatcher, Method, MethodVote, MethodWeights,
    RouterConfig,
};
use tracing::{debug, warn};

use crate::matcher::Matcher;

/// What one sub-classifier produced for a query.
#[derive(Debug, Clone)]
pub enum MethodOutcome {
    Answered(ClassificationResult),
    Failed { method: Method, reason: String },
}

impl MethodOutcome {
    pub fn method(&self) -> Method {
        match self {
            MethodOutcome::Answered(result) => result.method,
            MethodOutcome::Failed { method, .. } => *method,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnsembleDecision {
    pub result: ClassificationResult,
    pub outcomes: Vec<MethodOutcome>,
}

impl EnsembleDecision {
    pub fn failed_methods(&self) -> Vec<Method> {
        self.outcomes
            .iter()
            .filter_map(|outcome| match outcome {
                MethodOutcome::Failed { method, .. } => Some(*method),
                MethodOutcome::Answered(_) => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VotingRules {
    pub weights: MethodWeights,
    pub confidence_threshold: f32,
    pub min_vote_confidence: f32,
}

impl From<&RouterConfig> for VotingRules {
    fn from(config: &RouterConfig) -> Self {
        Self {
            weights: config.weights,
            confidence_threshold: config.confidence_threshold,
            min_vote_confidence: config.min_vote_confidence,
        }
    }
}

/// Runs every matcher concurrently and folds their answers into one weighted decision.
///
/// Matchers are evaluated in the order given, which is also the tie-break order.
pub struct EnsembleCoordinator<M: IntentMatcher = Matcher> {
    matchers: Vec<M>,
    rules: VotingRules,
    method_timeout: Duration,
}

impl<M: IntentMatcher> EnsembleCoordinator<M> {
    pub fn new(matchers: Vec<M>, rules: VotingRules, method_timeout: Duration) -> Self {
        Self {
            matchers,
            rules,
            method_timeout,
        }
    }

    pub fn rules(&self) -> &VotingRules {
        &self.rules
    }

    pub fn matchers(&self) -> &[M] {
        &self.matchers
    }

    pub async fn route(&self, query: &str) -> EnsembleDecision {
        let outcomes = join_all(
            self.matchers
                .iter()
                .map(|matcher| self.evaluate(matcher, query)),
        )
        .await;

        let result = aggregate(&outcomes, &self.rules);
        EnsembleDecision { result, outcomes }
    }

    async fn evaluate(&self, matcher: &M, query: &str) -> MethodOutcome {
        let method = matcher.method();
        let guarded = AssertUnwindSafe(matcher.classify(query)).catch_unwind();

        let reason = match tokio::time::timeout(self.method_timeout, guarded).await {
            Ok(Ok(Ok(result))) => return MethodOutcome::Answered(result),
            Ok(Ok(Err(err))) => format!("{err:#}"),
            Ok(Err(_)) => "matcher panicked".to_string(),
            Err(_) => format!("timed out after {}ms", self.method_timeout.as_millis()),
        };

        warn!(method = %method, reason = %reason, "matcher failed; counting as no vote");
        MethodOutcome::Failed { method, reason }
    }
}

struct Tally {
    intent: Intent,
    mass: f32,
}

/// Weighted vote over sub-classifier outcomes.
///
/// A method votes for its intent with `weight × confidence` when it answered with a known
/// intent at or above `min_vote_confidence`. The leading intent's confidence is its share of
/// all vote mass; below `confidence_threshold` the decision becomes `unknown` and the
/// candidate moves to the first alternative.
pub fn aggregate(outcomes: &[MethodOutcome], rules: &VotingRules) -> ClassificationResult {
    let model_version = outcomes.iter().find_map(|outcome| match outcome {
        MethodOutcome::Answered(result) => result.model_version,
        MethodOutcome::Failed { .. } => None,
    });

    let votes = outcomes
        .iter()
        .filter_map(|outcome| match outcome {
            MethodOutcome::Answered(result) => Some(result),
            MethodOutcome::Failed { .. } => None,
        })
        .filter(|result| !result.is_unknown() && result.confidence >= rules.min_vote_confidence)
        .map(|result| {
            let weight = rules.weights.weight_for(result.method);
            MethodVote {
                method: result.method,
                intent: result.intent.clone(),
                confidence: result.confidence,
                weight,
                vote: weight * result.confidence,
            }
        })
        .filter(|vote| vote.vote > 0.0)
        .collect::<Vec<_>>();

    let mut tallies: Vec<Tally> = Vec::new();
    for vote in &votes {
        match tallies.iter_mut().find(|tally| tally.intent == vote.intent) {
            Some(tally) => tally.mass += vote.vote,
            None => tallies.push(Tally {
                intent: vote.intent.clone(),
                mass: vote.vote,
            }),
        }
    }

    let total = tallies.iter().map(|tally| tally.mass).sum::<f32>();
    if tallies.is_empty() || total <= 0.0 {
        debug!("no method voted");
        let mut result = ClassificationResult::unknown(Method::Ensemble);
        result.model_version = model_version;
        return result;
    }

    // Stable sort keeps first-voted order among equal masses.
    tallies.sort_by(|a, b| b.mass.partial_cmp(&a.mass).unwrap_or(Ordering::Equal));
    let leader = &tallies[0];
    let confidence = leader.mass / total;

    let mut winning: Option<&MethodVote> = None;
    for vote in votes.iter().filter(|vote| vote.intent == leader.intent) {
        if winning.map_or(true, |best| vote.confidence >= best.confidence) {
            winning = Some(vote);
        }
    }
    let winning_method = winning.map_or(Method::Ensemble, |vote| vote.method);

    let share = |tally: &Tally| Alternative {
        intent: tally.intent.clone(),
        confidence: tally.mass / total,
    };

    let mut result = if confidence >= rules.confidence_threshold {
        ClassificationResult::new(leader.intent.clone(), confidence, winning_method)
            .with_alternatives(tallies.iter().skip(1).map(share).collect())
    } else {
        ClassificationResult::new(Intent::unknown(), confidence, Method::Ensemble)
            .with_alternatives(tallies.iter().map(share).collect())
    };
    result.model_version = model_version;
    result.votes = votes;
    result
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    use anyhow::Result;

    use super::*;

    fn rules() -> VotingRules {
        VotingRules::from(&RouterConfig::default())
    }

    fn answered(method: Method, intent: &str, confidence: f32) -> MethodOutcome {
        MethodOutcome::Answered(ClassificationResult::new(
            Intent::new(intent),
            confidence,
            method,
        ))
    }

    fn failed(method: Method) -> MethodOutcome {
        MethodOutcome::Failed {
            method,
            reason: "boom".to_string(),
        }
    }

    #[test]
    fn agreement_above_threshold_wins() {
        let result = aggregate(
            &[
                answered(Method::Pattern, "sales_report", 0.95),
                answered(Method::Semantic, "sales_report", 0.80),
                answered(Method::TrainedModel, "sales_report", 0.75),
            ],
            &rules(),
        );

        assert_eq!(result.intent, Intent::new("sales_report"));
        assert!(result.confidence > 0.6);
        assert_eq!(result.method, Method::Pattern);
        assert_eq!(result.votes.len(), 3);
        assert!(result.alternatives.is_empty());
    }

    #[test]
    fn weighted_majority_beats_single_low_vote() {
        let result = aggregate(
            &[
                answered(Method::Pattern, "sales_report", 0.5),
                answered(Method::Semantic, "inventory_check", 0.9),
                answered(Method::TrainedModel, "inventory_check", 0.85),
            ],
            &rules(),
        );

        assert_eq!(result.intent, Intent::new("inventory_check"));
        assert_eq!(result.method, Method::Semantic);
        let expected = (0.35 * 0.9 + 0.35 * 0.85) / (0.30 * 0.5 + 0.35 * 0.9 + 0.35 * 0.85);
        assert!((result.confidence - expected).abs() < 1e-5);
        assert_eq!(result.alternatives[0].intent, Intent::new("sales_report"));
    }

    #[test]
    fn low_confidence_everywhere_is_unknown() {
        let result = aggregate(
            &[
                answered(Method::Pattern, "sales_report", 0.2),
                answered(Method::Semantic, "sales_report", 0.3),
                answered(Method::TrainedModel, "sales_report", 0.34),
            ],
            &rules(),
        );

        assert!(result.is_unknown());
        assert_eq!(result.confidence, 0.0);
        assert!(result.votes.is_empty());
    }

    #[test]
    fn no_votes_is_unknown_with_zero_confidence() {
        let result = aggregate(
            &[
                failed(Method::Pattern),
                MethodOutcome::Answered(ClassificationResult::unknown(Method::Semantic)),
                failed(Method::TrainedModel),
            ],
            &rules(),
        );

        assert!(result.is_unknown());
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.method, Method::Ensemble);
    }

    #[test]
    fn split_vote_below_threshold_keeps_candidate_as_alternative() {
        let result = aggregate(
            &[
                answered(Method::Pattern, "help", 0.9),
                answered(Method::Semantic, "order_status", 0.8),
                answered(Method::TrainedModel, "sales_report", 0.7),
            ],
            &rules(),
        );

        assert!(result.is_unknown());
        assert!(result.confidence > 0.0 && result.confidence < 0.6);
        assert_eq!(result.alternatives.len(), 3);
        assert_eq!(result.alternatives[0].intent, Intent::new("order_status"));
    }

    #[test]
    fn equal_mass_goes_to_first_voted_intent() {
        let rules = VotingRules {
            weights: MethodWeights {
                pattern: 0.5,
                semantic: 0.5,
                trained: 0.0,
            },
            confidence_threshold: 0.5,
            min_vote_confidence: 0.35,
        };
        let result = aggregate(
            &[
                answered(Method::Pattern, "help", 0.8),
                answered(Method::Semantic, "order_status", 0.8),
                answered(Method::TrainedModel, "order_status", 0.9),
            ],
            &rules,
        );

        assert_eq!(result.intent, Intent::new("help"));
        assert!((result.confidence - 0.5).abs() < 1e-6);
    }

    #[test]
    fn confidence_tie_credits_later_method() {
        let result = aggregate(
            &[
                answered(Method::Pattern, "help", 0.8),
                answered(Method::Semantic, "help", 0.8),
                answered(Method::TrainedModel, "help", 0.8),
            ],
            &rules(),
        );

        assert_eq!(result.method, Method::TrainedModel);
        assert!((result.confidence - 1.0).abs() < 1e-6);
    }

    #[test]
    fn failed_method_does_not_vote() {
        let result = aggregate(
            &[
                answered(Method::Pattern, "help", 0.95),
                failed(Method::Semantic),
                answered(Method::TrainedModel, "order_status", 0.4),
            ],
            &rules(),
        );

        assert_eq!(result.intent, Intent::new("help"));
        assert_eq!(result.votes.len(), 2);
        assert!(result.confidence <= 1.0);
    }

    enum Scripted {
        Answer(Method, &'static str, f32),
        Fail(Method),
        Panic(Method),
        Hang(Method),
    }

    impl IntentMatcher for Scripted {
        fn method(&self) -> Method {
            match self {
                Scripted::Answer(method, ..)
                | Scripted::Fail(method)
                | Scripted::Panic(method)
                | Scripted::Hang(method) => *method,
            }
        }

        async fn classify(&self, _query: &str) -> Result<ClassificationResult> {
            match self {
                Scripted::Answer(method, intent, confidence) => Ok(ClassificationResult::new(
                    Intent::new(intent),
                    *confidence,
                    *method,
                )),
                Scripted::Fail(_) => anyhow::bail!("provider exploded"),
                Scripted::Panic(_) => panic!("matcher bug"),
                Scripted::Hang(_) => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    anyhow::bail!("unreachable")
                }
            }
        }
    }

    #[tokio::test]
    async fn failing_and_panicking_matchers_count_as_no_vote() {
        let coordinator = EnsembleCoordinator::new(
            vec![
                Scripted::Panic(Method::Pattern),
                Scripted::Fail(Method::Semantic),
                Scripted::Answer(Method::TrainedModel, "help", 0.9),
            ],
            rules(),
            Duration::from_secs(1),
        );

        let decision = coordinator.route("anything").await;
        assert_eq!(decision.result.intent, Intent::new("help"));
        assert_eq!(decision.result.method, Method::TrainedModel);
        assert_eq!(
            decision.failed_methods(),
            vec![Method::Pattern, Method::Semantic]
        );
    }

    #[tokio::test]
    async fn slow_matcher_times_out() {
        let coordinator = EnsembleCoordinator::new(
            vec![
                Scripted::Answer(Method::Pattern, "order_status", 0.95),
                Scripted::Hang(Method::Semantic),
            ],
            rules(),
            Duration::from_millis(50),
        );

        let decision = coordinator.route("where is order 7").await;
        assert_eq!(decision.result.intent, Intent::new("order_status"));
        assert_eq!(decision.failed_methods(), vec![Method::Semantic]);
    }

    struct Counting(AtomicUsize);

    impl IntentMatcher for Counting {
        fn method(&self) -> Method {
            Method::Pattern
        }

        async fn classify(&self, _query: &str) -> Result<ClassificationResult> {
            self.0.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(ClassificationResult::unknown(Method::Pattern))
        }
    }

    #[tokio::test]
    async fn every_matcher_is_invoked_once() {
        let coordinator = EnsembleCoordinator::new(
            vec![Counting(AtomicUsize::new(0)), Counting(AtomicUsize::new(0))],
            rules(),
            Duration::from_secs(1),
        );

        let decision = coordinator.route("hello").await;
        assert!(decision.result.is_unknown());
        assert!(coordinator
            .matchers()
            .iter()
            .all(|matcher| matcher.0.load(AtomicOrdering::SeqCst) == 1));
    }
}
