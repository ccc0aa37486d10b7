use std::cmp::Ordering;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use anyhow::Result;
use parking_lot::RwLock;
use switchboard_core::{
    normalize_key, Alternative, ClassificationResult, Intent, IntentMatcher, Method,
    TemplateCatalog,
};
use tracing::{debug, info};

use crate::embedder::{Embedder, VectorSpace};
use crate::similarity::cosine_similarity;

/// One seed phrase in both vector spaces. `remote` is empty while the provider has not
/// answered for this phrase.
struct Seed {
    phrase: String,
    local: Arc<Vec<f32>>,
    remote: Option<Arc<Vec<f32>>>,
}

impl Seed {
    fn vector(&self, space: VectorSpace) -> Option<&Arc<Vec<f32>>> {
        match space {
            VectorSpace::Local => Some(&self.local),
            VectorSpace::Provider => self.remote.as_ref(),
        }
    }
}

struct IntentSeeds {
    intent: Intent,
    seeds: Vec<Seed>,
}

/// Scores a query against every intent's seed phrases, keeping the best seed per intent.
///
/// Query and seed vectors are only compared within one space. Seeds the provider could
/// not embed at build time are embedded again once a query shows the provider is back.
pub struct SemanticMatcher {
    embedder: Arc<Embedder>,
    seeds: RwLock<Vec<IntentSeeds>>,
    missing_remote: AtomicUsize,
    threshold: f32,
    alternatives: usize,
}

impl SemanticMatcher {
    /// Embeds each template's canonical phrase and examples. Templates sharing an intent pool their seeds.
    pub async fn build(
        catalog: &TemplateCatalog,
        embedder: Arc<Embedder>,
        threshold: f32,
        alternatives: usize,
    ) -> Self {
        let mut seeds: Vec<IntentSeeds> = catalog
            .intents()
            .into_iter()
            .map(|intent| IntentSeeds {
                intent,
                seeds: Vec::new(),
            })
            .collect();

        let mut missing_remote = 0;
        for template in catalog.templates() {
            let Some(slot) = seeds.iter_mut().find(|s| s.intent == template.intent) else {
                continue;
            };
            for phrase in template.seed_phrases() {
                let remote = if embedder.has_provider() {
                    let (vector, source) = embedder.embed_with_source(&phrase).await;
                    (embedder.space(source) == VectorSpace::Provider).then_some(vector)
                } else {
                    None
                };
                if embedder.has_provider() && remote.is_none() {
                    missing_remote += 1;
                }
                slot.seeds.push(Seed {
                    local: embedder.embed_local(&phrase),
                    remote,
                    phrase,
                });
            }
        }

        debug!(
            intents = seeds.len(),
            seeds = seeds.iter().map(|s| s.seeds.len()).sum::<usize>(),
            missing_remote,
            "semantic seeds embedded"
        );

        Self {
            embedder,
            seeds: RwLock::new(seeds),
            missing_remote: AtomicUsize::new(missing_remote),
            threshold,
            alternatives,
        }
    }

    pub fn embedder(&self) -> &Arc<Embedder> {
        &self.embedder
    }

    pub fn intent_count(&self) -> usize {
        self.seeds.read().len()
    }

    /// Seeds still lacking a provider vector.
    pub fn missing_remote_seeds(&self) -> usize {
        self.missing_remote.load(AtomicOrdering::Relaxed)
    }

    /// Every intent with its best seed similarity in `space`, highest first. Ties keep
    /// catalog order.
    pub fn rank(&self, query: &[f32], space: VectorSpace) -> Vec<(Intent, f32)> {
        let mut scored = self
            .seeds
            .read()
            .iter()
            .map(|intent_seeds| {
                let best = intent_seeds
                    .seeds
                    .iter()
                    .filter_map(|seed| seed.vector(space))
                    .map(|vector| cosine_similarity(query, vector))
                    .fold(0.0_f32, f32::max);
                (intent_seeds.intent.clone(), best)
            })
            .collect::<Vec<_>>();

        scored.sort_by(|(_, a), (_, b)| b.partial_cmp(a).unwrap_or(Ordering::Equal));
        scored
    }

    pub async fn match_semantic(&self, query: &str) -> ClassificationResult {
        if normalize_key(query).is_empty() {
            return ClassificationResult::unknown(Method::Semantic);
        }

        let (embedding, source) = self.embedder.embed_with_source(query).await;
        let space = self.embedder.space(source);
        if space == VectorSpace::Provider && self.missing_remote_seeds() > 0 {
            self.refresh_remote_seeds().await;
        }
        let ranked = self.rank(&embedding, space);

        let Some((top_intent, top_score)) = ranked.first().cloned() else {
            return ClassificationResult::unknown(Method::Semantic);
        };

        let alternatives = |skip: usize| {
            ranked
                .iter()
                .skip(skip)
                .take(self.alternatives)
                .map(|(intent, score)| Alternative {
                    intent: intent.clone(),
                    confidence: *score,
                })
                .collect::<Vec<_>>()
        };

        if top_score >= self.threshold {
            return ClassificationResult::new(top_intent, top_score, Method::Semantic)
                .with_alternatives(alternatives(1));
        }

        // Below threshold: the near miss leads the alternatives; unknown carries no confidence.
        let mut near_misses = vec![Alternative {
            intent: top_intent,
            confidence: top_score,
        }];
        near_misses.extend(alternatives(1));
        ClassificationResult::unknown(Method::Semantic).with_alternatives(near_misses)
    }

    /// Asks the provider again for every seed that only has a local vector. Each vector
    /// is stored as soon as it arrives, so a cancelled refresh keeps its progress.
    async fn refresh_remote_seeds(&self) {
        let pending = self
            .seeds
            .read()
            .iter()
            .enumerate()
            .flat_map(|(intent_idx, intent_seeds)| {
                intent_seeds
                    .seeds
                    .iter()
                    .enumerate()
                    .filter(|(_, seed)| seed.remote.is_none())
                    .map(move |(seed_idx, seed)| (intent_idx, seed_idx, seed.phrase.clone()))
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();

        for (intent_idx, seed_idx, phrase) in pending {
            let (vector, source) = self.embedder.embed_with_source(&phrase).await;
            if self.embedder.space(source) != VectorSpace::Provider {
                debug!("provider unavailable again, seed refresh paused");
                return;
            }

            let mut seeds = self.seeds.write();
            let seed = &mut seeds[intent_idx].seeds[seed_idx];
            if seed.remote.is_none() {
                seed.remote = Some(vector);
                let left = self.missing_remote.fetch_sub(1, AtomicOrdering::Relaxed) - 1;
                if left == 0 {
                    info!("all semantic seeds now embedded by the provider");
                }
            }
        }
    }
}

impl IntentMatcher for SemanticMatcher {
    fn method(&self) -> Method {
        Method::Semantic
    }

    async fn classify(&self, query: &str) -> Result<ClassificationResult> {
        Ok(self.match_semantic(query).await)
    }
}
