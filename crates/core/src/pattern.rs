use anyhow::{Context, Result};
use regex::Regex;

use crate::catalog::TemplateCatalog;
use crate::models::{ClassificationResult, Intent, Method};
use crate::text::normalize_key;
use crate::IntentMatcher;

const WILDCARD: &str = "(.+?)";

#[derive(Debug, Clone)]
struct CompiledPattern {
    intent: Intent,
    source: String,
    regex: Regex,
}

/// Template matcher over the catalog's patterns, checked in catalog order.
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    patterns: Vec<CompiledPattern>,
    confidence: f32,
}

impl PatternMatcher {
    pub fn new(catalog: &TemplateCatalog, confidence: f32) -> Result<Self> {
        let mut patterns = Vec::new();
        for template in catalog.templates() {
            for source in &template.patterns {
                let regex = compile_pattern(source)
                    .with_context(|| format!("failed compiling pattern `{source}`"))?;
                patterns.push(CompiledPattern {
                    intent: template.intent.clone(),
                    source: source.clone(),
                    regex,
                });
            }
        }

        Ok(Self {
            patterns,
            confidence,
        })
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// First pattern found anywhere in the lowercased query wins.
    pub fn match_pattern(&self, query: &str) -> ClassificationResult {
        let normalized = normalize_key(query);
        if normalized.is_empty() {
            return ClassificationResult::unknown(Method::Pattern);
        }

        self.patterns
            .iter()
            .find(|pattern| pattern.regex.is_match(&normalized))
            .map(|pattern| {
                ClassificationResult::new(pattern.intent.clone(), self.confidence, Method::Pattern)
            })
            .unwrap_or_else(|| ClassificationResult::unknown(Method::Pattern))
    }

    /// Source text of the pattern that would fire, for diagnostics.
    pub fn matching_pattern(&self, query: &str) -> Option<&str> {
        let normalized = normalize_key(query);
        self.patterns
            .iter()
            .find(|pattern| pattern.regex.is_match(&normalized))
            .map(|pattern| pattern.source.as_str())
    }
}

impl IntentMatcher for PatternMatcher {
    fn method(&self) -> Method {
        Method::Pattern
    }

    async fn classify(&self, query: &str) -> Result<ClassificationResult> {
        Ok(self.match_pattern(query))
    }
}

fn compile_pattern(pattern: &str) -> Result<Regex> {
    let placeholder = Regex::new(r"\{[a-z_]+\}")?;
    let normalized = normalize_key(pattern);

    let mut expression = String::new();
    let mut last = 0;
    for found in placeholder.find_iter(&normalized) {
        expression.push_str(&regex::escape(&normalized[last..found.start()]));
        expression.push_str(WILDCARD);
        last = found.end();
    }
    expression.push_str(&regex::escape(&normalized[last..]));

    Ok(Regex::new(&expression)?)
}
