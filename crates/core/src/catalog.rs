use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::RouterError;
use crate::models::{Intent, UNKNOWN_INTENT};

pub const PLACEHOLDERS: &[&str] = &["company", "product", "date", "name", "text"];

const DEFAULT_CATALOG: &str = include_str!("default_catalog.json");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentTemplate {
    pub intent: Intent,
    #[serde(default)]
    pub canonical: Option<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub examples: Vec<String>,
}

impl IntentTemplate {
    pub fn canonical_phrase(&self) -> String {
        self.canonical
            .clone()
            .unwrap_or_else(|| self.intent.as_str().replace('_', " "))
    }

    /// Canonical phrase followed by the examples.
    pub fn seed_phrases(&self) -> Vec<String> {
        std::iter::once(self.canonical_phrase())
            .chain(self.examples.iter().cloned())
            .collect()
    }
}

/// Ordered, read-only template catalog. Order is pattern priority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateCatalog {
    templates: Vec<IntentTemplate>,
}

impl TemplateCatalog {
    pub fn new(templates: Vec<IntentTemplate>) -> Result<Self, RouterError> {
        let catalog = Self { templates };
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn builtin() -> Result<Self> {
        Self::from_json_str(DEFAULT_CATALOG).context("built-in template catalog is invalid")
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let templates: Vec<IntentTemplate> =
            serde_json::from_str(raw).context("template catalog must be a JSON array")?;
        Ok(Self::new(templates)?)
    }

    /// Loads a single JSON file, or every `.json` file below a directory in path order.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.is_file() {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed reading template catalog at {}", path.display()))?;
            return Self::from_json_str(&raw)
                .with_context(|| format!("failed parsing template catalog {}", path.display()));
        }

        let mut files = WalkDir::new(path)
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| entry.path().extension().and_then(|ext| ext.to_str()) == Some("json"))
            .map(|entry| entry.into_path())
            .collect::<Vec<_>>();
        files.sort();

        let mut templates = Vec::new();
        for file in files {
            let raw = fs::read_to_string(&file)
                .with_context(|| format!("failed reading template file {}", file.display()))?;
            let mut parsed: Vec<IntentTemplate> = serde_json::from_str(&raw)
                .with_context(|| format!("failed parsing template file {}", file.display()))?;
            templates.append(&mut parsed);
        }

        Ok(Self::new(templates)?)
    }

    pub fn templates(&self) -> &[IntentTemplate] {
        &self.templates
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Distinct intents in first-seen order.
    pub fn intents(&self) -> Vec<Intent> {
        let mut intents: Vec<Intent> = Vec::new();
        for template in &self.templates {
            if !intents.contains(&template.intent) {
                intents.push(template.intent.clone());
            }
        }
        intents
    }

    /// `(text, intent)` pairs from canonical phrases and examples, for bootstrapping training.
    pub fn labeled_examples(&self) -> Vec<(String, Intent)> {
        self.templates
            .iter()
            .flat_map(|template| {
                template
                    .seed_phrases()
                    .into_iter()
                    .map(move |phrase| (phrase, template.intent.clone()))
            })
            .collect()
    }

    fn validate(&self) -> Result<(), RouterError> {
        if self.templates.is_empty() {
            return Err(RouterError::InvalidCatalog(
                "catalog has no templates".to_string(),
            ));
        }

        let placeholder = Regex::new(r"\{([^{}]*)\}")
            .map_err(|err| RouterError::InvalidCatalog(err.to_string()))?;
        for template in &self.templates {
            if template.intent.as_str() == UNKNOWN_INTENT {
                return Err(RouterError::InvalidCatalog(format!(
                    "`{UNKNOWN_INTENT}` is reserved and cannot be a template intent"
                )));
            }
            for pattern in &template.patterns {
                if pattern.trim().is_empty() {
                    return Err(RouterError::InvalidCatalog(format!(
                        "empty pattern for intent {}",
                        template.intent
                    )));
                }
                for captures in placeholder.captures_iter(pattern) {
                    let name = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
                    if !PLACEHOLDERS.contains(&name) {
                        return Err(RouterError::InvalidCatalog(format!(
                            "unknown placeholder {{{name}}} in pattern `{pattern}`"
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_loads() {
        let catalog = TemplateCatalog::builtin().unwrap();
        assert!(catalog.len() >= 5);
        assert!(catalog.intents().iter().all(|intent| !intent.is_unknown()));
    }

    #[test]
    fn rejects_unknown_placeholder() {
        let raw = r#"[{"intent": "sales", "patterns": ["sales for {customer}"]}]"#;
        assert!(TemplateCatalog::from_json_str(raw).is_err());
    }

    #[test]
    fn rejects_reserved_intent() {
        let raw = r#"[{"intent": "unknown", "patterns": ["anything"]}]"#;
        assert!(TemplateCatalog::from_json_str(raw).is_err());
    }

    #[test]
    fn seed_phrases_start_with_canonical() {
        let raw = r#"[{"intent": "order_status", "examples": ["where is my order"]}]"#;
        let catalog = TemplateCatalog::from_json_str(raw).unwrap();
        let seeds = catalog.templates()[0].seed_phrases();
        assert_eq!(seeds, vec!["order status".to_string(), "where is my order".to_string()]);
    }
}
