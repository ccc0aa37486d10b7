pub mod catalog;
pub mod config;
pub mod error;
pub mod models;
pub mod pattern;
pub mod text;

use anyhow::Result;

pub use catalog::{IntentTemplate, TemplateCatalog};
pub use config::{MethodWeights, RouterConfig};
pub use error::RouterError;
pub use models::*;
pub use pattern::PatternMatcher;
pub use text::{normalize_key, normalize_text, tokenize};

/// Common shape of the three sub-classifiers the ensemble votes over.
pub trait IntentMatcher: Send + Sync {
    fn method(&self) -> Method;
    async fn classify(&self, query: &str) -> Result<ClassificationResult>;
}
